use std::fmt;

use crate::naming;

/// 逻辑索引名 + 当前承载它的带版本的具体索引
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexIdentity {
    pub logical: String,
    pub concrete: String,
}

impl IndexIdentity {
    pub fn new(logical: impl Into<String>, concrete: impl Into<String>) -> Self {
        Self {
            logical: logical.into(),
            concrete: concrete.into(),
        }
    }

    /// 去掉 `-v<N>` 后缀的基础名
    pub fn base(&self) -> &str {
        naming::base_name(&self.concrete)
    }

    /// 无后缀时为 0
    pub fn version(&self) -> u64 {
        naming::version_of(&self.concrete)
    }
}

/// 某一时刻对单个具体索引的只读快照。每次查询都重新获取，不缓存。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    pub name: String,
    pub total_documents: u64,
    /// 文档单调标记（如变更序列号）的最大值；空索引为 0
    pub last_marker: u64,
}

impl IndexSnapshot {
    /// 新建索引尚无文档时的“零快照”（不是错误）
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total_documents: 0,
            last_marker: 0,
        }
    }
}

/// 服务端 reindex 任务的不透明 ID（如 `node:1234`）
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 一次轮询得到的任务进度；`completed == true` 后即为终态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskProgress {
    pub completed: bool,
    pub total: u64,
    /// created + updated + deleted
    pub processed: u64,
}

/// 每个逻辑索引的迁移配置：建索引 body + 可选的文档转换脚本。
/// 迁移开始前加载一次，期间不可变。
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationSpec {
    pub name: String,
    pub body: serde_json::Value,
    pub script: Option<serde_json::Value>,
}

/// 编排器独占的单次迁移状态，从不持久化
#[derive(Clone, Debug, Default)]
pub struct MigrationState {
    pub old_index: Option<String>,
    pub new_index: String,
    pub pass: u32,
    /// 卡住轮次计数：单次运行内只增不减
    pub stuck_passes: u32,
    /// 目标索引的 refresh_interval 仍处于 -1
    pub refresh_disabled: bool,
    /// 目标索引以 0 副本创建，尚未恢复
    pub replicas_zeroed: bool,
}

impl MigrationState {
    pub fn new(old_index: Option<String>, new_index: String) -> Self {
        Self {
            old_index,
            new_index,
            ..Default::default()
        }
    }
}
