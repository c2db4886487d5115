pub mod http;

#[cfg(test)]
pub mod fake;

use crate::core::{IndexSnapshot, Result, TaskId, TaskProgress};

pub use http::{Connection, HttpGateway};

/// 启动一次服务端 reindex 任务所需的参数
#[derive(Clone, Debug)]
pub struct ReindexRequest<'a> {
    pub source: &'a str,
    pub dest: &'a str,
    /// 只复制 marker >= since_marker 的源文档（按 marker 升序）
    pub since_marker: u64,
    pub script: Option<&'a serde_json::Value>,
}

/// 搜索引擎边界：迁移核心只通过这组阻塞调用访问引擎。
///
/// ## 契约
/// - 所有“需确认”的操作（create/swap/delete/settings）未被确认时返回 `NotAcknowledged`。
/// - `snapshot` 对尚无文档（因而没有 marker 字段）的索引返回零快照，不是错误。
/// - `task_status` 在引擎已清理已完成任务后返回 `TaskNotFound`。
pub trait SearchGateway {
    fn alias_exists(&self, name: &str) -> Result<bool>;
    fn index_exists(&self, name: &str) -> Result<bool>;
    fn resolve_alias_target(&self, alias: &str) -> Result<String>;
    fn create_index(&self, name: &str, body: &serde_json::Value) -> Result<()>;
    /// 一次请求内原子地：删除 `remove_from` 索引（若有），并把别名加到 `add_to`
    fn swap_alias(&self, alias: &str, add_to: &str, remove_from: Option<&str>) -> Result<()>;
    fn delete_index(&self, name: &str) -> Result<()>;
    fn set_setting(&self, name: &str, key: &str, value: serde_json::Value) -> Result<()>;
    fn snapshot(&self, name: &str) -> Result<IndexSnapshot>;
    fn start_reindex(&self, request: &ReindexRequest<'_>) -> Result<TaskId>;
    fn task_status(&self, task: &TaskId) -> Result<TaskProgress>;
    fn raw_document_count(&self, name: &str) -> Result<u64>;
}
