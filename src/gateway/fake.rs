//! 内存中的脚本化引擎，供单元测试驱动命名解析、reindex 驱动与编排器。

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::{IndexSnapshot, MigrateError, Result, TaskId, TaskProgress};
use crate::gateway::{ReindexRequest, SearchGateway};

#[derive(Clone, Debug, Default)]
pub struct FakeIndex {
    pub docs: u64,
    pub marker: u64,
    pub body: Option<serde_json::Value>,
    pub settings: HashMap<String, serde_json::Value>,
}

/// 下一次 reindex 任务的行为
#[derive(Clone, Debug)]
pub enum TaskScript {
    /// 依次返回的进度；最后一个 completed 时把源文档“复制”到目标
    Progress(Vec<TaskProgress>),
    /// 首次查询即 404，目标此时可见 `copied` 条文档
    Lost { copied: u64 },
}

#[derive(Default)]
struct State {
    indices: HashMap<String, FakeIndex>,
    aliases: HashMap<String, String>,
    /// 每个索引待返回的快照覆盖值，耗尽后回落到真实状态
    snapshots: HashMap<String, VecDeque<(u64, u64)>>,
    task_scripts: VecDeque<TaskScript>,
    running: HashMap<TaskId, (String, String, VecDeque<TaskProgress>)>,
    lost: HashSet<TaskId>,
    failing: HashSet<&'static str>,
    /// (op, 调用明细中的子串)：命中一次后移除
    failing_once: Vec<(&'static str, String)>,
    reindex_requests: Vec<(String, String, u64, bool)>,
    calls: Vec<String>,
    next_task: u32,
}

#[derive(Default)]
pub struct FakeEngine {
    state: RefCell<State>,
}

pub fn progress(processed: u64, total: u64, completed: bool) -> TaskProgress {
    TaskProgress {
        completed,
        total,
        processed,
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_index(&self, name: &str, docs: u64, marker: u64) {
        self.state.borrow_mut().indices.insert(
            name.to_string(),
            FakeIndex {
                docs,
                marker,
                ..Default::default()
            },
        );
    }

    pub fn add_alias(&self, alias: &str, index: &str) {
        self.state
            .borrow_mut()
            .aliases
            .insert(alias.to_string(), index.to_string());
    }

    pub fn queue_snapshot(&self, name: &str, docs: u64, marker: u64) {
        self.state
            .borrow_mut()
            .snapshots
            .entry(name.to_string())
            .or_default()
            .push_back((docs, marker));
    }

    pub fn script_task(&self, script: TaskScript) {
        self.state.borrow_mut().task_scripts.push_back(script);
    }

    /// 让某个操作返回 NotAcknowledged（按方法名，如 "swap_alias"）
    pub fn fail(&self, op: &'static str) {
        self.state.borrow_mut().failing.insert(op);
    }

    /// 只让下一次明细包含 `needle` 的 `op` 调用失败，
    /// 如 `fail_once("set_setting", "refresh_interval=\"1s\"")`
    pub fn fail_once(&self, op: &'static str, needle: &str) {
        self.state
            .borrow_mut()
            .failing_once
            .push((op, needle.to_string()));
    }

    pub fn index(&self, name: &str) -> Option<FakeIndex> {
        self.state.borrow().indices.get(name).cloned()
    }

    pub fn alias_target(&self, alias: &str) -> Option<String> {
        self.state.borrow().aliases.get(alias).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// (source, dest, since_marker, has_script)
    pub fn reindex_requests(&self) -> Vec<(String, String, u64, bool)> {
        self.state.borrow().reindex_requests.clone()
    }

    fn record(&self, op: &'static str, detail: &str) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.calls.push(format!("{} {}", op, detail));
        let once = st
            .failing_once
            .iter()
            .position(|(o, needle)| *o == op && detail.contains(needle.as_str()));
        if let Some(i) = once {
            st.failing_once.remove(i);
        }
        if once.is_some() || st.failing.contains(op) {
            return Err(MigrateError::NotAcknowledged {
                op,
                index: detail.to_string(),
            });
        }
        Ok(())
    }
}

impl SearchGateway for FakeEngine {
    fn alias_exists(&self, name: &str) -> Result<bool> {
        self.record("alias_exists", name)?;
        Ok(self.state.borrow().aliases.contains_key(name))
    }

    fn index_exists(&self, name: &str) -> Result<bool> {
        self.record("index_exists", name)?;
        Ok(self.state.borrow().indices.contains_key(name))
    }

    fn resolve_alias_target(&self, alias: &str) -> Result<String> {
        self.record("resolve_alias_target", alias)?;
        self.alias_target(alias)
            .ok_or_else(|| MigrateError::IndexNotFound(alias.to_string()))
    }

    fn create_index(&self, name: &str, body: &serde_json::Value) -> Result<()> {
        self.record("create_index", name)?;
        self.state.borrow_mut().indices.insert(
            name.to_string(),
            FakeIndex {
                body: Some(body.clone()),
                ..Default::default()
            },
        );
        Ok(())
    }

    fn swap_alias(&self, alias: &str, add_to: &str, remove_from: Option<&str>) -> Result<()> {
        self.record("swap_alias", &format!("{} -> {} (remove {:?})", alias, add_to, remove_from))?;
        let mut st = self.state.borrow_mut();
        if let Some(old) = remove_from {
            st.indices.remove(old);
        }
        st.aliases.insert(alias.to_string(), add_to.to_string());
        Ok(())
    }

    fn delete_index(&self, name: &str) -> Result<()> {
        self.record("delete_index", name)?;
        self.state.borrow_mut().indices.remove(name);
        Ok(())
    }

    fn set_setting(&self, name: &str, key: &str, value: serde_json::Value) -> Result<()> {
        self.record("set_setting", &format!("{} {}={}", name, key, value))?;
        if let Some(idx) = self.state.borrow_mut().indices.get_mut(name) {
            idx.settings.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn snapshot(&self, name: &str) -> Result<IndexSnapshot> {
        self.record("snapshot", name)?;
        let mut st = self.state.borrow_mut();
        if let Some((docs, marker)) = st.snapshots.get_mut(name).and_then(|q| q.pop_front()) {
            return Ok(IndexSnapshot {
                name: name.to_string(),
                total_documents: docs,
                last_marker: marker,
            });
        }
        Ok(match st.indices.get(name) {
            Some(idx) => IndexSnapshot {
                name: name.to_string(),
                total_documents: idx.docs,
                last_marker: idx.marker,
            },
            None => IndexSnapshot::empty(name),
        })
    }

    fn start_reindex(&self, request: &ReindexRequest<'_>) -> Result<TaskId> {
        self.record("start_reindex", &format!("{} -> {}", request.source, request.dest))?;
        let mut st = self.state.borrow_mut();
        st.next_task += 1;
        let task = TaskId(format!("node:{}", st.next_task));
        st.reindex_requests.push((
            request.source.to_string(),
            request.dest.to_string(),
            request.since_marker,
            request.script.is_some(),
        ));

        let source_docs = st.indices.get(request.source).map(|i| i.docs).unwrap_or(0);
        let script = st.task_scripts.pop_front();
        match script {
            Some(TaskScript::Lost { copied }) => {
                if let Some(dest) = st.indices.get_mut(request.dest) {
                    dest.docs = copied;
                }
                st.lost.insert(task.clone());
            }
            Some(TaskScript::Progress(steps)) => {
                st.running.insert(
                    task.clone(),
                    (request.source.to_string(), request.dest.to_string(), steps.into()),
                );
            }
            None => {
                let steps = VecDeque::from(vec![progress(source_docs, source_docs, true)]);
                st.running.insert(
                    task.clone(),
                    (request.source.to_string(), request.dest.to_string(), steps),
                );
            }
        }
        Ok(task)
    }

    fn task_status(&self, task: &TaskId) -> Result<TaskProgress> {
        self.record("task_status", &task.0)?;
        let mut st = self.state.borrow_mut();
        if st.lost.contains(task) {
            return Err(MigrateError::TaskNotFound(task.clone()));
        }

        let (source, dest, step) = match st.running.get_mut(task) {
            Some((source, dest, steps)) => {
                let step = steps
                    .pop_front()
                    .unwrap_or_else(|| progress(0, 0, true));
                (source.clone(), dest.clone(), step)
            }
            None => return Err(MigrateError::TaskNotFound(task.clone())),
        };

        if step.completed {
            st.running.remove(task);
            let (docs, marker) = st
                .indices
                .get(&source)
                .map(|i| (i.docs, i.marker))
                .unwrap_or_default();
            if let Some(d) = st.indices.get_mut(&dest) {
                d.docs = docs;
                d.marker = marker;
            }
        }
        Ok(step)
    }

    fn raw_document_count(&self, name: &str) -> Result<u64> {
        self.record("raw_document_count", name)?;
        Ok(self.state.borrow().indices.get(name).map(|i| i.docs).unwrap_or(0))
    }
}
