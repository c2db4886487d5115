use std::time::Duration;

use crate::core::{IndexSnapshot, MigrateError, Result, TaskId};
use crate::gateway::{ReindexRequest, SearchGateway};

/// 单次 reindex 的起点：开始时刻的源/目标快照
#[derive(Clone, Debug)]
pub struct PassPlan<'a> {
    pub source: &'a IndexSnapshot,
    pub dest: &'a IndexSnapshot,
    pub script: Option<&'a serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PassState {
    Polling,
    Finished,
}

/// 一次 reindex 的进度流：STARTING -> POLLING -> {COMPLETED | TASK_LOST}。
///
/// 作为 `Iterator` 惰性产出“到目前为止已处理的文档数”。
/// 有限、不可重启；每两次拉取之间阻塞 `poll_delay`。
/// 产出 `Err` 之后迭代结束。
pub struct ReindexPass<'a, G: SearchGateway + ?Sized> {
    gateway: &'a G,
    task: TaskId,
    dest: String,
    /// 任务开始时记录的源文档数，TASK_LOST 时据此判断是否已完成
    source_total: u64,
    poll_delay: Duration,
    settle_delay: Duration,
    state: PassState,
    polled: bool,
}

impl<'a, G: SearchGateway + ?Sized> ReindexPass<'a, G> {
    /// 启动服务端任务。从目标当前的 marker 继续复制，而不是从 0 开始。
    /// 启动失败直接返回，不重试。
    pub fn start(
        gateway: &'a G,
        plan: &PassPlan<'_>,
        poll_delay: Duration,
        settle_delay: Duration,
    ) -> Result<Self> {
        let task = gateway.start_reindex(&ReindexRequest {
            source: &plan.source.name,
            dest: &plan.dest.name,
            since_marker: plan.dest.last_marker,
            script: plan.script,
        })?;
        tracing::info!(
            "Reindex task {} started: {} -> {} from marker {}",
            task,
            plan.source.name,
            plan.dest.name,
            plan.dest.last_marker
        );

        Ok(Self {
            gateway,
            task,
            dest: plan.dest.name.clone(),
            source_total: plan.source.total_documents,
            poll_delay,
            settle_delay,
            state: PassState::Polling,
            polled: false,
        })
    }

    fn on_task_lost(&mut self, err: MigrateError) -> Result<u64> {
        tracing::debug!("Task {} vanished, waiting {:?} before recount", self.task, self.settle_delay);
        std::thread::sleep(self.settle_delay);

        let count = self.gateway.raw_document_count(&self.dest)?;
        if count >= self.source_total {
            tracing::info!(
                "Task {} already pruned; {} holds {}/{} documents",
                self.task,
                self.dest,
                count,
                self.source_total
            );
            Ok(count)
        } else {
            Err(err)
        }
    }
}

impl<G: SearchGateway + ?Sized> Iterator for ReindexPass<'_, G> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == PassState::Finished {
            return None;
        }
        if self.polled {
            std::thread::sleep(self.poll_delay);
        }
        self.polled = true;

        match self.gateway.task_status(&self.task) {
            Ok(progress) => {
                if progress.completed {
                    self.state = PassState::Finished;
                }
                Some(Ok(progress.processed))
            }
            Err(err) if err.is_task_not_found() => {
                self.state = PassState::Finished;
                Some(self.on_task_lost(err))
            }
            Err(err) => {
                self.state = PassState::Finished;
                Some(Err(err))
            }
        }
    }
}
