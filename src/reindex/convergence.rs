use std::time::Duration;

use crate::core::Result;
use crate::gateway::SearchGateway;

pub const DEFAULT_STUCK_PASS_THRESHOLD: u32 = 10;
pub const DEFAULT_REPLICA_CATCH_UP: Duration = Duration::from_secs(3);

/// 判断一次 reindex 之后是否需要再跑一轮。
///
/// 源索引在复制期间仍可能被写入，两边快照也不是原子获取的，
/// 所以单纯比较总数不够。只有“目标在增长、源仍领先、且这种情况
/// 已累计超过阈值次”才要求重跑；阈值以下视为仍在追赶。
///
/// 卡住计数由调用方持有并传入，两个编排器之间不会共享。
pub struct ConvergenceChecker<'a, G: SearchGateway + ?Sized> {
    gateway: &'a G,
    stuck_threshold: u32,
    catch_up_delay: Duration,
}

impl<'a, G: SearchGateway + ?Sized> ConvergenceChecker<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self {
            gateway,
            stuck_threshold: DEFAULT_STUCK_PASS_THRESHOLD,
            catch_up_delay: DEFAULT_REPLICA_CATCH_UP,
        }
    }

    pub fn with_stuck_threshold(mut self, threshold: u32) -> Self {
        self.stuck_threshold = threshold;
        self
    }

    pub fn with_catch_up_delay(mut self, delay: Duration) -> Self {
        self.catch_up_delay = delay;
        self
    }

    pub fn needs_another_pass(
        &self,
        old_index: &str,
        new_index: &str,
        pass_start_old_docs: u64,
        stuck_passes: &mut u32,
    ) -> Result<bool> {
        // 刚结束的一轮可能还没传播到读副本
        let early = self.gateway.snapshot(new_index)?;
        if early.total_documents < pass_start_old_docs {
            tracing::debug!(
                "{} shows {}/{} right after pass, waiting {:?} for replicas",
                new_index,
                early.total_documents,
                pass_start_old_docs,
                self.catch_up_delay
            );
            std::thread::sleep(self.catch_up_delay);
        }

        let old = self.gateway.snapshot(old_index)?;
        let new = self.gateway.snapshot(new_index)?;

        let grew = new.total_documents > pass_start_old_docs;
        let source_leads = old.total_documents > new.total_documents;

        if grew && source_leads {
            *stuck_passes += 1;
            tracing::debug!(
                "Source {} ({}) still leads {} ({}), stuck passes: {}",
                old_index,
                old.total_documents,
                new_index,
                new.total_documents,
                stuck_passes
            );
        }

        Ok(grew && source_leads && *stuck_passes > self.stuck_threshold)
    }
}
