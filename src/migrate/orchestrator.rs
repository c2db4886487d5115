use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::Tuning;
use crate::core::{IndexIdentity, MigrateError, MigrationSpec, MigrationState, Result};
use crate::gateway::SearchGateway;
use crate::migrate::progress::{Phase, ProgressSink};
use crate::naming::IndexNameResolver;
use crate::reindex::{ConvergenceChecker, PassPlan, ReindexPass};

/// 一次成功迁移的结果
#[derive(Clone, Debug)]
pub struct MigrationReport {
    pub old: Option<IndexIdentity>,
    pub new: IndexIdentity,
    pub passes: u32,
    pub stuck_passes: u32,
    /// 被降级为警告的非致命问题（旧索引缺失、设置恢复失败）
    pub warnings: Vec<String>,
}

/// 迁移失败。回滚失败单独携带，不覆盖原始原因。
#[derive(Error, Debug)]
pub enum MigrationFailure {
    /// 目标索引尚未创建，无需回滚
    #[error("preparing `{logical}` failed: {cause}")]
    Prepare {
        logical: String,
        #[source]
        cause: MigrateError,
    },

    #[error("reindex into `{new_index}` failed: {cause}")]
    Reindex {
        new_index: String,
        #[source]
        cause: MigrateError,
        rollback: Option<MigrateError>,
    },

    /// 新索引数据完整，保留不删
    #[error("alias `{alias}` was not moved to `{new_index}`: {cause}")]
    AliasSwap {
        alias: String,
        new_index: String,
        #[source]
        cause: MigrateError,
    },
}

impl MigrationFailure {
    /// 回滚（删除新索引）本身也失败了，需要人工清理
    pub fn rollback_error(&self) -> Option<&MigrateError> {
        match self {
            Self::Reindex { rollback, .. } => rollback.as_ref(),
            _ => None,
        }
    }
}

/// 迁移 saga：
/// RESOLVE_OLD -> CREATE_NEW -> REINDEX_LOOP -> SWAP_ALIAS -> DONE，
/// REINDEX_LOOP 中任何失败进入 ROLLBACK（删除新索引）。
pub struct Migrator<'a, G: SearchGateway + ?Sized> {
    gateway: &'a G,
    tuning: Tuning,
}

impl<'a, G: SearchGateway + ?Sized> Migrator<'a, G> {
    pub fn new(gateway: &'a G, tuning: Tuning) -> Self {
        Self { gateway, tuning }
    }

    pub fn migrate(
        &self,
        spec: &MigrationSpec,
        progress: &mut dyn ProgressSink,
    ) -> std::result::Result<MigrationReport, MigrationFailure> {
        let logical = spec.name.as_str();
        let prepare = |cause| MigrationFailure::Prepare {
            logical: logical.to_string(),
            cause,
        };
        let resolver = IndexNameResolver::new(self.gateway)
            .with_max_probes(self.tuning.max_version_probes);
        let mut warnings = Vec::new();

        let old = match resolver.resolve_old_index(logical) {
            Ok(name) => {
                tracing::info!("Old index: {}", name);
                Some(name)
            }
            Err(MigrateError::IndexNotFound(name)) => {
                tracing::warn!("Old index `{}` not exists, creating a fresh one", name);
                warnings.push(format!("old index `{}` not exists", name));
                None
            }
            Err(cause) => return Err(prepare(cause)),
        };

        let new_index = resolver
            .next_version(old.as_deref().unwrap_or(logical))
            .map_err(prepare)?;
        self.gateway
            .create_index(&new_index, &creation_body(&spec.body))
            .map_err(prepare)?;
        tracing::info!("New index: {}", new_index);

        let mut state = MigrationState::new(old.clone(), new_index.clone());
        state.replicas_zeroed = true;

        if let Some(old_index) = old.as_deref() {
            if let Err(cause) = self.reindex_loop(&mut state, old_index, spec, progress, &mut warnings) {
                tracing::error!("Reindexer error: {}", cause);
                let rollback = self.rollback(&new_index);
                return Err(MigrationFailure::Reindex {
                    new_index,
                    cause,
                    rollback,
                });
            }
        }

        if let Err(cause) = self.gateway.swap_alias(logical, &new_index, old.as_deref()) {
            tracing::error!("Alias {} update error, {} left in place: {}", logical, new_index, cause);
            return Err(MigrationFailure::AliasSwap {
                alias: logical.to_string(),
                new_index,
                cause,
            });
        }
        tracing::info!("Alias {} updated -> {}", logical, new_index);

        self.restore_settings(&mut state, spec, &mut warnings);

        Ok(MigrationReport {
            old: old.map(|concrete| IndexIdentity::new(logical, concrete)),
            new: IndexIdentity::new(logical, new_index),
            passes: state.pass,
            stuck_passes: state.stuck_passes,
            warnings,
        })
    }

    fn reindex_loop(
        &self,
        state: &mut MigrationState,
        old_index: &str,
        spec: &MigrationSpec,
        progress: &mut dyn ProgressSink,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let new_index = state.new_index.clone();
        let checker = ConvergenceChecker::new(self.gateway)
            .with_stuck_threshold(self.tuning.stuck_pass_threshold)
            .with_catch_up_delay(self.tuning.replica_catch_up());

        loop {
            state.pass += 1;
            let first_pass = state.pass == 1;

            let dest = self.gateway.snapshot(&new_index)?;
            if first_pass {
                self.gateway
                    .set_setting(&new_index, "refresh_interval", json!("-1"))?;
                state.refresh_disabled = true;
                tracing::info!("Refresh interval disabled on {}", new_index);
            }
            let source = self.gateway.snapshot(old_index)?;

            tracing::info!(
                "Pass {}: reindexing {} documents from marker {}",
                state.pass,
                source.total_documents,
                dest.last_marker
            );
            let plan = PassPlan {
                source: &source,
                dest: &dest,
                script: spec.script.as_ref(),
            };
            progress.begin(Phase::Reindex { pass: state.pass }, source.total_documents);
            let driven = self.drive_pass(&plan, progress);
            progress.finish();
            driven?;

            if first_pass {
                self.restore_refresh(state, warnings);
            }

            self.wait_visible(
                &new_index,
                source.total_documents,
                state.pass,
                state.refresh_disabled,
                progress,
            )?;

            if !checker.needs_another_pass(
                old_index,
                &new_index,
                source.total_documents,
                &mut state.stuck_passes,
            )? {
                break;
            }
            tracing::info!("Source moved during pass {}, starting another", state.pass);
        }

        tracing::info!("Reindexer done after {} pass(es)", state.pass);
        Ok(())
    }

    fn drive_pass(&self, plan: &PassPlan<'_>, progress: &mut dyn ProgressSink) -> Result<()> {
        let pass = ReindexPass::start(
            self.gateway,
            plan,
            self.tuning.poll_delay(),
            self.tuning.settle_delay(),
        )?;
        for processed in pass {
            progress.advance(processed?);
        }
        Ok(())
    }

    /// 等待目标索引可见文档数追上本轮开始时源的文档数（refresh/副本传播）。
    /// refresh 仍被关闭时搜索计数不会前进，改用分片统计的原始文档数。
    fn wait_visible(
        &self,
        index: &str,
        expected: u64,
        pass: u32,
        refresh_disabled: bool,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        if refresh_disabled {
            tracing::warn!("Refresh still disabled on {}, waiting on raw document count", index);
        } else {
            tracing::info!("Wait refresh on {}", index);
        }
        progress.begin(Phase::WaitRefresh { pass }, expected);

        let max_polls = self.tuning.visibility_max_polls;
        let mut polls = 0u32;
        let waited = loop {
            let counted = if refresh_disabled {
                self.gateway.raw_document_count(index)
            } else {
                self.gateway.snapshot(index).map(|s| s.total_documents)
            };
            let visible = match counted {
                Ok(n) => n,
                Err(e) => break Err(e),
            };
            progress.advance(visible);
            polls += 1;

            if visible >= expected {
                break Ok(());
            }
            if max_polls != 0 && polls >= max_polls {
                break Err(MigrateError::VisibilityTimeout {
                    index: index.to_string(),
                    visible,
                    expected,
                    polls,
                });
            }
            std::thread::sleep(self.tuning.poll_delay());
        };

        progress.finish();
        waited
    }

    fn rollback(&self, new_index: &str) -> Option<MigrateError> {
        match self.gateway.delete_index(new_index) {
            Ok(()) => {
                tracing::info!("New index {} was deleted", new_index);
                None
            }
            Err(e) => {
                tracing::error!(
                    "New index {} delete error, manual cleanup required: {}",
                    new_index,
                    e
                );
                Some(e)
            }
        }
    }

    fn restore_refresh(&self, state: &mut MigrationState, warnings: &mut Vec<String>) {
        let value = json!(self.tuning.refresh_interval_after_migration);
        match self
            .gateway
            .set_setting(&state.new_index, "refresh_interval", value)
        {
            Ok(()) => {
                state.refresh_disabled = false;
                tracing::info!("Refresh interval restored on {}", state.new_index);
            }
            Err(e) => {
                tracing::warn!("Refresh interval not restored on {}: {}", state.new_index, e);
                warnings.push(format!("refresh interval not restored: {}", e));
            }
        }
    }

    /// DONE：恢复 reindex 期间改动过的设置。失败只记警告，迁移仍算成功。
    fn restore_settings(
        &self,
        state: &mut MigrationState,
        spec: &MigrationSpec,
        warnings: &mut Vec<String>,
    ) {
        if state.refresh_disabled {
            self.restore_refresh(state, warnings);
        }

        if state.replicas_zeroed {
            let replicas = requested_replicas(&spec.body)
                .unwrap_or(u64::from(self.tuning.replicas_after_migration));
            match self
                .gateway
                .set_setting(&state.new_index, "number_of_replicas", json!(replicas))
            {
                Ok(()) => {
                    state.replicas_zeroed = false;
                    tracing::info!("Replicas restored to {} on {}", replicas, state.new_index);
                }
                Err(e) => {
                    tracing::warn!("Replicas not restored on {}: {}", state.new_index, e);
                    warnings.push(format!("replicas not restored: {}", e));
                }
            }
        }
    }
}

fn into_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// 建索引 body，复制期间强制 0 副本
fn creation_body(body: &Value) -> Value {
    let mut root = body.as_object().cloned().unwrap_or_default();
    let mut settings = root
        .remove("settings")
        .and_then(into_object)
        .unwrap_or_default();
    // 扁平写法与嵌套写法并存时引擎会拒绝
    settings.remove("number_of_replicas");
    settings.remove("index.number_of_replicas");

    let mut index = settings
        .remove("index")
        .and_then(into_object)
        .unwrap_or_default();
    index.insert("number_of_replicas".to_string(), json!(0));

    settings.insert("index".to_string(), Value::Object(index));
    root.insert("settings".to_string(), Value::Object(settings));
    Value::Object(root)
}

/// 用户在 body 里显式要求的副本数
fn requested_replicas(body: &Value) -> Option<u64> {
    let settings = body.get("settings")?;
    settings
        .get("index")
        .and_then(|i| i.get("number_of_replicas"))
        .or_else(|| settings.get("number_of_replicas"))
        .or_else(|| settings.get("index.number_of_replicas"))
        .and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
}
