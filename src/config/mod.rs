use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{MigrateError, MigrationSpec, Result};
use crate::gateway::Connection;

/// 配置文件（TOML）顶层结构
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: Connection,
    #[serde(default)]
    pub tuning: Tuning,
    /// 原样保留，由 `IndicesRegistry` 统一校验
    #[serde(default)]
    pub indices: Vec<toml::Value>,
}

/// 轮询/等待相关的经验值，全部可配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub poll_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub replica_catch_up_ms: u64,
    pub stuck_pass_threshold: u32,
    /// 0 表示不设上限
    pub visibility_max_polls: u32,
    pub max_version_probes: u32,
    pub marker_field: String,
    pub replicas_after_migration: u32,
    pub refresh_interval_after_migration: String,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            poll_delay_ms: 300,
            settle_delay_ms: 3000,
            replica_catch_up_ms: 3000,
            stuck_pass_threshold: 10,
            visibility_max_polls: 6000,
            max_version_probes: 1000,
            marker_field: "meta.cas".to_string(),
            replicas_after_migration: 1,
            refresh_interval_after_migration: "1s".to_string(),
        }
    }
}

impl Tuning {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn replica_catch_up(&self) -> Duration {
        Duration::from_millis(self.replica_catch_up_ms)
    }
}

impl AppConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// `<config_dir>/es-reindex/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("es-reindex")
            .join("config.toml")
    }

    pub fn registry(&self) -> Result<IndicesRegistry> {
        IndicesRegistry::from_entries(&self.indices)
    }
}

/// 已校验的 逻辑索引名 -> MigrationSpec 映射
#[derive(Debug)]
pub struct IndicesRegistry {
    specs: Vec<MigrationSpec>,
}

impl IndicesRegistry {
    /// 校验全部条目，收集所有出错位置后一次性报告，而不是遇到第一个就停
    pub fn from_entries(entries: &[toml::Value]) -> Result<Self> {
        if entries.is_empty() {
            return Err(MigrateError::config(
                "configure at least one index in the indices section",
            ));
        }

        let mut problems = Vec::new();
        let mut specs = Vec::with_capacity(entries.len());
        let mut seen = HashSet::new();

        for (position, entry) in entries.iter().enumerate() {
            let Some(table) = entry.as_table() else {
                problems.push(format!("index at position {} is not a table", position));
                continue;
            };

            let name = match table.get("name") {
                Some(toml::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => {
                    problems.push(format!("wrong configured index name at position {}", position));
                    None
                }
            };

            let body = match table.get("body") {
                Some(v @ toml::Value::Table(_)) => Some(to_json(v, position, "body", &mut problems)),
                _ => {
                    problems.push(format!("wrong configured index body at position {}", position));
                    None
                }
            };

            let script = match table.get("script") {
                None => Some(None),
                Some(v @ toml::Value::Table(_)) => {
                    Some(Some(to_json(v, position, "script", &mut problems)))
                }
                Some(_) => {
                    problems.push(format!("wrong configured index script at position {}", position));
                    None
                }
            };

            if let Some(n) = &name {
                if !seen.insert(n.clone()) {
                    problems.push(format!("duplicate index `{}` at position {}", n, position));
                }
            }

            if let (Some(name), Some(body), Some(script)) = (name, body, script) {
                specs.push(MigrationSpec { name, body, script });
            }
        }

        if !problems.is_empty() {
            return Err(MigrateError::Config(problems.join("; ")));
        }
        Ok(Self { specs })
    }

    pub fn get(&self, logical: &str) -> Result<&MigrationSpec> {
        self.specs
            .iter()
            .find(|s| s.name == logical)
            .ok_or_else(|| MigrateError::IndexNotConfigured(logical.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }
}

fn to_json(
    value: &toml::Value,
    position: usize,
    field: &str,
    problems: &mut Vec<String>,
) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        problems.push(format!("index {} at position {} is not JSON-compatible: {}", field, position, e));
        serde_json::Value::Null
    })
}
