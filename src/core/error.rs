use thiserror::Error;

use crate::core::types::TaskId;

pub type Result<T> = std::result::Result<T, MigrateError>;

/// 迁移过程中所有可能的失败（对应引擎边界 + 配置层）
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Index `{0}` not configured")]
    IndexNotConfigured(String),

    #[error("Index `{0}` not exists")]
    IndexNotFound(String),

    #[error("No free version for `{base}` after {attempts} probes")]
    NamespaceExhausted { base: String, attempts: u32 },

    #[error("{op} on `{index}` was not acknowledged")]
    NotAcknowledged { op: &'static str, index: String },

    #[error("Task not found ({0})")]
    TaskNotFound(TaskId),

    #[error("Invalid response body: {0}")]
    InvalidResponse(String),

    #[error("Index `{index}` still shows {visible}/{expected} documents after {polls} polls")]
    VisibilityTimeout {
        index: String,
        visible: u64,
        expected: u64,
        polls: u32,
    },

    #[error("Engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MigrateError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn invalid_response<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidResponse(e.to_string())
    }

    pub fn is_task_not_found(&self) -> bool {
        matches!(self, Self::TaskNotFound(_))
    }
}
