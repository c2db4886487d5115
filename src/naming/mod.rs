use regex::Regex;
use std::sync::OnceLock;

use crate::core::{MigrateError, Result};
use crate::gateway::SearchGateway;

/// 单次探测新版本号的默认上限
pub const DEFAULT_MAX_VERSION_PROBES: u32 = 1000;

fn version_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)-v(\d+)$").expect("static regex"))
}

/// `products-v3` -> `products`；无版本后缀时原样返回
pub fn base_name(index: &str) -> &str {
    match version_suffix().find(index) {
        Some(m) => &index[..m.start()],
        None => index,
    }
}

/// `products-v3` -> 3；无后缀为 0。超出 u64 的版本号饱和为 u64::MAX，
/// 之后的探测会以 `NamespaceExhausted` 失败。
pub fn version_of(index: &str) -> u64 {
    version_suffix()
        .captures(index)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX))
        .unwrap_or(0)
}

pub fn with_version(index: &str, version: u64) -> String {
    format!("{}-v{}", base_name(index), version)
}

/// 索引命名解析：找到别名背后的旧索引，并生成下一个未被占用的版本名
pub struct IndexNameResolver<'a, G: SearchGateway + ?Sized> {
    gateway: &'a G,
    max_probes: u32,
}

impl<'a, G: SearchGateway + ?Sized> IndexNameResolver<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self {
            gateway,
            max_probes: DEFAULT_MAX_VERSION_PROBES,
        }
    }

    pub fn with_max_probes(mut self, max_probes: u32) -> Self {
        self.max_probes = max_probes.max(1);
        self
    }

    /// 别名存在则取其唯一绑定的索引，否则把逻辑名本身当作具体索引。
    /// 解析出的索引不存在时返回 `IndexNotFound`。
    pub fn resolve_old_index(&self, logical: &str) -> Result<String> {
        let concrete = if self.gateway.alias_exists(logical)? {
            self.gateway.resolve_alias_target(logical)?
        } else {
            logical.to_string()
        };

        if !self.gateway.index_exists(&concrete)? {
            return Err(MigrateError::IndexNotFound(concrete));
        }

        Ok(concrete)
    }

    /// 从 N+1 开始逐个探测，跳过之前失败运行遗留的更高版本
    pub fn next_version(&self, old_concrete: &str) -> Result<String> {
        let mut version = version_of(old_concrete);

        for _ in 0..self.max_probes {
            version = version
                .checked_add(1)
                .ok_or_else(|| self.exhausted(old_concrete))?;
            let candidate = with_version(old_concrete, version);
            if !self.gateway.index_exists(&candidate)? {
                return Ok(candidate);
            }
            tracing::debug!("Index {} already exists, probing next version", candidate);
        }

        Err(self.exhausted(old_concrete))
    }

    fn exhausted(&self, old_concrete: &str) -> MigrateError {
        MigrateError::NamespaceExhausted {
            base: base_name(old_concrete).to_string(),
            attempts: self.max_probes,
        }
    }
}
