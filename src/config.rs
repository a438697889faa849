//! Runtime configuration for the guard layer.

use std::time::Duration;

use anyhow::{anyhow, Context};
use serde_json::json;

use crate::tenant::RoleKind;

/// Tunables of the validator, the aggregate cache and logging.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Lifetime of a cached aggregate (default: 300 s).
    pub aggregate_ttl: Duration,
    /// Upper bound on cached aggregates across all tenants (default: 512).
    pub aggregate_max_entries: usize,
    /// Lifetime of a cached access grant (default: 60 s). Zero disables it.
    pub validation_ttl: Duration,
    /// Roles scoped by guardian links instead of tenant membership.
    pub exempt_roles: Vec<RoleKind>,
    /// `tracing` filter directive.
    pub log_filter: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            aggregate_ttl: Duration::from_secs(300),
            aggregate_max_entries: 512,
            validation_ttl: Duration::from_secs(60),
            exempt_roles: vec![RoleKind::Parent],
            log_filter: "schoold=info".into(),
        }
    }
}

impl GuardConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; unset or blank keeps the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(v) = var("SCHOOLD_AGGREGATE_TTL_SECS") {
            cfg.aggregate_ttl = Duration::from_secs(parse_u64("SCHOOLD_AGGREGATE_TTL_SECS", &v)?);
        }
        if let Some(v) = var("SCHOOLD_AGGREGATE_MAX_ENTRIES") {
            let n = parse_u64("SCHOOLD_AGGREGATE_MAX_ENTRIES", &v)?;
            if n == 0 {
                return Err(anyhow!("SCHOOLD_AGGREGATE_MAX_ENTRIES must be at least 1"));
            }
            cfg.aggregate_max_entries = usize::try_from(n)
                .with_context(|| format!("SCHOOLD_AGGREGATE_MAX_ENTRIES out of range: {v}"))?;
        }
        if let Some(v) = var("SCHOOLD_VALIDATION_TTL_SECS") {
            cfg.validation_ttl = Duration::from_secs(parse_u64("SCHOOLD_VALIDATION_TTL_SECS", &v)?);
        }
        if let Some(v) = var("SCHOOLD_EXEMPT_ROLES") {
            cfg.exempt_roles = parse_roles(&v)?;
        }
        if let Some(v) = var("SCHOOLD_LOG") {
            cfg.log_filter = v;
        }
        Ok(cfg)
    }

    /// Shape reported by `health`.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "aggregateTtlSecs": self.aggregate_ttl.as_secs(),
            "aggregateMaxEntries": self.aggregate_max_entries,
            "validationTtlSecs": self.validation_ttl.as_secs(),
            "exemptRoles": self.exempt_roles,
            "logFilter": self.log_filter,
        })
    }
}

fn parse_u64(name: &str, raw: &str) -> anyhow::Result<u64> {
    raw.parse::<u64>()
        .with_context(|| format!("{name} must be a non-negative integer, got {raw:?}"))
}

fn parse_roles(raw: &str) -> anyhow::Result<Vec<RoleKind>> {
    if raw.eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let role = RoleKind::parse(part)
            .ok_or_else(|| anyhow!("SCHOOLD_EXEMPT_ROLES: unknown role {part:?}"))?;
        if !out.contains(&role) {
            out.push(role);
        }
    }
    Ok(out)
}
