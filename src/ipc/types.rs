use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::cache::AggregateCache;
use crate::config::GuardConfig;
use crate::tenant::TenantValidator;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: GuardConfig,
    pub validator: TenantValidator,
    pub aggregates: AggregateCache,
}

impl AppState {
    pub fn new(config: GuardConfig) -> Self {
        let validator = TenantValidator::new(
            config.exempt_roles.clone(),
            config.validation_ttl,
            config.aggregate_max_entries,
        );
        let aggregates = AggregateCache::new(config.aggregate_ttl, config.aggregate_max_entries);
        Self {
            workspace: None,
            db: None,
            config,
            validator,
            aggregates,
        }
    }
}
