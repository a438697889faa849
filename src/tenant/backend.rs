//! Seam between the guard layer and the database that actually runs queries.

use serde::Serialize;

use super::error::BackendError;
use super::model::{GuardianLink, Tenant, UserRecord};
use super::query::TenantQuery;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
}

impl QueryOutput {
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn into_value(self) -> serde_json::Value {
        serde_json::Value::Array(self.rows.into_iter().map(serde_json::Value::Object).collect())
    }
}

/// Database collaborator. Global lookups (tenants, users, roles, guardian
/// links) are unscoped by nature; everything else goes through
/// [`Backend::execute`] with an already tenant-scoped query.
pub trait Backend {
    fn execute(&self, query: &TenantQuery) -> Result<QueryOutput, BackendError>;

    fn find_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, BackendError>;

    fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>, BackendError>;

    fn role_name(&self, role_id: i64) -> Result<Option<String>, BackendError>;

    fn guardian_links(&self, user_id: &str) -> Result<Vec<GuardianLink>, BackendError>;
}
