//! Error taxonomy for the tenant guard layer.
//!
//! Nothing here is fatal: every variant travels back to the caller as a
//! value so the IPC layer can render a targeted message.

use thiserror::Error;

/// Failure reported by a [`Backend`](super::backend::Backend) implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot decode {what}: {message}")]
    Decode { what: String, message: String },
}

/// Access-control outcome of a failed validation or post-fetch check.
#[derive(Debug, Error)]
pub enum TenantError {
    #[error("user not authenticated")]
    NotAuthenticated,

    #[error("user record not found: {user_id}")]
    UnknownUser { user_id: String },

    #[error("no tenant context available, please contact the administrator")]
    NoTenantContext,

    #[error("invalid or inactive tenant: {tenant_id}")]
    InvalidTenant { tenant_id: String },

    #[error("access denied: {reason}")]
    AccessDenied { reason: String },

    #[error("data validation failed in {context}: {mismatched} row(s) belong to another tenant")]
    DataValidationFailed { context: String, mismatched: usize },

    #[error("tenant validation failed: {0}")]
    LookupFailed(#[from] BackendError),
}

impl TenantError {
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable classification.
    pub fn code(&self) -> &'static str {
        match self {
            TenantError::NotAuthenticated | TenantError::UnknownUser { .. } => "not_authenticated",
            TenantError::NoTenantContext => "no_tenant_context",
            TenantError::InvalidTenant { .. } => "invalid_tenant",
            TenantError::AccessDenied { .. } => "access_denied",
            TenantError::DataValidationFailed { .. } => "data_validation_failed",
            TenantError::LookupFailed(_) => "lookup_failed",
        }
    }

    /// Title of the blocking alert shown for this failure.
    pub fn alert_title(&self) -> &'static str {
        match self {
            TenantError::NotAuthenticated | TenantError::UnknownUser { .. } => "Authentication Required",
            TenantError::NoTenantContext | TenantError::InvalidTenant { .. } => "School Unavailable",
            TenantError::AccessDenied { .. } => "Access Denied",
            TenantError::DataValidationFailed { .. } => "Data Security Alert",
            TenantError::LookupFailed(_) => "Error",
        }
    }

    /// A post-fetch mismatch means a filter gap somewhere upstream.
    pub fn is_security_incident(&self) -> bool {
        matches!(self, TenantError::DataValidationFailed { .. })
    }
}

/// Misuse of the tenant-scoped query builder, or a runtime failure while
/// executing a built query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("tenant id is required for tenant-scoped queries")]
    MissingTenant,

    #[error("table name is required for tenant-scoped queries")]
    MissingTable,

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("query on '{table}' not started: call select, insert, update or delete first")]
    NotStarted { table: String },

    #[error("query on '{table}' already started as {operation}")]
    AlreadyStarted { table: String, operation: &'static str },

    #[error("filters are not allowed on {operation} queries ('{table}')")]
    FiltersNotAllowed { table: String, operation: &'static str },

    #[error("insert into '{table}' needs at least one row")]
    EmptyInsert { table: String },

    #[error("{0} group needs at least one filter")]
    EmptyGroup(&'static str),

    #[error("invalid range {from}..={to}")]
    InvalidRange { from: usize, to: usize },

    #[error("limit {0} is too large")]
    InvalidLimit(usize),

    #[error("expected exactly one row from '{table}', got {count}")]
    SingleRowExpected { table: String, count: usize },

    #[error("row {index} for '{table}' is not an object")]
    RowNotObject { table: String, index: usize },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Backend(_) => "db_query_failed",
            QueryError::SingleRowExpected { .. } => "single_row_expected",
            _ => "bad_query",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_validation_failure_is_the_only_security_incident() {
        let mismatch = TenantError::DataValidationFailed {
            context: "fees".into(),
            mismatched: 2,
        };
        assert!(mismatch.is_security_incident());
        assert_eq!(mismatch.alert_title(), "Data Security Alert");
        assert!(!TenantError::access_denied("x").is_security_incident());
        assert_eq!(TenantError::access_denied("x").alert_title(), "Access Denied");
    }

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(TenantError::NotAuthenticated.code(), "not_authenticated");
        assert_eq!(TenantError::NoTenantContext.code(), "no_tenant_context");
        assert_eq!(
            TenantError::InvalidTenant {
                tenant_id: "t".into()
            }
            .code(),
            "invalid_tenant"
        );
        assert_eq!(
            QueryError::NotStarted {
                table: "students".into()
            }
            .code(),
            "bad_query"
        );
    }
}
