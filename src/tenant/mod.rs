//! Tenant isolation guard.
//!
//! Every read or write of tenant-owned data passes through here: access is
//! validated, queries are built with the tenant constraint already in place,
//! and results are re-checked before they leave the process.

pub mod backend;
pub mod error;
pub mod guardian;
pub mod model;
pub mod query;
pub mod tenancy;
pub mod validator;

pub use backend::{Backend, QueryOutput, Row};
pub use error::{BackendError, QueryError, TenantError};
pub use guardian::GuardianScope;
pub use model::{GuardianLink, RoleKind, Tenant, TenantStatus, UserRecord, TENANT_COLUMN};
pub use query::{rows_from_value, Filter, Order, TenantQuery};
pub use tenancy::{ensure_rows_belong, validate_data_tenancy};
pub use validator::{AccessGrant, TenantValidator};
