//! Directory provisioning and the tenant-leakage repair procedure.
//!
//! Tenants, users, roles and guardian links are directory records: they are
//! not owned by any one tenant, so they are written here directly instead of
//! through the tenant query builder.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::SqliteBackend;
use crate::tenant::{Backend, BackendError, GuardianLink, RoleKind, Tenant, TenantStatus, UserRecord};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<rusqlite::Error> for ProvisionError {
    fn from(e: rusqlite::Error) -> Self {
        ProvisionError::Backend(BackendError::Sqlite(e))
    }
}

impl ProvisionError {
    pub fn code(&self) -> &'static str {
        match self {
            ProvisionError::InvalidInput(_) => "bad_params",
            ProvisionError::NotFound { .. } => "not_found",
            ProvisionError::Conflict(_) => "conflict",
            ProvisionError::Backend(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewTenant {
    pub name: String,
    pub contact_email: Option<String>,
    pub status: Option<TenantStatus>,
    pub subscription_plan: Option<String>,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn slug(name: &str) -> String {
    let mut out = String::new();
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn school_code(name: &str) -> String {
    let initials: String = name
        .split_whitespace()
        .filter_map(|w| w.chars().next())
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let millis = Utc::now().timestamp_millis().to_string();
    let tail = &millis[millis.len().saturating_sub(6)..];
    format!("{initials}{tail}")
}

/// Inserts the tenant and its four roles. Runs inside the caller's transaction.
fn insert_tenant(conn: &Connection, input: &NewTenant) -> Result<Tenant, ProvisionError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(ProvisionError::InvalidInput("tenant name must not be empty".into()));
    }
    let id = Uuid::new_v4().to_string();
    let base = slug(name);
    let subdomain = format!(
        "{}-{}",
        if base.is_empty() { "school" } else { base.as_str() },
        &id[..8]
    );
    let tenant = Tenant {
        id,
        name: name.to_string(),
        subdomain: Some(subdomain),
        status: input.status.unwrap_or(TenantStatus::Active),
        contact_email: input.contact_email.clone(),
        subscription_plan: Some(
            input
                .subscription_plan
                .clone()
                .unwrap_or_else(|| "basic".to_string()),
        ),
    };
    conn.execute(
        "INSERT INTO tenants(id, name, subdomain, status, contact_email, subscription_plan, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &tenant.id,
            &tenant.name,
            &tenant.subdomain,
            tenant.status.as_str(),
            &tenant.contact_email,
            &tenant.subscription_plan,
            now(),
        ),
    )?;
    for role in RoleKind::ALL {
        conn.execute(
            "INSERT INTO roles(role_name, tenant_id) VALUES(?, ?)",
            (role.display_name(), &tenant.id),
        )?;
    }
    Ok(tenant)
}

pub fn provision_tenant(conn: &Connection, input: &NewTenant) -> Result<Tenant, ProvisionError> {
    let tx = conn.unchecked_transaction()?;
    let tenant = insert_tenant(&tx, input)?;
    tx.commit()?;
    info!(tenant_id = %tenant.id, name = %tenant.name, "tenant provisioned");
    Ok(tenant)
}

pub fn set_tenant_status(conn: &Connection, tenant_id: &str, status: TenantStatus) -> Result<Tenant, ProvisionError> {
    let changed = conn.execute(
        "UPDATE tenants SET status = ? WHERE id = ?",
        (status.as_str(), tenant_id),
    )?;
    if changed == 0 {
        return Err(ProvisionError::NotFound {
            what: "tenant",
            key: tenant_id.to_string(),
        });
    }
    info!(tenant_id, status = status.as_str(), "tenant status changed");
    SqliteBackend::new(conn)
        .find_tenant(tenant_id)?
        .ok_or_else(|| ProvisionError::NotFound {
            what: "tenant",
            key: tenant_id.to_string(),
        })
}

/// The tenant's own role row for `role`, falling back to the canonical id.
fn role_id_for(conn: &Connection, tenant_id: Option<&str>, role: RoleKind) -> Result<i64, ProvisionError> {
    let own: Option<i64> = match tenant_id {
        Some(t) => conn
            .query_row(
                "SELECT id FROM roles WHERE tenant_id = ? AND role_name = ? ORDER BY id LIMIT 1",
                (t, role.display_name()),
                |r| r.get(0),
            )
            .optional()?,
        None => None,
    };
    Ok(own.unwrap_or(match role {
        RoleKind::Admin => 1,
        RoleKind::Teacher => 2,
        RoleKind::Parent => 3,
        RoleKind::Student => 4,
    }))
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: Option<String>,
    pub role: RoleKind,
    pub tenant_id: Option<String>,
}

pub fn create_user(conn: &Connection, input: &NewUser) -> Result<UserRecord, ProvisionError> {
    let email = input.email.trim().to_ascii_lowercase();
    if !email.contains('@') {
        return Err(ProvisionError::InvalidInput(format!("invalid email: {email:?}")));
    }
    let backend = SqliteBackend::new(conn);
    if let Some(t) = input.tenant_id.as_deref() {
        if backend.find_tenant(t)?.is_none() {
            return Err(ProvisionError::NotFound {
                what: "tenant",
                key: t.to_string(),
            });
        }
    }
    let taken: Option<String> = conn
        .query_row("SELECT id FROM users WHERE email = ?", [&email], |r| r.get(0))
        .optional()?;
    if taken.is_some() {
        return Err(ProvisionError::Conflict(format!("email already registered: {email}")));
    }

    let user = UserRecord {
        id: Uuid::new_v4().to_string(),
        email,
        full_name: input.full_name.clone(),
        role_id: Some(role_id_for(conn, input.tenant_id.as_deref(), input.role)?),
        tenant_id: input.tenant_id.clone(),
    };
    conn.execute(
        "INSERT INTO users(id, email, full_name, role_id, tenant_id, created_at) VALUES(?, ?, ?, ?, ?, ?)",
        (
            &user.id,
            &user.email,
            &user.full_name,
            user.role_id,
            &user.tenant_id,
            now(),
        ),
    )?;
    info!(user_id = %user.id, role = input.role.display_name(), tenant_id = ?user.tenant_id, "user created");
    Ok(user)
}

pub fn link_guardian(conn: &Connection, user_id: &str, student_id: &str) -> Result<GuardianLink, ProvisionError> {
    let backend = SqliteBackend::new(conn);
    if backend.find_user(user_id)?.is_none() {
        return Err(ProvisionError::NotFound {
            what: "user",
            key: user_id.to_string(),
        });
    }
    let tenant_id: Option<String> = conn
        .query_row("SELECT tenant_id FROM students WHERE id = ?", [student_id], |r| r.get(0))
        .optional()?;
    let Some(tenant_id) = tenant_id else {
        return Err(ProvisionError::NotFound {
            what: "student",
            key: student_id.to_string(),
        });
    };
    conn.execute(
        "INSERT OR IGNORE INTO guardian_links(user_id, student_id, created_at) VALUES(?, ?, ?)",
        (user_id, student_id, now()),
    )?;
    info!(user_id, student_id, tenant_id = %tenant_id, "guardian linked");
    Ok(GuardianLink {
        student_id: student_id.to_string(),
        tenant_id,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolationReport {
    pub user_id: String,
    pub email: String,
    pub previous_tenant_id: Option<String>,
    pub new_tenant: Tenant,
    pub role: RoleKind,
    pub roles_created: usize,
    pub school_profile_id: String,
    pub reauth_required: bool,
    pub next_steps: Vec<&'static str>,
}

/// Moves a user whose account leaked into another school onto a fresh
/// tenant of their own. All or nothing.
pub fn isolate_user(conn: &Connection, email: &str, school_name: &str) -> Result<IsolationReport, ProvisionError> {
    let email = email.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(ProvisionError::InvalidInput("email must not be empty".into()));
    }
    let tx = conn.unchecked_transaction()?;

    let found: Option<(String, Option<i64>, Option<String>)> = tx
        .query_row(
            "SELECT id, role_id, tenant_id FROM users WHERE LOWER(email) = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((user_id, role_id, previous_tenant_id)) = found else {
        warn!(email = %email, "isolation requested for unknown user");
        return Err(ProvisionError::NotFound {
            what: "user",
            key: email,
        });
    };
    info!(user_id = %user_id, previous_tenant_id = ?previous_tenant_id, "isolating user");

    let backend = SqliteBackend::new(&tx);
    let stored = match role_id {
        Some(id) => backend.role_name(id)?,
        None => None,
    };
    let role = RoleKind::resolve(stored.as_deref(), role_id).unwrap_or(RoleKind::Admin);

    let tenant = insert_tenant(
        &tx,
        &NewTenant {
            name: school_name.to_string(),
            contact_email: Some(email.clone()),
            ..NewTenant::default()
        },
    )?;
    info!(tenant_id = %tenant.id, "created isolated tenant");

    let new_role_id = role_id_for(&tx, Some(&tenant.id), role)?;
    tx.execute(
        "UPDATE users SET tenant_id = ?, role_id = ? WHERE id = ?",
        (&tenant.id, new_role_id, &user_id),
    )?;

    let school_profile_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO school_details(id, tenant_id, name, contact_email, school_code, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &school_profile_id,
            &tenant.id,
            &tenant.name,
            &email,
            school_code(&tenant.name),
            now(),
        ),
    )?;

    tx.commit()?;
    info!(user_id = %user_id, new_tenant_id = %tenant.id, "user isolated; re-authentication required");

    Ok(IsolationReport {
        user_id,
        email,
        previous_tenant_id,
        new_tenant: tenant,
        role,
        roles_created: RoleKind::ALL.len(),
        school_profile_id,
        reauth_required: true,
        next_steps: vec![
            "Sign out of every device",
            "Clear cached app data so a fresh session token is issued",
            "Sign back in to load the new school assignment",
        ],
    })
}
