//! Parameter parsing and the validate/fetch steps shared by handler families.

use rusqlite::Connection;
use serde_json::Value as JsonValue;

use crate::ipc::error::{err, query_err, tenant_err};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteBackend;
use crate::tenant::{ensure_rows_belong, AccessGrant, Row, TenantError, TenantQuery};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, JsonValue> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn parse_bool(v: Option<&JsonValue>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

pub fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn parse_opt_usize(v: Option<&JsonValue>) -> Result<Option<usize>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or("must be a non-negative integer or null"),
    }
}

pub fn opt_str_param(req: &Request, key: &str) -> Result<Option<String>, JsonValue> {
    parse_opt_string(req.params.get(key))
        .map_err(|m| err(&req.id, "bad_params", format!("{key} {m}"), None))
}

/// Runs tenant access validation for `params.userId` / `params.tenantId`.
pub fn authorize(state: &mut AppState, req: &Request, context: &str) -> Result<AccessGrant, JsonValue> {
    let user_id = opt_str_param(req, "userId")?;
    let tenant_id = opt_str_param(req, "tenantId")?;
    let AppState { db, validator, .. } = state;
    let Some(conn) = db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let backend = SqliteBackend::new(conn);
    validator
        .validate(&backend, user_id.as_deref(), tenant_id.as_deref(), context)
        .map_err(|e| tenant_err(&req.id, &e))
}

/// Tenant the grant is bound to. Guardians only have one when a tenant was requested.
pub fn grant_tenant(req: &Request, grant: &AccessGrant) -> Result<String, JsonValue> {
    grant
        .tenant()
        .map(|t| t.id.clone())
        .ok_or_else(|| tenant_err(&req.id, &TenantError::NoTenantContext))
}

pub fn require_member(req: &Request, grant: &AccessGrant, what: &str) -> Result<(), JsonValue> {
    if grant.is_member() {
        Ok(())
    } else {
        Err(tenant_err(
            &req.id,
            &TenantError::access_denied(format!("{what} requires school membership")),
        ))
    }
}

pub fn select_all(req: &Request, tenant_id: &str, table: &str) -> Result<TenantQuery, JsonValue> {
    TenantQuery::new(tenant_id, table)
        .and_then(|q| q.select("*"))
        .map_err(|e| query_err(&req.id, table, &e))
}

/// Executes a read and rejects the batch if any row belongs to another tenant.
pub fn fetch_rows(
    req: &Request,
    conn: &Connection,
    query: &TenantQuery,
    context: &str,
) -> Result<Vec<Row>, JsonValue> {
    let backend = SqliteBackend::new(conn);
    let output = query
        .execute(&backend)
        .map_err(|e| query_err(&req.id, query.table(), &e))?;
    ensure_rows_belong(&output.rows, query.tenant_id(), context)
        .map_err(|e| tenant_err(&req.id, &e))?;
    Ok(output.rows)
}
