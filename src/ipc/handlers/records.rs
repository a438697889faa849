use serde_json::{json, Value as JsonValue};
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::{err, query_err, respond, tenant_err};
use crate::ipc::helpers::{
    authorize, db_conn, fetch_rows, grant_tenant, opt_str_param, parse_bool, parse_opt_usize,
    require_member, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteBackend;
use crate::tenant::{ensure_rows_belong, rows_from_value, AccessGrant, Filter, Order, QueryError, TenantError, TenantQuery};

/// Tables a guardian may read, all keyed by student.
const GUARDIAN_TABLES: [&str; 3] = ["students", "student_fees", "student_discounts"];

fn table_param(req: &Request) -> Result<String, JsonValue> {
    let table = required_str(req, "table")?;
    if !db::is_tenant_table(&table) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{table} is not a tenant-scoped table"),
            None,
        ));
    }
    Ok(table)
}

fn parse_filters(req: &Request) -> Result<Vec<Filter>, JsonValue> {
    match req.params.get("filters") {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| err(&req.id, "bad_params", format!("filters: {e}"), None)),
    }
}

/// `order` is one `{column, ascending?}` object or an array of them.
fn parse_order(req: &Request) -> Result<Vec<Order>, JsonValue> {
    let parsed = match req.params.get("order") {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Array(items)) => serde_json::from_value(JsonValue::Array(items.clone())),
        Some(v) => serde_json::from_value::<Order>(v.clone()).map(|o| vec![o]),
    };
    parsed.map_err(|e| err(&req.id, "bad_params", format!("order: {e}"), None))
}

fn apply_filters(req: &Request, table: &str, mut query: TenantQuery, filters: Vec<Filter>) -> Result<TenantQuery, JsonValue> {
    for f in filters {
        query = query.filter(f).map_err(|e| query_err(&req.id, table, &e))?;
    }
    Ok(query)
}

fn read_query(req: &Request, grant: &AccessGrant, tenant_id: &str, table: &str) -> Result<TenantQuery, JsonValue> {
    let columns = opt_str_param(req, "columns")?.unwrap_or_else(|| "*".to_string());
    let query = match grant {
        AccessGrant::Member { .. } => TenantQuery::new(tenant_id, table)
            .and_then(|q| q.select(&columns))
            .map_err(|e| query_err(&req.id, table, &e))?,
        AccessGrant::Guardian { scope, .. } => {
            if !GUARDIAN_TABLES.contains(&table) {
                return Err(tenant_err(
                    &req.id,
                    &TenantError::access_denied(format!("guardians cannot read {table}")),
                ));
            }
            scope
                .select(tenant_id, table, &columns)
                .map_err(|e| tenant_err(&req.id, &e))?
        }
    };
    let mut query = apply_filters(req, table, query, parse_filters(req)?)?;
    let q_err = |e: QueryError| query_err(&req.id, table, &e);
    for o in parse_order(req)? {
        query = query.order(&o.column, o.ascending).map_err(q_err)?;
    }
    let limit = parse_opt_usize(req.params.get("limit"))
        .map_err(|m| err(&req.id, "bad_params", format!("limit {m}"), None))?;
    if let Some(n) = limit {
        query = query.limit(n).map_err(q_err)?;
    }
    if let Some(range) = req.params.get("range").filter(|v| !v.is_null()) {
        let from = parse_opt_usize(range.get("from")).ok().flatten();
        let to = parse_opt_usize(range.get("to")).ok().flatten();
        let (Some(from), Some(to)) = (from, to) else {
            return Err(err(&req.id, "bad_params", "range needs integer from and to", None));
        };
        query = query.range(from, to).map_err(q_err)?;
    }
    let single = parse_bool(req.params.get("single"), false)
        .map_err(|m| err(&req.id, "bad_params", format!("single {m}"), None))?;
    if single {
        query = query.single().map_err(q_err)?;
    }
    Ok(query)
}

fn select_value(state: &mut AppState, req: &Request) -> Result<JsonValue, JsonValue> {
    let table = table_param(req)?;
    let context = format!("records.select:{table}");
    let grant = authorize(state, req, &context)?;
    let tenant_id = grant_tenant(req, &grant)?;
    let query = read_query(req, &grant, &tenant_id, &table)?;
    let conn = db_conn(state, req)?;
    let rows = fetch_rows(req, conn, &query, &context)?;
    Ok(json!({ "count": rows.len(), "rows": rows }))
}

/// Runs a write, checks what came back, and drops the tenant's aggregates
/// when the table feeds them.
fn run_write(state: &mut AppState, req: &Request, query: &TenantQuery, context: &str) -> Result<JsonValue, JsonValue> {
    let output = {
        let conn = db_conn(state, req)?;
        query
            .execute(&SqliteBackend::new(conn))
            .map_err(|e| query_err(&req.id, query.table(), &e))?
    };
    ensure_rows_belong(&output.rows, query.tenant_id(), context).map_err(|e| tenant_err(&req.id, &e))?;
    if db::AGGREGATE_SOURCES.contains(&query.table()) {
        let removed = state.aggregates.clear_tenant(query.tenant_id());
        info!(tenant_id = query.tenant_id(), table = query.table(), removed, "aggregate cache invalidated");
    }
    Ok(json!({ "count": output.count(), "rows": output.rows }))
}

fn write_grant(state: &mut AppState, req: &Request, context: &str) -> Result<String, JsonValue> {
    let grant = authorize(state, req, context)?;
    require_member(req, &grant, "writing records")?;
    grant_tenant(req, &grant)
}

fn insert_value(state: &mut AppState, req: &Request) -> Result<JsonValue, JsonValue> {
    let table = table_param(req)?;
    let context = format!("records.insert:{table}");
    let tenant_id = write_grant(state, req, &context)?;
    let Some(raw) = req.params.get("rows").cloned() else {
        return Err(err(&req.id, "bad_params", "missing rows", None));
    };
    let mut rows = rows_from_value(&table, raw).map_err(|e| query_err(&req.id, &table, &e))?;
    for row in &mut rows {
        let missing = row.get("id").map(JsonValue::is_null).unwrap_or(true);
        if missing {
            row.insert("id".into(), json!(Uuid::new_v4().to_string()));
        }
    }
    let query = TenantQuery::new(&tenant_id, &table)
        .and_then(|q| q.insert(rows))
        .map_err(|e| query_err(&req.id, &table, &e))?;
    run_write(state, req, &query, &context)
}

fn require_filters(req: &Request, verb: &str) -> Result<Vec<Filter>, JsonValue> {
    let filters = parse_filters(req)?;
    if filters.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{verb} needs at least one filter"),
            None,
        ));
    }
    Ok(filters)
}

fn update_value(state: &mut AppState, req: &Request) -> Result<JsonValue, JsonValue> {
    let table = table_param(req)?;
    let context = format!("records.update:{table}");
    let tenant_id = write_grant(state, req, &context)?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()).cloned() else {
        return Err(err(&req.id, "bad_params", "patch must be an object", None));
    };
    let filters = require_filters(req, "update")?;
    let query = TenantQuery::new(&tenant_id, &table)
        .and_then(|q| q.update(patch))
        .map_err(|e| query_err(&req.id, &table, &e))?;
    let query = apply_filters(req, &table, query, filters)?;
    run_write(state, req, &query, &context)
}

fn delete_value(state: &mut AppState, req: &Request) -> Result<JsonValue, JsonValue> {
    let table = table_param(req)?;
    let context = format!("records.delete:{table}");
    let tenant_id = write_grant(state, req, &context)?;
    let filters = require_filters(req, "delete")?;
    let query = TenantQuery::new(&tenant_id, &table)
        .and_then(|q| q.delete())
        .map_err(|e| query_err(&req.id, &table, &e))?;
    let query = apply_filters(req, &table, query, filters)?;
    run_write(state, req, &query, &context)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.select" => Some(respond(&req.id, select_value(state, req))),
        "records.insert" => Some(respond(&req.id, insert_value(state, req))),
        "records.update" => Some(respond(&req.id, update_value(state, req))),
        "records.delete" => Some(respond(&req.id, delete_value(state, req))),
        _ => None,
    }
}
