use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::info;
use uuid::Uuid;

use crate::cache::{Aggregate, CacheKey, FEE_OVERVIEW};
use crate::calc::decode_rows;
use crate::calc::fees::{
    fee_overview, normalize_academic_year, recent_payments, student_fee_breakdown, DiscountRow,
    FeeInputs, FeeStructureRow, PaymentRow, StudentRow,
};
use crate::calc::ordering::ClassOrdering;
use crate::ipc::error::{err, ok, query_err, respond, tenant_err};
use crate::ipc::helpers::{
    authorize, db_conn, fetch_rows, grant_tenant, opt_str_param, parse_opt_usize, require_member,
    required_str, select_all,
};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteBackend;
use crate::tenant::{ensure_rows_belong, AccessGrant, Row, TenantQuery};

const DEFAULT_RECENT_LIMIT: usize = 20;

fn decode<T: serde::de::DeserializeOwned>(req: &Request, what: &str, rows: Vec<Row>) -> Result<Vec<T>, JsonValue> {
    decode_rows(what, rows).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn load_table<T: serde::de::DeserializeOwned>(
    req: &Request,
    conn: &rusqlite::Connection,
    tenant_id: &str,
    table: &str,
    context: &str,
) -> Result<Vec<T>, JsonValue> {
    let query = select_all(req, tenant_id, table)?;
    let rows = fetch_rows(req, conn, &query, context)?;
    decode(req, table, rows)
}

fn overview_value(state: &mut AppState, req: &Request) -> Result<JsonValue, JsonValue> {
    let context = "fees.overview";
    let grant = authorize(state, req, context)?;
    require_member(req, &grant, "the fee overview")?;
    let tenant_id = grant_tenant(req, &grant)?;
    let academic_year = opt_str_param(req, "academicYear")?.map(|y| normalize_academic_year(&y));
    let ordering = match opt_str_param(req, "order")? {
        None => ClassOrdering::default(),
        Some(s) => ClassOrdering::parse(&s).ok_or_else(|| {
            err(&req.id, "bad_params", "order must be outstanding or natural", None)
        })?,
    };

    let key = CacheKey::new(
        &tenant_id,
        FEE_OVERVIEW,
        format!("{}|{:?}", academic_year.as_deref().unwrap_or("*"), ordering),
    );
    if let Some(Aggregate::Fees(overview)) = state.aggregates.get(&key) {
        info!(tenant_id = %tenant_id, "fee overview served from cache");
        return Ok(json!({ "cached": true, "overview": overview }));
    }

    let overview = {
        let conn = db_conn(state, req)?;
        let inputs = FeeInputs {
            classes: load_table(req, conn, &tenant_id, "classes", context)?,
            students: load_table(req, conn, &tenant_id, "students", context)?,
            fee_structures: load_table(req, conn, &tenant_id, "fee_structure", context)?,
            payments: load_table(req, conn, &tenant_id, "student_fees", context)?,
            discounts: load_table(req, conn, &tenant_id, "student_discounts", context)?,
        };
        fee_overview(&inputs, academic_year.as_deref(), ordering)
    };
    state.aggregates.insert(key, Aggregate::Fees(overview.clone()));
    Ok(json!({ "cached": false, "overview": overview }))
}

fn student_breakdown_value(state: &mut AppState, req: &Request) -> Result<JsonValue, JsonValue> {
    let context = "fees.studentBreakdown";
    let student_id = required_str(req, "studentId")?;
    let grant = authorize(state, req, context)?;
    let tenant_id = grant_tenant(req, &grant)?;
    if let Some(scope) = grant.guardian_scope() {
        scope
            .ensure_covers(&tenant_id, &student_id)
            .map_err(|e| tenant_err(&req.id, &e))?;
    }
    let academic_year = opt_str_param(req, "academicYear")?;

    let conn = db_conn(state, req)?;
    let by_student = |table: &str, column: &str| -> Result<TenantQuery, JsonValue> {
        select_all(req, &tenant_id, table)?
            .eq(column, student_id.as_str())
            .map_err(|e| query_err(&req.id, table, &e))
    };
    let students: Vec<StudentRow> = decode(
        req,
        "students",
        fetch_rows(req, conn, &by_student("students", "id")?, context)?,
    )?;
    let Some(student) = students.first() else {
        return Err(err(&req.id, "not_found", "student not found", None));
    };
    // Class-level rows have no student id, so the whole table is read and
    // narrowed by the fold.
    let fees: Vec<FeeStructureRow> = load_table(req, conn, &tenant_id, "fee_structure", context)?;
    let payments: Vec<PaymentRow> = decode(
        req,
        "student_fees",
        fetch_rows(req, conn, &by_student("student_fees", "student_id")?, context)?,
    )?;
    let discounts: Vec<DiscountRow> = decode(
        req,
        "student_discounts",
        fetch_rows(req, conn, &by_student("student_discounts", "student_id")?, context)?,
    )?;
    let breakdown = student_fee_breakdown(student, &fees, &payments, &discounts, academic_year.as_deref());
    Ok(json!(breakdown))
}

fn recent_payments_value(state: &mut AppState, req: &Request) -> Result<JsonValue, JsonValue> {
    let context = "fees.recentPayments";
    let grant = authorize(state, req, context)?;
    let tenant_id = grant_tenant(req, &grant)?;
    let limit = parse_opt_usize(req.params.get("limit"))
        .map_err(|m| err(&req.id, "bad_params", format!("limit {m}"), None))?
        .unwrap_or(DEFAULT_RECENT_LIMIT);

    let (student_query, payment_query) = match &grant {
        AccessGrant::Member { .. } => (
            select_all(req, &tenant_id, "students")?,
            select_all(req, &tenant_id, "student_fees")?,
        ),
        AccessGrant::Guardian { scope, .. } => {
            let scoped = |table: &str| {
                scope
                    .select(&tenant_id, table, "*")
                    .map_err(|e| tenant_err(&req.id, &e))
            };
            (scoped("students")?, scoped("student_fees")?)
        }
    };
    let conn = db_conn(state, req)?;
    let students: Vec<StudentRow> = decode(req, "students", fetch_rows(req, conn, &student_query, context)?)?;
    let payments: Vec<PaymentRow> = decode(req, "student_fees", fetch_rows(req, conn, &payment_query, context)?)?;
    Ok(json!(recent_payments(&students, &payments, limit)))
}

fn record_payment_value(state: &mut AppState, req: &Request) -> Result<JsonValue, JsonValue> {
    let context = "fees.recordPayment";
    let grant = authorize(state, req, context)?;
    require_member(req, &grant, "recording payments")?;
    let tenant_id = grant_tenant(req, &grant)?;
    let student_id = required_str(req, "studentId")?;
    let fee_component = required_str(req, "feeComponent")?;
    let amount_paid = match req.params.get("amountPaid").and_then(|v| v.as_f64()) {
        Some(v) if v > 0.0 && v.is_finite() => v,
        _ => {
            return Err(err(
                &req.id,
                "bad_params",
                "amountPaid must be a positive number",
                None,
            ))
        }
    };
    let payment_date = opt_str_param(req, "paymentDate")?
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
    let payment_mode = opt_str_param(req, "paymentMode")?.unwrap_or_else(|| "cash".to_string());
    let academic_year = opt_str_param(req, "academicYear")?.map(|y| normalize_academic_year(&y));
    let receipt_number = opt_str_param(req, "receiptNumber")?;
    let remarks = opt_str_param(req, "remarks")?;

    let output = {
        let conn = db_conn(state, req)?;
        let student_query = select_all(req, &tenant_id, "students")?
            .eq("id", student_id.as_str())
            .map_err(|e| query_err(&req.id, "students", &e))?;
        if fetch_rows(req, conn, &student_query, context)?.is_empty() {
            return Err(err(&req.id, "not_found", "student not found", None));
        }

        let row = json!({
            "id": Uuid::new_v4().to_string(),
            "student_id": student_id,
            "fee_component": fee_component,
            "amount_paid": amount_paid,
            "payment_date": payment_date,
            "payment_mode": payment_mode,
            "academic_year": academic_year,
            "receipt_number": receipt_number,
            "remarks": remarks,
        });
        let JsonValue::Object(row) = row else {
            return Err(err(&req.id, "bad_params", "payment row must be an object", None));
        };
        let insert = TenantQuery::new(&tenant_id, "student_fees")
            .and_then(|q| q.insert(vec![row]))
            .map_err(|e| query_err(&req.id, "student_fees", &e))?;
        insert
            .execute(&SqliteBackend::new(conn))
            .map_err(|e| query_err(&req.id, "student_fees", &e))?
    };
    ensure_rows_belong(&output.rows, &tenant_id, context).map_err(|e| tenant_err(&req.id, &e))?;
    let removed = state.aggregates.clear_tenant(&tenant_id);
    info!(tenant_id = %tenant_id, student_id = %student_id, removed, "payment recorded");
    let payment = output.rows.into_iter().next().map(JsonValue::Object);
    Ok(json!({ "payment": payment }))
}

fn handle_cache_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!(state.aggregates.stats()))
}

fn cache_clear_value(state: &mut AppState, req: &Request) -> Result<JsonValue, JsonValue> {
    let context = "fees.cacheClear";
    required_str(req, "tenantId")?;
    let grant = authorize(state, req, context)?;
    require_member(req, &grant, "clearing cached aggregates")?;
    let tenant_id = grant_tenant(req, &grant)?;
    let removed = state.aggregates.clear_tenant(&tenant_id);
    info!(tenant_id = %tenant_id, removed, "aggregate cache cleared");
    Ok(json!({ "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.overview" => Some(respond(&req.id, overview_value(state, req))),
        "fees.studentBreakdown" => Some(respond(&req.id, student_breakdown_value(state, req))),
        "fees.recentPayments" => Some(respond(&req.id, recent_payments_value(state, req))),
        "fees.recordPayment" => Some(respond(&req.id, record_payment_value(state, req))),
        "fees.cacheStats" => Some(handle_cache_stats(state, req)),
        "fees.cacheClear" => Some(respond(&req.id, cache_clear_value(state, req))),
        _ => None,
    }
}
