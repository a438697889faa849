use serde_json::{json, Value as JsonValue};
use tracing::info;

use crate::cache::{Aggregate, CacheKey, EXPENSE_BREAKDOWN};
use crate::calc::decode_rows;
use crate::calc::expenses::{category_breakdown, CategoryRow, ExpensePeriod, ExpenseRow};
use crate::ipc::error::{err, query_err, respond};
use crate::ipc::helpers::{authorize, db_conn, fetch_rows, grant_tenant, opt_str_param, require_member, select_all};
use crate::ipc::types::{AppState, Request};

fn parse_period(req: &Request) -> Result<ExpensePeriod, JsonValue> {
    let month = opt_str_param(req, "month")?;
    let year = opt_str_param(req, "year")?;
    let period = match (month, year) {
        (Some(m), _) => ExpensePeriod::parse_month(&m),
        (None, Some(y)) => ExpensePeriod::parse_year(&y),
        (None, None) => {
            return Err(err(&req.id, "bad_params", "missing month (YYYY-MM) or year (YYYY)", None))
        }
    };
    period.ok_or_else(|| err(&req.id, "bad_params", "month must be YYYY-MM and year YYYY", None))
}

fn breakdown_value(state: &mut AppState, req: &Request) -> Result<JsonValue, JsonValue> {
    let context = "expenses.breakdown";
    let grant = authorize(state, req, context)?;
    require_member(req, &grant, "the expense breakdown")?;
    let tenant_id = grant_tenant(req, &grant)?;
    let period = parse_period(req)?;
    let Some((first, last)) = period.bounds() else {
        return Err(err(&req.id, "bad_params", "period is out of range", None));
    };

    let key = CacheKey::new(&tenant_id, EXPENSE_BREAKDOWN, period.label());
    if let Some(Aggregate::Expenses(report)) = state.aggregates.get(&key) {
        info!(tenant_id = %tenant_id, period = %period.label(), "expense breakdown served from cache");
        return Ok(json!({ "cached": true, "report": report }));
    }

    let report = {
        let conn = db_conn(state, req)?;
        let expense_query = select_all(req, &tenant_id, "school_expenses")?
            .gte("expense_date", first)
            .and_then(|q| q.lte("expense_date", last))
            .map_err(|e| query_err(&req.id, "school_expenses", &e))?;
        let expenses: Vec<ExpenseRow> = decode_rows(
            "school_expenses",
            fetch_rows(req, conn, &expense_query, context)?,
        )
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        let category_query = select_all(req, &tenant_id, "expense_categories")?;
        let categories: Vec<CategoryRow> = decode_rows(
            "expense_categories",
            fetch_rows(req, conn, &category_query, context)?,
        )
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        category_breakdown(period, &expenses, &categories)
    };
    state.aggregates.insert(key, Aggregate::Expenses(report.clone()));
    Ok(json!({ "cached": false, "report": report }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "expenses.breakdown" => Some(respond(&req.id, breakdown_value(state, req))),
        _ => None,
    }
}
