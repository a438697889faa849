//! Post-fetch tenancy check.
//!
//! Runs after a query returns. One foreign row rejects the whole batch.

use serde_json::Value;
use tracing::{error, info, warn};

use super::backend::Row;
use super::error::TenantError;
use super::model::TENANT_COLUMN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenancyReport {
    pub checked: usize,
    pub mismatched: usize,
}

impl TenancyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatched == 0
    }
}

fn belongs_to(item: &Value, expected: &str) -> bool {
    item.get(TENANT_COLUMN).and_then(Value::as_str) == Some(expected)
}

/// Checks a single object or an array of objects. Absent data fails; an
/// empty array passes.
pub fn validate_data_tenancy(data: Option<&Value>, expected_tenant_id: &str, context: &str) -> bool {
    match data {
        None | Some(Value::Null) => {
            warn!(context, "no data to validate");
            false
        }
        Some(Value::Array(items)) => {
            let mismatched = items.iter().filter(|i| !belongs_to(i, expected_tenant_id)).count();
            if mismatched > 0 {
                error!(context, mismatched, expected = expected_tenant_id, "rows with wrong tenant_id");
                return false;
            }
            info!(context, rows = items.len(), "all rows carry the expected tenant_id");
            true
        }
        Some(item) => {
            if belongs_to(item, expected_tenant_id) {
                info!(context, "row carries the expected tenant_id");
                true
            } else {
                error!(
                    context,
                    expected = expected_tenant_id,
                    actual = ?item.get(TENANT_COLUMN),
                    "row has wrong tenant_id"
                );
                false
            }
        }
    }
}

/// Row-slice variant used on fresh query output.
pub fn check_rows(rows: &[Row], expected_tenant_id: &str) -> TenancyReport {
    let mismatched = rows
        .iter()
        .filter(|r| r.get(TENANT_COLUMN).and_then(Value::as_str) != Some(expected_tenant_id))
        .count();
    TenancyReport {
        checked: rows.len(),
        mismatched,
    }
}

/// Fails closed with [`TenantError::DataValidationFailed`].
pub fn ensure_rows_belong(rows: &[Row], expected_tenant_id: &str, context: &str) -> Result<TenancyReport, TenantError> {
    let report = check_rows(rows, expected_tenant_id);
    if report.is_clean() {
        info!(context, rows = report.checked, "post-fetch tenancy check passed");
        Ok(report)
    } else {
        error!(
            context,
            mismatched = report.mismatched,
            checked = report.checked,
            "post-fetch tenancy check failed"
        );
        Err(TenantError::DataValidationFailed {
            context: context.to_string(),
            mismatched: report.mismatched,
        })
    }
}
