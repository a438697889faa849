use serde_json::json;

use crate::remediation::ProvisionError;
use crate::tenant::{QueryError, TenantError};

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Collapses a `*_value` handler result into a response.
pub fn respond(req_id: &str, result: Result<serde_json::Value, serde_json::Value>) -> serde_json::Value {
    match result {
        Ok(v) => ok(req_id, v),
        Err(e) => e,
    }
}

pub fn tenant_err(id: &str, e: &TenantError) -> serde_json::Value {
    err(
        id,
        e.code(),
        e.to_string(),
        Some(json!({
            "alertTitle": e.alert_title(),
            "securityIncident": e.is_security_incident(),
        })),
    )
}

pub fn query_err(id: &str, table: &str, e: &QueryError) -> serde_json::Value {
    err(
        id,
        e.code(),
        e.to_string(),
        Some(json!({ "alertTitle": "Error", "table": table })),
    )
}

pub fn provision_err(id: &str, e: &ProvisionError) -> serde_json::Value {
    err(id, e.code(), e.to_string(), None)
}
