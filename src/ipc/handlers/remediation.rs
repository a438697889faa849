use serde_json::json;
use tracing::info;

use crate::ipc::error::{ok, provision_err};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::remediation;

fn handle_isolate_user(state: &mut AppState, req: &Request) -> serde_json::Value {
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_name = match required_str(req, "schoolName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let result = {
        let conn = match db_conn(state, req) {
            Ok(c) => c,
            Err(e) => return e,
        };
        remediation::isolate_user(conn, &email, &school_name)
    };
    match result {
        Ok(report) => {
            let dropped = state.validator.forget_user(&report.user_id);
            if let Some(previous) = report.previous_tenant_id.as_deref() {
                state.aggregates.clear_tenant(previous);
            }
            info!(user_id = %report.user_id, dropped, "cached grants dropped after isolation");
            ok(&req.id, json!(report))
        }
        Err(e) => provision_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "remediation.isolateUser" => Some(handle_isolate_user(state, req)),
        _ => None,
    }
}
