use serde_json::json;

use crate::ipc::error::{err, ok, provision_err};
use crate::ipc::helpers::{db_conn, opt_str_param, required_str};
use crate::ipc::types::{AppState, Request};
use crate::remediation::{self, NewTenant, NewUser};
use crate::store::SqliteBackend;
use crate::tenant::{validate_data_tenancy, AccessGrant, RoleKind, TenantStatus};

fn parse_status(req: &Request, raw: Option<String>) -> Result<Option<TenantStatus>, serde_json::Value> {
    match raw {
        None => Ok(None),
        Some(s) => TenantStatus::parse(&s).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("status must be active, inactive or suspended (got {s:?})"),
                None,
            )
        }),
    }
}

fn handle_tenants_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let contact_email = match opt_str_param(req, "contactEmail") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subscription_plan = match opt_str_param(req, "subscriptionPlan") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match opt_str_param(req, "status").and_then(|s| parse_status(req, s)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input = NewTenant {
        name,
        contact_email,
        status,
        subscription_plan,
    };
    match remediation::provision_tenant(conn, &input) {
        Ok(tenant) => ok(&req.id, json!(tenant)),
        Err(e) => provision_err(&req.id, &e),
    }
}

fn handle_tenants_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let tenant_id = match required_str(req, "tenantId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match opt_str_param(req, "status").and_then(|s| parse_status(req, s)) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing status", None),
        Err(e) => return e,
    };
    let result = {
        let conn = match db_conn(state, req) {
            Ok(c) => c,
            Err(e) => return e,
        };
        remediation::set_tenant_status(conn, &tenant_id, status)
    };
    match result {
        Ok(tenant) => {
            state.validator.forget_tenant(&tenant_id);
            ok(&req.id, json!(tenant))
        }
        Err(e) => provision_err(&req.id, &e),
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(role) = RoleKind::parse(&role) else {
        return err(
            &req.id,
            "bad_params",
            format!("role must be admin, teacher, parent or student (got {role:?})"),
            None,
        );
    };
    let full_name = match opt_str_param(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tenant_id = match opt_str_param(req, "tenantId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input = NewUser {
        email,
        full_name,
        role,
        tenant_id,
    };
    match remediation::create_user(conn, &input) {
        Ok(user) => ok(&req.id, json!(user)),
        Err(e) => provision_err(&req.id, &e),
    }
}

fn handle_guardians_link(state: &mut AppState, req: &Request) -> serde_json::Value {
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let result = {
        let conn = match db_conn(state, req) {
            Ok(c) => c,
            Err(e) => return e,
        };
        remediation::link_guardian(conn, &user_id, &student_id)
    };
    match result {
        Ok(link) => {
            // A cached guardian scope would miss the new student.
            state.validator.forget_user(&user_id);
            ok(&req.id, json!(link))
        }
        Err(e) => provision_err(&req.id, &e),
    }
}

fn handle_validate_access(state: &mut AppState, req: &Request) -> serde_json::Value {
    let user_id = match opt_str_param(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tenant_id = match opt_str_param(req, "tenantId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let context = match opt_str_param(req, "context") {
        Ok(v) => v.unwrap_or_else(|| "tenant.validateAccess".to_string()),
        Err(e) => return e,
    };
    let AppState { db, validator, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let backend = SqliteBackend::new(conn);
    match validator.validate(&backend, user_id.as_deref(), tenant_id.as_deref(), &context) {
        Ok(grant) => {
            let (kind, role) = match &grant {
                AccessGrant::Member { role, .. } => ("member", *role),
                AccessGrant::Guardian { .. } => ("guardian", None),
            };
            ok(
                &req.id,
                json!({
                    "isValid": true,
                    "kind": kind,
                    "tenant": grant.tenant(),
                    "role": role,
                    "scope": grant.guardian_scope(),
                    "error": null,
                }),
            )
        }
        Err(e) => ok(
            &req.id,
            json!({
                "isValid": false,
                "tenant": null,
                "scope": null,
                "error": {
                    "code": e.code(),
                    "message": e.to_string(),
                    "alertTitle": e.alert_title(),
                },
            }),
        ),
    }
}

/// Re-checks rows a caller already holds. Absent `data` is reported as
/// invalid rather than as a parameter error.
fn handle_validate_data(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let tenant_id = match required_str(req, "tenantId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let context = match opt_str_param(req, "context") {
        Ok(v) => v.unwrap_or_else(|| "tenant.validateData".to_string()),
        Err(e) => return e,
    };
    let is_valid = validate_data_tenancy(req.params.get("data"), &tenant_id, &context);
    ok(&req.id, json!({ "isValid": is_valid }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tenants.create" => Some(handle_tenants_create(state, req)),
        "tenants.setStatus" => Some(handle_tenants_set_status(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        "guardians.link" => Some(handle_guardians_link(state, req)),
        "tenant.validateAccess" => Some(handle_validate_access(state, req)),
        "tenant.validateData" => Some(handle_validate_data(state, req)),
        _ => None,
    }
}
