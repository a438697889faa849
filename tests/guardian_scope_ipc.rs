use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "expected failure: {}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn spawn_sidecar_with_env(vars: &[(&str, &str)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut cmd = Command::new(exe);
    for (k, v) in vars {
        cmd.env(k, v);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

struct Fixture {
    school_a: String,
    school_b: String,
    school_c: String,
    parent_id: String,
    lonely_parent_id: String,
}

/// Schools A and B each hold students; the parent is linked to s1 (A) and s9 (B).
fn setup(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &Path) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut tenants = Vec::new();
    for tag in ["a", "b", "c"] {
        let t = request_ok(
            stdin,
            reader,
            &format!("setup-t-{tag}"),
            "tenants.create",
            json!({ "name": format!("School {tag}") }),
        );
        let tenant_id = t["id"].as_str().expect("tenant id").to_string();
        let admin = request_ok(
            stdin,
            reader,
            &format!("setup-u-{tag}"),
            "users.create",
            json!({ "email": format!("admin@{tag}.test"), "role": "admin", "tenantId": tenant_id }),
        );
        tenants.push((tenant_id, admin["id"].as_str().expect("admin id").to_string()));
    }
    let students = [
        (0, json!([{ "id": "s1", "name": "Asha" }, { "id": "s2", "name": "Ben" }])),
        (1, json!([{ "id": "s9", "name": "Zara" }])),
    ];
    for (i, rows) in students {
        let (tenant_id, admin_id) = &tenants[i];
        let _ = request_ok(
            stdin,
            reader,
            &format!("setup-s-{i}"),
            "records.insert",
            json!({ "userId": admin_id, "tenantId": tenant_id, "table": "students", "rows": rows }),
        );
    }
    let parent = request_ok(
        stdin,
        reader,
        "setup-p",
        "users.create",
        json!({ "email": "parent@home.test", "role": "parent" }),
    );
    let parent_id = parent["id"].as_str().expect("parent id").to_string();
    for student in ["s1", "s9"] {
        let link = request_ok(
            stdin,
            reader,
            &format!("setup-l-{student}"),
            "guardians.link",
            json!({ "userId": parent_id, "studentId": student }),
        );
        assert_eq!(link["studentId"], json!(student));
    }
    let lonely = request_ok(
        stdin,
        reader,
        "setup-p2",
        "users.create",
        json!({ "email": "lonely@home.test", "role": "parent" }),
    );
    Fixture {
        school_a: tenants[0].0.clone(),
        school_b: tenants[1].0.clone(),
        school_c: tenants[2].0.clone(),
        parent_id,
        lonely_parent_id: lonely["id"].as_str().expect("parent id").to_string(),
    }
}

#[test]
fn guardian_reads_are_narrowed_to_linked_students() {
    let workspace = temp_dir("schoold-guardian-scope");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let access = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "tenant.validateAccess",
        json!({ "userId": fx.parent_id, "tenantId": fx.school_a }),
    );
    assert_eq!(access["isValid"], json!(true));
    assert_eq!(access["kind"], json!("guardian"));
    assert_eq!(access["scope"]["links"].as_array().map(Vec::len), Some(2));

    let in_a = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.select",
        json!({ "userId": fx.parent_id, "tenantId": fx.school_a, "table": "students" }),
    );
    assert_eq!(in_a["count"], json!(1));
    assert_eq!(in_a["rows"][0]["id"], json!("s1"));

    let in_b = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "records.select",
        json!({ "userId": fx.parent_id, "tenantId": fx.school_b, "table": "students" }),
    );
    assert_eq!(in_b["count"], json!(1));
    assert_eq!(in_b["rows"][0]["id"], json!("s9"));

    let unlinked_school = request(
        &mut stdin,
        &mut reader,
        "4",
        "records.select",
        json!({ "userId": fx.parent_id, "tenantId": fx.school_c, "table": "students" }),
    );
    assert_eq!(error_code(&unlinked_school), "access_denied");

    let other_table = request(
        &mut stdin,
        &mut reader,
        "5",
        "records.select",
        json!({ "userId": fx.parent_id, "tenantId": fx.school_a, "table": "school_expenses" }),
    );
    assert_eq!(error_code(&other_table), "access_denied");

    let sibling = request(
        &mut stdin,
        &mut reader,
        "6",
        "fees.studentBreakdown",
        json!({ "userId": fx.parent_id, "tenantId": fx.school_a, "studentId": "s2" }),
    );
    assert_eq!(error_code(&sibling), "access_denied");

    let own = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "fees.studentBreakdown",
        json!({ "userId": fx.parent_id, "tenantId": fx.school_a, "studentId": "s1" }),
    );
    assert_eq!(own["studentName"], json!("Asha"));

    let overview = request(
        &mut stdin,
        &mut reader,
        "8",
        "fees.overview",
        json!({ "userId": fx.parent_id, "tenantId": fx.school_a }),
    );
    assert_eq!(error_code(&overview), "access_denied");
}

#[test]
fn guardians_cannot_write_and_need_links() {
    let workspace = temp_dir("schoold-guardian-write");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let write = request(
        &mut stdin,
        &mut reader,
        "1",
        "records.update",
        json!({
            "userId": fx.parent_id,
            "tenantId": fx.school_a,
            "table": "students",
            "patch": { "name": "Changed" },
            "filters": [{ "op": "eq", "column": "id", "value": "s1" }],
        }),
    );
    assert_eq!(error_code(&write), "access_denied");

    let pay = request(
        &mut stdin,
        &mut reader,
        "2",
        "fees.recordPayment",
        json!({
            "userId": fx.parent_id,
            "tenantId": fx.school_a,
            "studentId": "s1",
            "feeComponent": "Tuition",
            "amountPaid": 10,
        }),
    );
    assert_eq!(error_code(&pay), "access_denied");

    let lonely = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "tenant.validateAccess",
        json!({ "userId": fx.lonely_parent_id, "tenantId": fx.school_a }),
    );
    assert_eq!(lonely["isValid"], json!(false));
    assert_eq!(lonely["error"]["code"], json!("access_denied"));
}

#[test]
fn exemption_can_be_switched_off() {
    let workspace = temp_dir("schoold-guardian-no-exempt");
    let (_child, mut stdin, mut reader) = spawn_sidecar_with_env(&[("SCHOOLD_EXEMPT_ROLES", "none")]);
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["config"]["exemptRoles"], json!([]));

    // Without exemption a parent is an ordinary user with no school.
    let access = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "tenant.validateAccess",
        json!({ "userId": fx.parent_id, "tenantId": fx.school_a }),
    );
    assert_eq!(access["isValid"], json!(false));
    assert_eq!(access["error"]["code"], json!("access_denied"));
}
