use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
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

const METHODS: [&str; 19] = [
    "tenants.create",
    "tenants.setStatus",
    "users.create",
    "guardians.link",
    "tenant.validateAccess",
    "tenant.validateData",
    "records.select",
    "records.insert",
    "records.update",
    "records.delete",
    "fees.overview",
    "fees.studentBreakdown",
    "fees.recentPayments",
    "fees.recordPayment",
    "fees.cacheStats",
    "fees.cacheClear",
    "expenses.breakdown",
    "remediation.isolateUser",
    "health",
];

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("schoold-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["version"], json!(env!("CARGO_PKG_VERSION")));
    assert!(health["workspacePath"].is_null());
    assert_eq!(health["config"]["aggregateMaxEntries"], json!(512));
    assert_eq!(health["config"]["exemptRoles"], json!(["parent"]));

    // Before a workspace is open, data methods answer with a proper error.
    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "tenants.create",
        json!({ "name": "Too Early" }),
    );
    assert_eq!(error_code(&early), "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("schoold.sqlite3").exists());

    for (i, method) in METHODS.iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("m{i}"), method, json!({}));
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            assert_ne!(
                error_code(&resp),
                "not_implemented",
                "unexpected unknown method for {}",
                method
            );
        }
    }

    let unknown = request(&mut stdin, &mut reader, "4", "grades.compute", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse reply");
    assert_eq!(value["error"]["code"], json!("bad_json"));

    // The loop keeps serving after a bad line.
    let _ = request_ok(&mut stdin, &mut reader, "5", "health", json!({}));
}

#[test]
fn invalid_configuration_fails_startup() {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let output = Command::new(exe)
        .env("SCHOOLD_AGGREGATE_MAX_ENTRIES", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("run schoold");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SCHOOLD_AGGREGATE_MAX_ENTRIES"), "{stderr}");
}

#[test]
fn environment_overrides_show_up_in_health() {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env("SCHOOLD_AGGREGATE_TTL_SECS", "5")
        .env("SCHOOLD_VALIDATION_TTL_SECS", "0")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let mut stdin = child.stdin.take().expect("child stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("child stdout"));

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["config"]["aggregateTtlSecs"], json!(5));
    assert_eq!(health["config"]["validationTtlSecs"], json!(0));
}
