#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

/// A fixed date inside the 2024-2025 school year (default calendar).
pub const TODAY: &str = "2025-03-10";

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_bulletind");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env("BULLETIND_LOG", "off")
        .spawn()
        .expect("spawn bulletind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// Returns the `error` object of a failed response.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or(serde_json::Value::Null)
}

pub fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

/// Two classes' worth of a finished year: 6A has three students, one with
/// a mobile correction, and 6B has one.
pub fn past_year_dataset() -> serde_json::Value {
    json!({
        "students": [
            { "matricule": "S1", "nom": "Diallo", "prenom": "Awa", "classe": "6A", "genre": "F",
              "notes": { "MATH": 12.0, "FR": 15.0 } },
            { "matricule": "S2", "nom": "Ba", "prenom": "Omar", "classe": "6A", "genre": "M",
              "notes": { "MATH": 8.0 } },
            { "matricule": "S3", "nom": "Sow", "prenom": "Lina", "classe": "6A", "genre": "F" },
            { "matricule": "S4", "nom": "Fall", "prenom": "Ibou", "classe": "6B", "genre": "M",
              "notes": { "MATH": 9.0, "FR": 6.0 } }
        ],
        "subjects": [
            { "code": "MATH", "name": "Mathematiques", "coefficient": 4.0 },
            { "code": "FR", "name": "Francais", "coefficient": 2.0 }
        ],
        "gradeObservations": [
            { "kind": "mobileSubmission", "student": "S2", "subject": "MATH", "score": 16.0,
              "submittedAt": "2023-03-01T10:00:00Z" }
        ]
    })
}
