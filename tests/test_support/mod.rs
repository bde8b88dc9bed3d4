#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SESSION: &str = "2024/2025";
pub const TERM: &str = "First";

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
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut child = Command::new(exe)
        .env_remove("RESULTSD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
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
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// One sidecar process with auto-numbered request ids.
pub struct Sidecar {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let (child, stdin, reader) = spawn_sidecar();
        Self {
            _child: child,
            stdin,
            reader,
            next_id: 1,
        }
    }

    /// Spawns a sidecar and selects a workspace for it.
    pub fn with_workspace(workspace: &std::path::Path) -> Self {
        let mut sc = Self::spawn();
        sc.ok("workspace.select", json!({ "path": workspace.to_string_lossy() }));
        sc
    }

    fn id(&mut self) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        id
    }

    pub fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.id();
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn ok(&mut self, method: &str, params: Value) -> Value {
        let id = self.id();
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    /// Asserts failure and returns the error code and the full error object.
    pub fn err(&mut self, method: &str, params: Value) -> (String, Value) {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        let error = value.get("error").cloned().unwrap_or(Value::Null);
        let code = error
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        (code, error)
    }
}

pub fn super_admin() -> Value {
    json!({ "userId": "root", "role": "super_admin" })
}

pub fn admin(user_id: &str, school_id: &str) -> Value {
    json!({ "userId": user_id, "role": "school_admin", "schoolId": school_id })
}

pub fn teacher(user_id: &str, school_id: &str) -> Value {
    json!({ "userId": user_id, "role": "teacher", "schoolId": school_id })
}

pub fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string field {key} in {v}"))
        .to_string()
}

pub fn f64_field(v: &Value, key: &str) -> f64 {
    v.get(key)
        .and_then(|x| x.as_f64())
        .unwrap_or_else(|| panic!("missing number field {key} in {v}"))
}

pub fn i64_field(v: &Value, key: &str) -> i64 {
    v.get(key)
        .and_then(|x| x.as_i64())
        .unwrap_or_else(|| panic!("missing integer field {key} in {v}"))
}

pub struct SeededSchool {
    pub school_id: String,
    pub class_id: String,
    pub subject_ids: Vec<String>,
    /// (student id, admission number)
    pub students: Vec<(String, String)>,
}

impl SeededSchool {
    pub fn admin(&self) -> Value {
        admin("admin-1", &self.school_id)
    }

    pub fn other_admin(&self) -> Value {
        admin("admin-2", &self.school_id)
    }

    pub fn teacher(&self) -> Value {
        teacher("teacher-1", &self.school_id)
    }

    pub fn student_id(&self, i: usize) -> &str {
        &self.students[i].0
    }

    pub fn admission(&self, i: usize) -> &str {
        &self.students[i].1
    }
}

/// One school with a single class, the named subjects and `student_count`
/// students (`ADM001`, `ADM002`, ...).
pub fn seed_school(
    sc: &mut Sidecar,
    school_id: &str,
    with_logo: bool,
    subjects: &[&str],
    student_count: usize,
) -> SeededSchool {
    let mut school = json!({ "id": school_id, "name": "Hillcrest College" });
    if with_logo {
        school["logoUrl"] = json!("https://example.test/logo.png");
    }
    sc.ok("schools.upsert", json!({ "actor": super_admin(), "school": school }));

    let admin = admin("admin-1", school_id);
    let class = sc.ok(
        "classes.upsert",
        json!({ "actor": admin, "class": { "schoolId": school_id, "name": "JSS 1A" } }),
    );
    let class_id = str_field(&class, "id");

    let subject_ids = subjects
        .iter()
        .map(|name| {
            let s = sc.ok(
                "subjects.upsert",
                json!({ "actor": admin, "subject": { "schoolId": school_id, "name": name } }),
            );
            str_field(&s, "id")
        })
        .collect();

    let students = (1..=student_count)
        .map(|i| {
            let admission = format!("ADM{i:03}");
            let s = sc.ok(
                "students.upsert",
                json!({
                    "actor": admin,
                    "student": {
                        "schoolId": school_id,
                        "classId": class_id,
                        "admissionNumber": admission,
                        "firstName": format!("Student{i}"),
                        "lastName": "Okafor",
                    }
                }),
            );
            (str_field(&s, "id"), admission)
        })
        .collect();

    SeededSchool {
        school_id: school_id.to_string(),
        class_id,
        subject_ids,
        students,
    }
}

/// Drives a sheet from creation to approval and returns the approve result
/// (`{sheet, aggregation, aggregationError}`).
pub fn approve_sheet_with_scores(
    sc: &mut Sidecar,
    seed: &SeededSchool,
    subject_id: &str,
    scores: &[(usize, f64, f64)],
) -> Value {
    let created = sc.ok(
        "sheets.create",
        json!({
            "actor": seed.teacher(),
            "classId": seed.class_id,
            "subjectId": subject_id,
            "session": SESSION,
            "term": TERM,
        }),
    );
    let sheet_id = str_field(&created["sheet"], "id");
    let entries: Vec<Value> = scores
        .iter()
        .map(|(i, ca, exam)| {
            json!({ "studentId": seed.student_id(*i), "scores": { "ca": ca, "exam": exam } })
        })
        .collect();
    sc.ok(
        "sheets.updateEntries",
        json!({ "actor": seed.teacher(), "sheetId": sheet_id, "entries": entries }),
    );
    sc.ok("sheets.submit", json!({ "actor": seed.teacher(), "sheetId": sheet_id }));
    sc.ok("sheets.approve", json!({ "actor": seed.admin(), "sheetId": sheet_id }))
}

/// Creates an approved result for student `i` through the direct path,
/// uploaded by the teacher and approved by the first admin.
pub fn approved_result(sc: &mut Sidecar, seed: &SeededSchool, i: usize, exam: f64) -> String {
    let created = sc.ok(
        "results.create",
        json!({
            "actor": seed.teacher(),
            "studentId": seed.student_id(i),
            "session": SESSION,
            "term": TERM,
            "subjects": [
                { "subjectLabel": "Mathematics", "scores": { "ca": 30.0, "exam": exam } }
            ],
            "attendance": { "present": 60, "absent": 4, "total": 64 }
        }),
    );
    let id = str_field(&created, "id");
    sc.ok("results.submit", json!({ "actor": seed.teacher(), "resultId": id }));
    sc.ok("results.approve", json!({ "actor": seed.admin(), "resultId": id }));
    id
}
