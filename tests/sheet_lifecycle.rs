mod test_support;

use serde_json::json;
use test_support::{
    approved_result, f64_field, i64_field, seed_school, str_field, temp_dir, Sidecar, SESSION,
    TERM,
};

#[test]
fn sheet_moves_draft_submitted_rejected_submitted_approved() {
    let workspace = temp_dir("resultsd-sheet-lifecycle");
    let mut sc = Sidecar::with_workspace(&workspace);
    let seed = seed_school(&mut sc, "school-a", true, &["Mathematics"], 2);

    let created = sc.ok(
        "sheets.create",
        json!({
            "actor": seed.teacher(),
            "classId": seed.class_id,
            "subjectId": seed.subject_ids[0],
            "session": SESSION,
            "term": TERM,
        }),
    );
    assert_eq!(created["resumed"], json!(false));
    let sheet = &created["sheet"];
    let sheet_id = str_field(sheet, "id");
    assert_eq!(sheet["status"], json!("draft"));
    assert_eq!(sheet["subjectLabel"], json!("Mathematics"));

    // Empty sheets cannot be submitted.
    let (code, _) = sc.err(
        "sheets.submit",
        json!({ "actor": seed.teacher(), "sheetId": sheet_id }),
    );
    assert_eq!(code, "validation_failed");

    let updated = sc.ok(
        "sheets.updateEntries",
        json!({
            "actor": seed.teacher(),
            "sheetId": sheet_id,
            "entries": [
                { "studentId": seed.student_id(0), "scores": { "ca1": 12.5, "ca2": 14.0, "exam": 55.0 } },
                { "studentId": seed.student_id(1), "scores": { "ca1": 10.0, "ca2": 8.0, "exam": 30.0 } }
            ]
        }),
    );
    let entries = updated["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(f64_field(&entries[0], "total"), 81.5);
    assert_eq!(entries[0]["grade"], json!("A"));
    assert_eq!(entries[0]["remark"], json!("Excellent"));
    assert_eq!(f64_field(&entries[1], "total"), 48.0);
    assert_eq!(entries[1]["grade"], json!("E"));
    assert_eq!(i64_field(&entries[0], "position"), 1);
    assert_eq!(i64_field(&entries[1], "position"), 2);

    let submitted = sc.ok(
        "sheets.submit",
        json!({ "actor": seed.teacher(), "sheetId": sheet_id }),
    );
    assert_eq!(submitted["status"], json!("submitted"));
    assert!(submitted["submittedAt"].is_string());

    // Submitted sheets are frozen for the creator.
    let (code, error) = sc.err(
        "sheets.updateEntries",
        json!({ "actor": seed.teacher(), "sheetId": sheet_id, "entries": [] }),
    );
    assert_eq!(code, "invalid_state");
    assert_eq!(error["details"]["status"], json!("submitted"));

    let (code, _) = sc.err(
        "sheets.reject",
        json!({ "actor": seed.admin(), "sheetId": sheet_id, "reason": "   " }),
    );
    assert_eq!(code, "validation_failed");

    let rejected = sc.ok(
        "sheets.reject",
        json!({ "actor": seed.admin(), "sheetId": sheet_id, "reason": "CA2 column is missing" }),
    );
    assert_eq!(rejected["status"], json!("rejected"));
    assert_eq!(rejected["rejectionReason"], json!("CA2 column is missing"));

    // Rejected sheets can be edited and go straight back to submitted.
    sc.ok(
        "sheets.updateEntries",
        json!({
            "actor": seed.teacher(),
            "sheetId": sheet_id,
            "entries": [
                { "studentId": seed.student_id(0), "scores": { "ca1": 12.5, "ca2": 14.0, "exam": 55.0 } },
                { "studentId": seed.student_id(1), "scores": { "ca1": 10.0, "ca2": 12.0, "exam": 30.0 } }
            ]
        }),
    );
    let resubmitted = sc.ok(
        "sheets.submit",
        json!({ "actor": seed.teacher(), "sheetId": sheet_id }),
    );
    assert_eq!(resubmitted["status"], json!("submitted"));
    assert!(resubmitted["rejectionReason"].is_null());

    let approved = sc.ok(
        "sheets.approve",
        json!({ "actor": seed.admin(), "sheetId": sheet_id }),
    );
    assert_eq!(approved["sheet"]["status"], json!("approved"));
    assert_eq!(approved["sheet"]["reviewedBy"], json!("admin-1"));
    assert!(approved["aggregationError"].is_null());
    let created_results = approved["aggregation"]["created"].as_array().expect("created");
    assert_eq!(created_results.len(), 2);

    // Approved is terminal.
    for method in ["sheets.submit", "sheets.approve"] {
        let (code, _) = sc.err(method, json!({ "actor": seed.admin(), "sheetId": sheet_id }));
        assert!(code == "invalid_state" || code == "forbidden", "{method}: {code}");
    }
    let (code, _) = sc.err(
        "sheets.reject",
        json!({ "actor": seed.admin(), "sheetId": sheet_id, "reason": "late" }),
    );
    assert_eq!(code, "invalid_state");
}

#[test]
fn draft_cannot_be_approved_or_rejected() {
    let workspace = temp_dir("resultsd-sheet-draft-guard");
    let mut sc = Sidecar::with_workspace(&workspace);
    let seed = seed_school(&mut sc, "school-a", true, &["English"], 1);

    let created = sc.ok(
        "sheets.create",
        json!({
            "actor": seed.teacher(),
            "classId": seed.class_id,
            "subjectId": seed.subject_ids[0],
            "session": SESSION,
            "term": TERM,
        }),
    );
    let sheet_id = str_field(&created["sheet"], "id");
    sc.ok(
        "sheets.updateEntries",
        json!({
            "actor": seed.teacher(),
            "sheetId": sheet_id,
            "entries": [{ "studentId": seed.student_id(0), "scores": { "exam": 70.0 } }]
        }),
    );

    let (code, error) = sc.err(
        "sheets.approve",
        json!({ "actor": seed.admin(), "sheetId": sheet_id }),
    );
    assert_eq!(code, "invalid_state");
    assert_eq!(error["details"]["action"], json!("approve"));
    let (code, _) = sc.err(
        "sheets.reject",
        json!({ "actor": seed.admin(), "sheetId": sheet_id, "reason": "no" }),
    );
    assert_eq!(code, "invalid_state");
}

#[test]
fn approval_waits_for_school_logo() {
    let workspace = temp_dir("resultsd-sheet-logo");
    let mut sc = Sidecar::with_workspace(&workspace);
    let seed = seed_school(&mut sc, "school-a", false, &["Biology"], 1);

    let created = sc.ok(
        "sheets.create",
        json!({
            "actor": seed.teacher(),
            "classId": seed.class_id,
            "subjectId": seed.subject_ids[0],
            "session": SESSION,
            "term": TERM,
        }),
    );
    let sheet_id = str_field(&created["sheet"], "id");
    sc.ok(
        "sheets.updateEntries",
        json!({
            "actor": seed.teacher(),
            "sheetId": sheet_id,
            "entries": [{ "studentId": seed.student_id(0), "scores": { "exam": 64.0 } }]
        }),
    );
    sc.ok("sheets.submit", json!({ "actor": seed.teacher(), "sheetId": sheet_id }));

    let (code, error) = sc.err(
        "sheets.approve",
        json!({ "actor": seed.admin(), "sheetId": sheet_id }),
    );
    assert_eq!(code, "precondition_failed");
    assert_eq!(error["details"]["precondition"], json!("school_logo"));

    // Still submitted; approval succeeds once branding exists.
    let sheet = sc.ok("sheets.get", json!({ "actor": seed.admin(), "sheetId": sheet_id }));
    assert_eq!(sheet["status"], json!("submitted"));
    sc.ok(
        "schools.upsert",
        json!({
            "actor": seed.admin(),
            "school": { "id": seed.school_id, "name": "Hillcrest College", "logoUrl": "https://example.test/crest.png" }
        }),
    );
    let approved = sc.ok("sheets.approve", json!({ "actor": seed.admin(), "sheetId": sheet_id }));
    assert_eq!(approved["sheet"]["status"], json!("approved"));
}

#[test]
fn only_school_admins_review_and_only_creators_edit() {
    let workspace = temp_dir("resultsd-sheet-roles");
    let mut sc = Sidecar::with_workspace(&workspace);
    let seed = seed_school(&mut sc, "school-a", true, &["Chemistry"], 1);
    let other = seed_school(&mut sc, "school-b", true, &["Chemistry"], 1);

    let created = sc.ok(
        "sheets.create",
        json!({
            "actor": seed.teacher(),
            "classId": seed.class_id,
            "subjectId": seed.subject_ids[0],
            "session": SESSION,
            "term": TERM,
        }),
    );
    let sheet_id = str_field(&created["sheet"], "id");

    let (code, _) = sc.err(
        "sheets.updateEntries",
        json!({
            "actor": test_support::teacher("teacher-2", &seed.school_id),
            "sheetId": sheet_id,
            "entries": []
        }),
    );
    assert_eq!(code, "forbidden");

    sc.ok(
        "sheets.updateEntries",
        json!({
            "actor": seed.teacher(),
            "sheetId": sheet_id,
            "entries": [{ "studentId": seed.student_id(0), "scores": { "exam": 52.0 } }]
        }),
    );
    sc.ok("sheets.submit", json!({ "actor": seed.teacher(), "sheetId": sheet_id }));

    let (code, _) = sc.err(
        "sheets.approve",
        json!({ "actor": seed.teacher(), "sheetId": sheet_id }),
    );
    assert_eq!(code, "forbidden");
    let (code, _) = sc.err(
        "sheets.approve",
        json!({ "actor": other.admin(), "sheetId": sheet_id }),
    );
    assert_eq!(code, "forbidden");

    // Students from another class are refused.
    let second = sc.ok(
        "sheets.create",
        json!({
            "actor": other.teacher(),
            "classId": other.class_id,
            "subjectId": other.subject_ids[0],
            "session": SESSION,
            "term": TERM,
        }),
    );
    let (code, _) = sc.err(
        "sheets.updateEntries",
        json!({
            "actor": other.teacher(),
            "sheetId": str_field(&second["sheet"], "id"),
            "entries": [{ "studentId": seed.student_id(0), "scores": { "exam": 52.0 } }]
        }),
    );
    assert_eq!(code, "validation_failed");
}

#[test]
fn create_resumes_draft_and_conflicts_with_live_sheet() {
    let workspace = temp_dir("resultsd-sheet-create");
    let mut sc = Sidecar::with_workspace(&workspace);
    let seed = seed_school(&mut sc, "school-a", true, &["Physics"], 1);
    let key = json!({
        "actor": seed.teacher(),
        "classId": seed.class_id,
        "subjectId": seed.subject_ids[0],
        "session": SESSION,
        "term": TERM,
    });

    let first = sc.ok("sheets.create", key.clone());
    let sheet_id = str_field(&first["sheet"], "id");
    let again = sc.ok("sheets.create", key.clone());
    assert_eq!(again["resumed"], json!(true));
    assert_eq!(str_field(&again["sheet"], "id"), sheet_id);

    sc.ok(
        "sheets.updateEntries",
        json!({
            "actor": seed.teacher(),
            "sheetId": sheet_id,
            "entries": [{ "studentId": seed.student_id(0), "scores": { "exam": 75.0 } }]
        }),
    );
    sc.ok("sheets.submit", json!({ "actor": seed.teacher(), "sheetId": sheet_id }));

    let (code, error) = sc.err("sheets.create", key);
    assert_eq!(code, "conflict");
    assert_eq!(error["details"]["existingId"], json!(sheet_id));
}

#[test]
fn negative_scores_are_refused() {
    let workspace = temp_dir("resultsd-sheet-scores");
    let mut sc = Sidecar::with_workspace(&workspace);
    let seed = seed_school(&mut sc, "school-a", true, &["Civic"], 1);
    let created = sc.ok(
        "sheets.create",
        json!({
            "actor": seed.teacher(),
            "classId": seed.class_id,
            "subjectId": seed.subject_ids[0],
            "session": SESSION,
            "term": TERM,
        }),
    );
    let (code, error) = sc.err(
        "sheets.updateEntries",
        json!({
            "actor": seed.teacher(),
            "sheetId": str_field(&created["sheet"], "id"),
            "entries": [{ "studentId": seed.student_id(0), "scores": { "ca": -1.0, "exam": 50.0 } }]
        }),
    );
    assert_eq!(code, "invalid_score");
    assert_eq!(error["details"]["metric"], json!("ca"));
}

#[test]
fn submission_notifies_admins_and_review_notifies_creator() {
    let workspace = temp_dir("resultsd-sheet-notify");
    let mut sc = Sidecar::with_workspace(&workspace);
    let seed = seed_school(&mut sc, "school-a", true, &["Geography"], 1);
    test_support::approve_sheet_with_scores(&mut sc, &seed, &seed.subject_ids[0], &[(0, 20.0, 50.0)]);

    let admin_inbox = sc.ok("notifications.list", json!({ "actor": seed.admin() }));
    let kinds: Vec<&str> = admin_inbox["notifications"]
        .as_array()
        .expect("notifications")
        .iter()
        .filter_map(|n| n["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"sheet_submitted"), "{kinds:?}");

    let teacher_inbox = sc.ok("notifications.list", json!({ "actor": seed.teacher() }));
    let kinds: Vec<&str> = teacher_inbox["notifications"]
        .as_array()
        .expect("notifications")
        .iter()
        .filter_map(|n| n["kind"].as_str())
        .collect();
    assert_eq!(kinds, vec!["sheet_approved"]);

    let audit = sc.ok(
        "audit.list",
        json!({ "actor": seed.admin(), "resource": "result_sheet" }),
    );
    let actions: Vec<&str> = audit["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .filter_map(|e| e["action"].as_str())
        .collect();
    assert_eq!(actions, vec!["sheet.create", "sheet.submit", "sheet.approve"]);
}

#[test]
fn creator_deletes_a_draft_even_when_its_students_are_published() {
    let workspace = temp_dir("resultsd-sheet-draft-delete");
    let mut sc = Sidecar::with_workspace(&workspace);
    let seed = seed_school(&mut sc, "school-a", true, &["English"], 1);
    let result_id = approved_result(&mut sc, &seed, 0, 50.0);
    sc.ok("results.publish", json!({ "actor": seed.admin(), "resultId": result_id }));

    let created = sc.ok(
        "sheets.create",
        json!({
            "actor": seed.teacher(),
            "classId": seed.class_id,
            "subjectId": seed.subject_ids[0],
            "session": SESSION,
            "term": TERM,
        }),
    );
    let sheet_id = str_field(&created["sheet"], "id");
    sc.ok(
        "sheets.updateEntries",
        json!({
            "actor": seed.teacher(),
            "sheetId": sheet_id,
            "entries": [{ "studentId": seed.student_id(0), "scores": { "ca": 20.0, "exam": 40.0 } }],
        }),
    );

    sc.ok("sheets.delete", json!({ "actor": seed.teacher(), "sheetId": sheet_id }));
    let (code, _) = sc.err("sheets.get", json!({ "actor": seed.teacher(), "sheetId": sheet_id }));
    assert_eq!(code, "not_found");

    // The published result is untouched.
    let result = sc.ok("results.get", json!({ "actor": seed.admin(), "resultId": result_id }));
    assert_eq!(result["status"], json!("published"));
}
