mod test_support;

use serde_json::json;
use test_support::{admin, seed_school, str_field, temp_dir, Sidecar};

#[test]
fn existing_student_cannot_be_moved_to_another_school() {
    let workspace = temp_dir("resultsd-records-student-move");
    let mut sc = Sidecar::with_workspace(&workspace);
    let home = seed_school(&mut sc, "school-a", true, &[], 1);
    let other = seed_school(&mut sc, "school-b", true, &[], 0);

    let (code, _) = sc.err(
        "students.upsert",
        json!({
            "actor": admin("admin-1", "school-b"),
            "student": {
                "id": home.student_id(0),
                "schoolId": other.school_id,
                "classId": other.class_id,
                "admissionNumber": "B001",
                "firstName": "Moved",
                "lastName": "Okafor",
            }
        }),
    );
    assert_eq!(code, "validation_failed");

    // The stored record still places the student in the first school.
    let created = sc.ok(
        "results.create",
        json!({
            "actor": home.teacher(),
            "studentId": home.student_id(0),
            "session": test_support::SESSION,
            "term": test_support::TERM,
            "subjects": [{ "subjectLabel": "Mathematics", "scores": { "exam": 40.0 } }]
        }),
    );
    assert_eq!(str_field(&created, "schoolId"), "school-a");
    assert_eq!(str_field(&created, "classId"), home.class_id);

    // Same school, new class: allowed.
    let second = sc.ok(
        "classes.upsert",
        json!({ "actor": home.admin(), "class": { "schoolId": home.school_id, "name": "JSS 1B" } }),
    );
    let moved = sc.ok(
        "students.upsert",
        json!({
            "actor": home.admin(),
            "student": {
                "id": home.student_id(0),
                "schoolId": home.school_id,
                "classId": str_field(&second, "id"),
                "admissionNumber": home.admission(0),
                "firstName": "Student1",
                "lastName": "Okafor",
            }
        }),
    );
    assert_eq!(str_field(&moved, "schoolId"), "school-a");
    assert_eq!(str_field(&moved, "classId"), str_field(&second, "id"));
}

#[test]
fn classes_and_subjects_stay_with_their_school() {
    let workspace = temp_dir("resultsd-records-class-move");
    let mut sc = Sidecar::with_workspace(&workspace);
    let home = seed_school(&mut sc, "school-a", true, &["Mathematics"], 0);
    seed_school(&mut sc, "school-b", true, &[], 0);

    let (code, _) = sc.err(
        "classes.upsert",
        json!({
            "actor": admin("admin-1", "school-b"),
            "class": { "id": home.class_id, "schoolId": "school-b", "name": "Taken" }
        }),
    );
    assert_eq!(code, "validation_failed");

    let (code, _) = sc.err(
        "subjects.upsert",
        json!({
            "actor": admin("admin-1", "school-b"),
            "subject": { "id": home.subject_ids[0], "schoolId": "school-b", "name": "Taken" }
        }),
    );
    assert_eq!(code, "validation_failed");

    let renamed = sc.ok(
        "classes.upsert",
        json!({
            "actor": home.admin(),
            "class": { "id": home.class_id, "schoolId": home.school_id, "name": "JSS 1 Gold" }
        }),
    );
    assert_eq!(str_field(&renamed, "name"), "JSS 1 Gold");
}
