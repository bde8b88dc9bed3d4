//! Collaborator records the core reads: schools, classes, subjects and
//! students. Only upserts and lookups live here; their full management
//! belongs to the surrounding system.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db;
use crate::error::CoreError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: String,
    pub name: String,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: String,
    pub school_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub school_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub school_id: String,
    pub class_id: String,
    pub admission_number: String,
    pub first_name: String,
    pub last_name: String,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolInput {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedInput {
    #[serde(default)]
    pub id: Option<String>,
    pub school_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInput {
    #[serde(default)]
    pub id: Option<String>,
    pub school_id: String,
    pub class_id: String,
    pub admission_number: String,
    pub first_name: String,
    pub last_name: String,
}

fn id_or_new(id: Option<String>) -> String {
    id.filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn require_non_empty(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

pub fn upsert_school(conn: &Connection, input: SchoolInput) -> Result<School, CoreError> {
    require_non_empty("name", &input.name)?;
    let id = id_or_new(input.id);
    let logo_url = input.logo_url.filter(|s| !s.trim().is_empty());
    conn.execute(
        "INSERT INTO schools(id, name, logo_url, created_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           logo_url = excluded.logo_url",
        (&id, input.name.trim(), &logo_url, db::now_rfc3339()),
    )?;
    Ok(School {
        id,
        name: input.name.trim().to_string(),
        logo_url,
    })
}

/// Records never move between schools; an upsert naming an existing id
/// under another school is refused rather than half-applied.
fn reject_school_move(
    conn: &Connection,
    table: &'static str,
    id: Option<&str>,
    school_id: &str,
) -> Result<(), CoreError> {
    let Some(id) = id else {
        return Ok(());
    };
    let owner: Option<String> = conn
        .query_row(
            &format!("SELECT school_id FROM {table} WHERE id = ?"),
            [id],
            |r| r.get(0),
        )
        .optional()?;
    match owner {
        Some(owner) if owner != school_id => Err(CoreError::validation(format!(
            "{id} belongs to a different school"
        ))),
        _ => Ok(()),
    }
}

pub fn upsert_class(conn: &Connection, input: NamedInput) -> Result<ClassRecord, CoreError> {
    require_non_empty("name", &input.name)?;
    require_school(conn, &input.school_id)?;
    reject_school_move(conn, "classes", input.id.as_deref(), &input.school_id)?;
    let id = id_or_new(input.id);
    conn.execute(
        "INSERT INTO classes(id, school_id, name) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (&id, &input.school_id, input.name.trim()),
    )?;
    Ok(ClassRecord {
        id,
        school_id: input.school_id,
        name: input.name.trim().to_string(),
    })
}

pub fn upsert_subject(conn: &Connection, input: NamedInput) -> Result<Subject, CoreError> {
    require_non_empty("name", &input.name)?;
    require_school(conn, &input.school_id)?;
    reject_school_move(conn, "subjects", input.id.as_deref(), &input.school_id)?;
    let id = id_or_new(input.id);
    conn.execute(
        "INSERT INTO subjects(id, school_id, name) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (&id, &input.school_id, input.name.trim()),
    )?;
    Ok(Subject {
        id,
        school_id: input.school_id,
        name: input.name.trim().to_string(),
    })
}

pub fn upsert_student(conn: &Connection, input: StudentInput) -> Result<Student, CoreError> {
    require_non_empty("admissionNumber", &input.admission_number)?;
    require_non_empty("firstName", &input.first_name)?;
    let class = require_class(conn, &input.class_id)?;
    if class.school_id != input.school_id {
        return Err(CoreError::validation("class belongs to a different school"));
    }
    reject_school_move(conn, "students", input.id.as_deref(), &input.school_id)?;
    let admission_number = input.admission_number.trim().to_string();
    if let Some(existing) = student_by_admission(conn, &input.school_id, &admission_number)? {
        if input.id.as_deref() != Some(existing.id.as_str()) {
            return Err(CoreError::conflict(
                "admission number already in use",
                Some(existing.id),
            ));
        }
    }
    let id = id_or_new(input.id);
    conn.execute(
        "INSERT INTO students(id, school_id, class_id, admission_number, first_name, last_name)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           class_id = excluded.class_id,
           admission_number = excluded.admission_number,
           first_name = excluded.first_name,
           last_name = excluded.last_name",
        (
            &id,
            &input.school_id,
            &input.class_id,
            &admission_number,
            input.first_name.trim(),
            input.last_name.trim(),
        ),
    )?;
    Ok(Student {
        id,
        school_id: input.school_id,
        class_id: input.class_id,
        admission_number,
        first_name: input.first_name.trim().to_string(),
        last_name: input.last_name.trim().to_string(),
    })
}

pub fn school_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<School>> {
    conn.query_row(
        "SELECT id, name, logo_url FROM schools WHERE id = ?",
        [id],
        |r| {
            Ok(School {
                id: r.get(0)?,
                name: r.get(1)?,
                logo_url: r.get(2)?,
            })
        },
    )
    .optional()
}

pub fn require_school(conn: &Connection, id: &str) -> Result<School, CoreError> {
    school_by_id(conn, id)?.ok_or_else(|| CoreError::not_found("school", id))
}

/// Approved results are render-ready, so approval waits for school branding.
pub fn require_branding(conn: &Connection, school_id: &str) -> Result<(), CoreError> {
    let school = require_school(conn, school_id)?;
    match school.logo_url.as_deref().map(str::trim) {
        Some(logo) if !logo.is_empty() => Ok(()),
        _ => Err(CoreError::PreconditionFailed {
            precondition: "school_logo",
            message: "configure a school logo before approving results".to_string(),
        }),
    }
}

pub fn require_class(conn: &Connection, id: &str) -> Result<ClassRecord, CoreError> {
    conn.query_row(
        "SELECT id, school_id, name FROM classes WHERE id = ?",
        [id],
        |r| {
            Ok(ClassRecord {
                id: r.get(0)?,
                school_id: r.get(1)?,
                name: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("class", id))
}

pub fn require_subject(conn: &Connection, id: &str) -> Result<Subject, CoreError> {
    conn.query_row(
        "SELECT id, school_id, name FROM subjects WHERE id = ?",
        [id],
        |r| {
            Ok(Subject {
                id: r.get(0)?,
                school_id: r.get(1)?,
                name: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("subject", id))
}

const STUDENT_COLUMNS: &str =
    "id, school_id, class_id, admission_number, first_name, last_name";

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        school_id: r.get(1)?,
        class_id: r.get(2)?,
        admission_number: r.get(3)?,
        first_name: r.get(4)?,
        last_name: r.get(5)?,
    })
}

pub fn student_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<Student>> {
    conn.query_row(
        &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?"),
        [id],
        student_from_row,
    )
    .optional()
}

pub fn require_student(conn: &Connection, id: &str) -> Result<Student, CoreError> {
    student_by_id(conn, id)?.ok_or_else(|| CoreError::not_found("student", id))
}

pub fn student_by_admission(
    conn: &Connection,
    school_id: &str,
    admission_number: &str,
) -> rusqlite::Result<Option<Student>> {
    conn.query_row(
        &format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE school_id = ? AND admission_number = ?"
        ),
        (school_id, admission_number),
        student_from_row,
    )
    .optional()
}
