use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use crate::actor::{Actor, Role};
use crate::db;
use crate::error::{BulkOutcome, CoreError};
use crate::events::{self, Audience};
use crate::grading::{self, ComponentScores, GradingScale, SubjectEntry};
use crate::records;
use crate::status::{ResultAction, ResultStatus};

const COMMENT_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub present: i64,
    pub absent: i64,
    pub total: i64,
}

impl Attendance {
    fn validate(&self) -> Result<(), CoreError> {
        if self.present < 0 || self.absent < 0 || self.total < 0 {
            return Err(CoreError::validation("attendance counts must be >= 0"));
        }
        if self.present + self.absent > self.total {
            return Err(CoreError::validation(
                "attendance present + absent exceeds total",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub id: String,
    pub school_id: String,
    pub class_id: String,
    pub student_id: String,
    pub session: String,
    pub term: String,
    pub subjects: Vec<SubjectEntry>,
    pub total_score: f64,
    pub average_score: f64,
    pub position: Option<i64>,
    pub total_students: Option<i64>,
    pub teacher_comment: Option<String>,
    pub principal_comment: Option<String>,
    pub attendance: Option<Attendance>,
    pub status: ResultStatus,
    pub source: String,
    pub uploaded_by: String,
    pub submitted_at: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
    pub rejection_reason: Option<String>,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectInput {
    pub subject_label: String,
    pub scores: ComponentScores,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResultInput {
    pub student_id: String,
    pub session: String,
    pub term: String,
    pub subjects: Vec<SubjectInput>,
    #[serde(default)]
    pub teacher_comment: Option<String>,
    #[serde(default)]
    pub attendance: Option<Attendance>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResultInput {
    #[serde(default)]
    pub subjects: Option<Vec<SubjectInput>>,
    #[serde(default)]
    pub attendance: Option<Attendance>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFilter {
    pub school_id: Option<String>,
    pub class_id: Option<String>,
    pub student_id: Option<String>,
    pub session: Option<String>,
    pub term: Option<String>,
    pub status: Option<ResultStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkResultAction {
    Submit,
    Approve,
    Reject,
    Publish,
    Delete,
}

const RESULT_SELECT: &str = "SELECT id, school_id, class_id, student_id, session, term,
            subjects_json, total_score, average_score, position, total_students,
            teacher_comment, principal_comment, attendance_json, status, source, uploaded_by,
            submitted_at, approved_by, approved_at, rejection_reason, published_at,
            created_at, updated_at
     FROM results";

struct RawResult {
    record: ResultRecord,
    subjects_json: String,
    attendance_json: Option<String>,
}

fn raw_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawResult> {
    Ok(RawResult {
        record: ResultRecord {
            id: r.get(0)?,
            school_id: r.get(1)?,
            class_id: r.get(2)?,
            student_id: r.get(3)?,
            session: r.get(4)?,
            term: r.get(5)?,
            subjects: Vec::new(),
            total_score: r.get(7)?,
            average_score: r.get(8)?,
            position: r.get(9)?,
            total_students: r.get(10)?,
            teacher_comment: r.get(11)?,
            principal_comment: r.get(12)?,
            attendance: None,
            status: r.get(14)?,
            source: r.get(15)?,
            uploaded_by: r.get(16)?,
            submitted_at: r.get(17)?,
            approved_by: r.get(18)?,
            approved_at: r.get(19)?,
            rejection_reason: r.get(20)?,
            published_at: r.get(21)?,
            created_at: r.get(22)?,
            updated_at: r.get(23)?,
        },
        subjects_json: r.get(6)?,
        attendance_json: r.get(13)?,
    })
}

fn decode(raw: RawResult) -> Result<ResultRecord, CoreError> {
    let mut record = raw.record;
    record.subjects = serde_json::from_str(&raw.subjects_json)?;
    record.attendance = match raw.attendance_json {
        Some(s) => Some(serde_json::from_str(&s)?),
        None => None,
    };
    Ok(record)
}

pub fn load_result(conn: &Connection, id: &str) -> Result<ResultRecord, CoreError> {
    let raw = conn
        .query_row(&format!("{RESULT_SELECT} WHERE id = ?"), [id], raw_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("result", id))?;
    decode(raw)
}

pub fn find_result(
    conn: &Connection,
    student_id: &str,
    session: &str,
    term: &str,
) -> Result<Option<ResultRecord>, CoreError> {
    let raw = conn
        .query_row(
            &format!("{RESULT_SELECT} WHERE student_id = ? AND session = ? AND term = ?"),
            (student_id, session, term),
            raw_from_row,
        )
        .optional()?;
    raw.map(decode).transpose()
}

fn build_subjects(
    inputs: &[SubjectInput],
    scale: &GradingScale,
) -> Result<Vec<SubjectEntry>, CoreError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(inputs.len());
    for input in inputs {
        let label = input.subject_label.trim();
        if label.is_empty() {
            return Err(CoreError::validation("subjectLabel must not be empty"));
        }
        if !seen.insert(label.to_ascii_lowercase()) {
            return Err(CoreError::validation(format!(
                "subject {label} appears more than once"
            )));
        }
        out.push(SubjectEntry::compute(label, input.scores.clone(), scale)?);
    }
    Ok(out)
}

fn clean_comment(text: &str) -> Result<Option<String>, CoreError> {
    let text = text.trim();
    if text.chars().count() > COMMENT_MAX_CHARS {
        return Err(CoreError::validation(format!(
            "comment exceeds {COMMENT_MAX_CHARS} characters"
        )));
    }
    Ok((!text.is_empty()).then(|| text.to_string()))
}

fn require_uploader(actor: &Actor, record: &ResultRecord) -> Result<(), CoreError> {
    if actor.user_id != record.uploaded_by {
        return Err(CoreError::Forbidden(
            "only the uploader may do this".to_string(),
        ));
    }
    Ok(())
}

pub fn create_result(
    conn: &Connection,
    actor: &Actor,
    input: &CreateResultInput,
) -> Result<ResultRecord, CoreError> {
    let session = input.session.trim();
    let term = input.term.trim();
    if session.is_empty() || term.is_empty() {
        return Err(CoreError::validation("session and term are required"));
    }
    let student = records::require_student(conn, &input.student_id)?;
    actor.require_school(&student.school_id)?;
    let teacher_comment = match input.teacher_comment.as_deref() {
        Some(text) if actor.role != Role::Teacher && !text.trim().is_empty() => {
            return Err(CoreError::Forbidden(
                "teacher comments are written by teachers".to_string(),
            ))
        }
        Some(text) => clean_comment(text)?,
        None => None,
    };
    if let Some(attendance) = &input.attendance {
        attendance.validate()?;
    }

    let config = grading::load_config(conn, &student.school_id)?;
    let subjects = build_subjects(&input.subjects, &config.scale)?;
    let totals = grading::aggregate(&subjects, &config.subject_weights);

    let tx = db::immediate_tx(conn)?;
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM results WHERE student_id = ? AND session = ? AND term = ?",
            (&student.id, session, term),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing_id) = existing {
        return Err(CoreError::conflict(
            "a result already exists for this student, session and term",
            Some(existing_id),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    let attendance_json = input
        .attendance
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    tx.execute(
        "INSERT INTO results(id, school_id, class_id, student_id, session, term, subjects_json,
                             total_score, average_score, teacher_comment, attendance_json,
                             status, source, uploaded_by, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'manual', ?, ?, ?)",
        params![
            id,
            student.school_id,
            student.class_id,
            student.id,
            session,
            term,
            serde_json::to_string(&subjects)?,
            totals.total_score,
            totals.average_score,
            teacher_comment,
            attendance_json,
            ResultStatus::Draft,
            actor.user_id,
            now,
            now,
        ],
    )?;
    tx.commit()?;

    tracing::info!(result_id = %id, student_id = %student.id, "result created");
    events::record_audit(
        conn,
        &actor.user_id,
        "result.create",
        "result",
        Some(&id),
        json!({ "studentId": student.id, "session": session, "term": term }),
    );
    load_result(conn, &id)
}

pub fn update_result(
    conn: &Connection,
    actor: &Actor,
    id: &str,
    input: &UpdateResultInput,
) -> Result<ResultRecord, CoreError> {
    let tx = db::immediate_tx(conn)?;
    let record = load_result(&tx, id)?;
    require_uploader(actor, &record)?;
    if !record.status.is_editable() {
        return Err(CoreError::InvalidState {
            entity: "result",
            from: record.status.as_str(),
            action: "edit",
        });
    }

    if let Some(subject_inputs) = &input.subjects {
        let config = grading::load_config(&tx, &record.school_id)?;
        let subjects = build_subjects(subject_inputs, &config.scale)?;
        let totals = grading::aggregate(&subjects, &config.subject_weights);
        tx.execute(
            "UPDATE results SET subjects_json = ?, total_score = ?, average_score = ?, updated_at = ?
             WHERE id = ?",
            (
                serde_json::to_string(&subjects)?,
                totals.total_score,
                totals.average_score,
                db::now_rfc3339(),
                id,
            ),
        )?;
    }
    if let Some(attendance) = &input.attendance {
        attendance.validate()?;
        tx.execute(
            "UPDATE results SET attendance_json = ?, updated_at = ? WHERE id = ?",
            (serde_json::to_string(attendance)?, db::now_rfc3339(), id),
        )?;
    }
    tx.commit()?;
    load_result(conn, id)
}

pub fn get_result(conn: &Connection, actor: &Actor, id: &str) -> Result<ResultRecord, CoreError> {
    let record = load_result(conn, id)?;
    actor.require_school(&record.school_id)?;
    Ok(record)
}

pub fn list_results(
    conn: &Connection,
    actor: &Actor,
    filter: &ResultFilter,
) -> Result<Vec<ResultRecord>, CoreError> {
    let mut sql = format!("{RESULT_SELECT} WHERE 1 = 1");
    let mut params: Vec<SqlValue> = Vec::new();

    let school_id = filter.school_id.clone().or_else(|| actor.school_id.clone());
    match school_id {
        Some(school_id) => {
            actor.require_school(&school_id)?;
            sql.push_str(" AND school_id = ?");
            params.push(SqlValue::Text(school_id));
        }
        None if actor.role == Role::SuperAdmin => {}
        None => {
            return Err(CoreError::Forbidden(
                "actor is not scoped to a school".to_string(),
            ))
        }
    }
    for (column, value) in [
        ("class_id", &filter.class_id),
        ("student_id", &filter.student_id),
        ("session", &filter.session),
        ("term", &filter.term),
    ] {
        if let Some(v) = value {
            sql.push_str(&format!(" AND {column} = ?"));
            params.push(SqlValue::Text(v.clone()));
        }
    }
    if let Some(status) = filter.status {
        sql.push_str(" AND status = ?");
        params.push(SqlValue::Text(status.as_str().to_string()));
    }
    sql.push_str(" ORDER BY class_id, position IS NULL, position, student_id");

    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map(params_from_iter(params), raw_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(decode).collect()
}

fn update_status(
    conn: &Connection,
    record: &ResultRecord,
    next: ResultStatus,
    sql_tail: &str,
    extra: Vec<SqlValue>,
) -> Result<(), CoreError> {
    let sql = format!(
        "UPDATE results SET status = ?, updated_at = ?{sql_tail} WHERE id = ? AND status = ?"
    );
    let mut params: Vec<SqlValue> = vec![
        SqlValue::Text(next.as_str().to_string()),
        SqlValue::Text(db::now_rfc3339()),
    ];
    params.extend(extra);
    params.push(SqlValue::Text(record.id.clone()));
    params.push(SqlValue::Text(record.status.as_str().to_string()));
    let changed = conn.execute(&sql, params_from_iter(params))?;
    if changed == 0 {
        return Err(CoreError::conflict(
            "result changed concurrently; reload and retry",
            Some(record.id.clone()),
        ));
    }
    Ok(())
}

pub fn submit_result(conn: &Connection, actor: &Actor, id: &str) -> Result<ResultRecord, CoreError> {
    let tx = db::immediate_tx(conn)?;
    let record = load_result(&tx, id)?;
    require_uploader(actor, &record)?;
    let next = record.status.apply(ResultAction::Submit)?;
    if record.subjects.is_empty() {
        return Err(CoreError::validation("result has no subjects"));
    }
    update_status(
        &tx,
        &record,
        next,
        ", rejection_reason = NULL, submitted_at = ?",
        vec![SqlValue::Text(db::now_rfc3339())],
    )?;
    tx.commit()?;

    tracing::info!(result_id = id, from = record.status.as_str(), "result submitted");
    events::notify(
        conn,
        Audience::SchoolAdmins(&record.school_id),
        "result_submitted",
        "Result submitted for review",
        &format!("A {} {} result is awaiting review", record.session, record.term),
        json!({ "resultId": id, "studentId": record.student_id }),
    );
    events::record_audit(
        conn,
        &actor.user_id,
        "result.submit",
        "result",
        Some(id),
        json!({ "from": record.status.as_str() }),
    );
    load_result(conn, id)
}

pub fn approve_result(conn: &Connection, actor: &Actor, id: &str) -> Result<ResultRecord, CoreError> {
    let tx = db::immediate_tx(conn)?;
    let record = load_result(&tx, id)?;
    actor.require_not_author(&record.uploaded_by)?;
    actor.require_admin_of(&record.school_id)?;
    let next = record.status.apply(ResultAction::Approve)?;
    records::require_branding(&tx, &record.school_id)?;
    let now = db::now_rfc3339();
    update_status(
        &tx,
        &record,
        next,
        ", approved_by = ?, approved_at = ?",
        vec![SqlValue::Text(actor.user_id.clone()), SqlValue::Text(now)],
    )?;
    tx.commit()?;

    tracing::info!(result_id = id, reviewer = %actor.user_id, "result approved");
    events::notify(
        conn,
        Audience::User(&record.uploaded_by),
        "result_approved",
        "Result approved",
        &format!("A {} {} result you uploaded was approved", record.session, record.term),
        json!({ "resultId": id }),
    );
    events::record_audit(conn, &actor.user_id, "result.approve", "result", Some(id), json!({}));
    load_result(conn, id)
}

pub fn reject_result(
    conn: &Connection,
    actor: &Actor,
    id: &str,
    reason: &str,
) -> Result<ResultRecord, CoreError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(CoreError::validation("a rejection reason is required"));
    }
    let tx = db::immediate_tx(conn)?;
    let record = load_result(&tx, id)?;
    actor.require_not_author(&record.uploaded_by)?;
    actor.require_admin_of(&record.school_id)?;
    let next = record.status.apply(ResultAction::Reject)?;
    update_status(
        &tx,
        &record,
        next,
        ", rejection_reason = ?",
        vec![SqlValue::Text(reason.to_string())],
    )?;
    tx.commit()?;

    tracing::info!(result_id = id, reviewer = %actor.user_id, "result rejected");
    events::notify(
        conn,
        Audience::User(&record.uploaded_by),
        "result_rejected",
        "Result returned",
        &format!(
            "A {} {} result you uploaded was returned: {}",
            record.session, record.term, reason
        ),
        json!({ "resultId": id, "reason": reason }),
    );
    events::record_audit(
        conn,
        &actor.user_id,
        "result.reject",
        "result",
        Some(id),
        json!({ "reason": reason }),
    );
    load_result(conn, id)
}

pub fn publish_result(conn: &Connection, actor: &Actor, id: &str) -> Result<ResultRecord, CoreError> {
    let tx = db::immediate_tx(conn)?;
    let record = load_result(&tx, id)?;
    actor.require_admin_of(&record.school_id)?;
    let next = record.status.apply(ResultAction::Publish)?;
    update_status(
        &tx,
        &record,
        next,
        ", published_at = ?",
        vec![SqlValue::Text(db::now_rfc3339())],
    )?;
    tx.commit()?;

    tracing::info!(result_id = id, actor = %actor.user_id, "result published");
    events::notify(
        conn,
        Audience::User(&record.uploaded_by),
        "result_published",
        "Result published",
        &format!("A {} {} result is now published", record.session, record.term),
        json!({ "resultId": id }),
    );
    events::record_audit(conn, &actor.user_id, "result.publish", "result", Some(id), json!({}));
    load_result(conn, id)
}

/// Teachers write the teacher comment, administrators the principal comment.
/// Comments stay editable after publication; nothing else does.
pub fn comment_result(
    conn: &Connection,
    actor: &Actor,
    id: &str,
    text: &str,
) -> Result<ResultRecord, CoreError> {
    let record = load_result(conn, id)?;
    actor.require_school(&record.school_id)?;
    let comment = clean_comment(text)?;
    let column = match actor.role {
        Role::Teacher => "teacher_comment",
        Role::SchoolAdmin | Role::SuperAdmin => "principal_comment",
    };
    let changed = conn.execute(
        &format!("UPDATE results SET {column} = ?, updated_at = ? WHERE id = ?"),
        (&comment, db::now_rfc3339(), id),
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("result", id));
    }

    events::record_audit(
        conn,
        &actor.user_id,
        "result.comment",
        "result",
        Some(id),
        json!({ "field": column, "status": record.status.as_str() }),
    );
    load_result(conn, id)
}

/// Published results are never deleted. Admins may delete any other result
/// of their school; uploaders only their own drafts.
pub fn delete_result(conn: &Connection, actor: &Actor, id: &str) -> Result<(), CoreError> {
    let tx = db::immediate_tx(conn)?;
    let record = load_result(&tx, id)?;
    if record.status == ResultStatus::Published {
        return Err(CoreError::InvalidState {
            entity: "result",
            from: record.status.as_str(),
            action: "delete",
        });
    }
    if actor.is_admin() {
        actor.require_admin_of(&record.school_id)?;
    } else {
        require_uploader(actor, &record)?;
        if record.status != ResultStatus::Draft {
            return Err(CoreError::InvalidState {
                entity: "result",
                from: record.status.as_str(),
                action: "delete",
            });
        }
    }
    tx.execute("DELETE FROM results WHERE id = ?", [id])?;
    tx.commit()?;

    events::record_audit(
        conn,
        &actor.user_id,
        "result.delete",
        "result",
        Some(id),
        json!({ "status": record.status.as_str(), "studentId": record.student_id }),
    );
    Ok(())
}

pub fn bulk_action(
    conn: &Connection,
    actor: &Actor,
    ids: &[String],
    action: BulkResultAction,
    reason: Option<&str>,
) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for id in ids {
        let res = match action {
            BulkResultAction::Submit => submit_result(conn, actor, id).map(|_| ()),
            BulkResultAction::Approve => approve_result(conn, actor, id).map(|_| ()),
            BulkResultAction::Reject => {
                reject_result(conn, actor, id, reason.unwrap_or_default()).map(|_| ())
            }
            BulkResultAction::Publish => publish_result(conn, actor, id).map(|_| ()),
            BulkResultAction::Delete => delete_result(conn, actor, id),
        };
        outcome.record(id, res);
    }
    tracing::info!(
        ?action,
        succeeded = outcome.succeeded.len(),
        failed = outcome.failed.len(),
        "bulk result action finished"
    );
    outcome
}
