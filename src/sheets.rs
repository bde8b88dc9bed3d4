use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use crate::actor::Actor;
use crate::aggregate::{self, AggregationReport, AggregationTrigger, Scope};
use crate::db;
use crate::error::{BulkOutcome, CoreError};
use crate::events::{self, Audience};
use crate::grading::{self, ComponentScores};
use crate::records;
use crate::status::{SheetAction, SheetStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetEntry {
    pub student_id: String,
    pub component_scores: ComponentScores,
    pub total: f64,
    pub grade: String,
    pub remark: String,
    /// Rank of this entry within the sheet by subject total.
    pub position: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSheet {
    pub id: String,
    pub school_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub subject_label: String,
    pub session: String,
    pub term: String,
    pub created_by: String,
    pub status: SheetStatus,
    pub rejection_reason: Option<String>,
    pub submitted_at: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub archived_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub entries: Vec<SheetEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetKey {
    pub class_id: String,
    pub subject_id: String,
    pub session: String,
    pub term: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInput {
    pub student_id: String,
    pub scores: ComponentScores,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetFilter {
    pub school_id: Option<String>,
    pub class_id: Option<String>,
    pub session: Option<String>,
    pub term: Option<String>,
    pub status: Option<SheetStatus>,
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkSheetAction {
    Delete,
    Archive,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveOutcome {
    pub sheet: ResultSheet,
    pub aggregation: Option<AggregationReport>,
    /// Set when the sheet was approved but the aggregation job failed; the
    /// job can be re-run for the scope.
    pub aggregation_error: Option<String>,
}

const SHEET_SELECT: &str = "SELECT s.id, s.school_id, s.class_id, s.subject_id,
            COALESCE(sub.name, s.subject_id), s.session, s.term, s.created_by, s.status,
            s.rejection_reason, s.submitted_at, s.reviewed_by, s.reviewed_at, s.archived_at,
            s.created_at, s.updated_at
     FROM result_sheets s
     LEFT JOIN subjects sub ON sub.id = s.subject_id";

fn sheet_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ResultSheet> {
    Ok(ResultSheet {
        id: r.get(0)?,
        school_id: r.get(1)?,
        class_id: r.get(2)?,
        subject_id: r.get(3)?,
        subject_label: r.get(4)?,
        session: r.get(5)?,
        term: r.get(6)?,
        created_by: r.get(7)?,
        status: r.get(8)?,
        rejection_reason: r.get(9)?,
        submitted_at: r.get(10)?,
        reviewed_by: r.get(11)?,
        reviewed_at: r.get(12)?,
        archived_at: r.get(13)?,
        created_at: r.get(14)?,
        updated_at: r.get(15)?,
        entries: Vec::new(),
    })
}

fn load_header(conn: &Connection, id: &str) -> Result<ResultSheet, CoreError> {
    conn.query_row(&format!("{SHEET_SELECT} WHERE s.id = ?"), [id], sheet_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("sheet", id))
}

fn load_entries(conn: &Connection, sheet_id: &str) -> Result<Vec<SheetEntry>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT student_id, component_scores_json, total, grade, remark, position
         FROM sheet_entries
         WHERE sheet_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([sheet_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, i64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut entries = Vec::with_capacity(rows.len());
    for (student_id, scores_json, total, grade, remark, position) in rows {
        entries.push(SheetEntry {
            student_id,
            component_scores: serde_json::from_str(&scores_json)?,
            total,
            grade,
            remark,
            position,
        });
    }
    Ok(entries)
}

pub fn load_sheet(conn: &Connection, id: &str) -> Result<ResultSheet, CoreError> {
    let mut sheet = load_header(conn, id)?;
    sheet.entries = load_entries(conn, id)?;
    Ok(sheet)
}

fn require_creator(actor: &Actor, sheet: &ResultSheet) -> Result<(), CoreError> {
    if actor.user_id != sheet.created_by {
        return Err(CoreError::Forbidden(
            "only the sheet's creator may do this".to_string(),
        ));
    }
    Ok(())
}

fn require_not_archived(sheet: &ResultSheet, action: &'static str) -> Result<(), CoreError> {
    if sheet.archived_at.is_some() {
        return Err(CoreError::InvalidState {
            entity: "sheet",
            from: "archived",
            action,
        });
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// An approved sheet is published-derived once any of its students has a
/// published result for the sheet's session and term. Sheets that never
/// reached approval fed no result and never are.
pub fn is_published_derived(conn: &Connection, sheet: &ResultSheet) -> rusqlite::Result<bool> {
    if sheet.status != SheetStatus::Approved {
        return Ok(false);
    }
    let count: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM sheet_entries e
         JOIN results r ON r.student_id = e.student_id
         WHERE e.sheet_id = ? AND r.session = ? AND r.term = ? AND r.status = 'published'",
        (&sheet.id, &sheet.session, &sheet.term),
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Creates a draft, or resumes the caller's draft/rejected sheet for the same
/// tuple. A submitted or approved sheet for the tuple is a conflict.
pub fn create_sheet(
    conn: &Connection,
    actor: &Actor,
    key: &SheetKey,
) -> Result<(ResultSheet, bool), CoreError> {
    require_non_empty("session", &key.session)?;
    require_non_empty("term", &key.term)?;
    let class = records::require_class(conn, &key.class_id)?;
    actor.require_school(&class.school_id)?;
    let subject = records::require_subject(conn, &key.subject_id)?;
    if subject.school_id != class.school_id {
        return Err(CoreError::validation("subject belongs to a different school"));
    }

    let tx = db::immediate_tx(conn)?;
    let existing: Option<(String, SheetStatus)> = tx
        .query_row(
            "SELECT id, status FROM result_sheets
             WHERE class_id = ? AND subject_id = ? AND session = ? AND term = ?
               AND created_by = ? AND archived_at IS NULL
             ORDER BY created_at DESC
             LIMIT 1",
            (
                &key.class_id,
                &key.subject_id,
                key.session.trim(),
                key.term.trim(),
                &actor.user_id,
            ),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    if let Some((existing_id, status)) = existing {
        if status.is_editable() {
            drop(tx);
            return Ok((load_sheet(conn, &existing_id)?, true));
        }
        return Err(CoreError::conflict(
            format!("a {} sheet already exists for this class and subject", status.as_str()),
            Some(existing_id),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    tx.execute(
        "INSERT INTO result_sheets(id, school_id, class_id, subject_id, session, term, created_by,
                                   status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &class.school_id,
            &key.class_id,
            &key.subject_id,
            key.session.trim(),
            key.term.trim(),
            &actor.user_id,
            SheetStatus::Draft,
            &now,
            &now,
        ),
    )?;
    tx.commit()?;

    tracing::info!(sheet_id = %id, class_id = %key.class_id, subject_id = %key.subject_id, "sheet created");
    events::record_audit(
        conn,
        &actor.user_id,
        "sheet.create",
        "result_sheet",
        Some(&id),
        json!({ "classId": key.class_id, "subjectId": key.subject_id, "session": key.session, "term": key.term }),
    );
    Ok((load_sheet(conn, &id)?, false))
}

pub fn get_sheet(conn: &Connection, actor: &Actor, id: &str) -> Result<ResultSheet, CoreError> {
    let sheet = load_sheet(conn, id)?;
    if actor.user_id == sheet.created_by {
        return Ok(sheet);
    }
    actor.require_admin_of(&sheet.school_id)?;
    Ok(sheet)
}

pub fn list_sheets(
    conn: &Connection,
    actor: &Actor,
    filter: &SheetFilter,
) -> Result<Vec<ResultSheet>, CoreError> {
    let mut sql = format!("{SHEET_SELECT} WHERE 1 = 1");
    let mut params: Vec<SqlValue> = Vec::new();

    if actor.is_admin() {
        let school_id = filter.school_id.clone().or_else(|| actor.school_id.clone());
        if let Some(school_id) = school_id {
            actor.require_school(&school_id)?;
            sql.push_str(" AND s.school_id = ?");
            params.push(SqlValue::Text(school_id));
        }
    } else {
        sql.push_str(" AND s.created_by = ?");
        params.push(SqlValue::Text(actor.user_id.clone()));
    }
    if let Some(class_id) = &filter.class_id {
        sql.push_str(" AND s.class_id = ?");
        params.push(SqlValue::Text(class_id.clone()));
    }
    if let Some(session) = &filter.session {
        sql.push_str(" AND s.session = ?");
        params.push(SqlValue::Text(session.clone()));
    }
    if let Some(term) = &filter.term {
        sql.push_str(" AND s.term = ?");
        params.push(SqlValue::Text(term.clone()));
    }
    if let Some(status) = filter.status {
        sql.push_str(" AND s.status = ?");
        params.push(SqlValue::Text(status.as_str().to_string()));
    }
    if !filter.include_archived {
        sql.push_str(" AND s.archived_at IS NULL");
    }
    sql.push_str(" ORDER BY s.created_at, s.id");

    let mut stmt = conn.prepare(&sql)?;
    let headers = stmt
        .query_map(params_from_iter(params), sheet_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let mut sheets = Vec::with_capacity(headers.len());
    for mut sheet in headers {
        sheet.entries = load_entries(conn, &sheet.id)?;
        sheets.push(sheet);
    }
    Ok(sheets)
}

/// Replaces the sheet's entries. Only the creator may edit, and only while
/// the sheet is draft or rejected.
pub fn update_entries(
    conn: &Connection,
    actor: &Actor,
    id: &str,
    entries: &[EntryInput],
) -> Result<ResultSheet, CoreError> {
    let tx = db::immediate_tx(conn)?;
    let sheet = load_header(&tx, id)?;
    require_creator(actor, &sheet)?;
    require_not_archived(&sheet, "edit")?;
    if !sheet.status.is_editable() {
        return Err(CoreError::InvalidState {
            entity: "sheet",
            from: sheet.status.as_str(),
            action: "edit",
        });
    }

    let config = grading::load_config(&tx, &sheet.school_id)?;
    let mut seen = HashSet::new();
    let mut computed = Vec::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.student_id.as_str()) {
            return Err(CoreError::validation(format!(
                "student {} appears more than once",
                entry.student_id
            )));
        }
        let student = records::require_student(&tx, &entry.student_id)?;
        if student.class_id != sheet.class_id {
            return Err(CoreError::validation(format!(
                "student {} is not in this class",
                entry.student_id
            )));
        }
        let score = grading::compute_entry(&entry.scores, &config.scale)?;
        computed.push((entry, score));
    }
    let totals: Vec<f64> = computed.iter().map(|(_, s)| s.total).collect();
    let positions = grading::competition_positions(&totals);

    tx.execute("DELETE FROM sheet_entries WHERE sheet_id = ?", [id])?;
    for (i, ((entry, score), position)) in computed.iter().zip(positions).enumerate() {
        tx.execute(
            "INSERT INTO sheet_entries(sheet_id, student_id, sort_order, component_scores_json,
                                       total, grade, remark, position)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                id,
                &entry.student_id,
                i as i64,
                serde_json::to_string(&entry.scores)?,
                score.total,
                &score.grade,
                &score.remark,
                position,
            ),
        )?;
    }
    tx.execute(
        "UPDATE result_sheets SET updated_at = ? WHERE id = ?",
        (db::now_rfc3339(), id),
    )?;
    tx.commit()?;

    tracing::debug!(sheet_id = id, entries = entries.len(), "sheet entries replaced");
    load_sheet(conn, id)
}

fn update_status(
    conn: &Connection,
    sheet: &ResultSheet,
    next: SheetStatus,
    sql_tail: &str,
    extra: Vec<SqlValue>,
) -> Result<(), CoreError> {
    let sql = format!(
        "UPDATE result_sheets SET status = ?, updated_at = ?{sql_tail} WHERE id = ? AND status = ?"
    );
    let mut params: Vec<SqlValue> = vec![
        SqlValue::Text(next.as_str().to_string()),
        SqlValue::Text(db::now_rfc3339()),
    ];
    params.extend(extra);
    params.push(SqlValue::Text(sheet.id.clone()));
    params.push(SqlValue::Text(sheet.status.as_str().to_string()));
    let changed = conn.execute(&sql, params_from_iter(params))?;
    if changed == 0 {
        return Err(CoreError::conflict(
            "sheet changed concurrently; reload and retry",
            Some(sheet.id.clone()),
        ));
    }
    Ok(())
}

pub fn submit_sheet(conn: &Connection, actor: &Actor, id: &str) -> Result<ResultSheet, CoreError> {
    let tx = db::immediate_tx(conn)?;
    let sheet = load_header(&tx, id)?;
    require_creator(actor, &sheet)?;
    require_not_archived(&sheet, "submit")?;
    let next = sheet.status.apply(SheetAction::Submit)?;
    let entry_count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM sheet_entries WHERE sheet_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if entry_count == 0 {
        return Err(CoreError::validation("sheet has no entries"));
    }
    update_status(
        &tx,
        &sheet,
        next,
        ", rejection_reason = NULL, submitted_at = ?",
        vec![SqlValue::Text(db::now_rfc3339())],
    )?;
    tx.commit()?;

    tracing::info!(sheet_id = id, from = sheet.status.as_str(), "sheet submitted");
    events::notify(
        conn,
        Audience::SchoolAdmins(&sheet.school_id),
        "sheet_submitted",
        "Result sheet submitted",
        &format!(
            "A {} result sheet for {} {} is awaiting review",
            sheet.subject_label, sheet.session, sheet.term
        ),
        json!({ "sheetId": id }),
    );
    events::record_audit(
        conn,
        &actor.user_id,
        "sheet.submit",
        "result_sheet",
        Some(id),
        json!({ "from": sheet.status.as_str() }),
    );
    load_sheet(conn, id)
}

/// Approves a submitted sheet and then runs the aggregation job for the
/// sheet's school/session/term.
pub fn approve_sheet(conn: &Connection, actor: &Actor, id: &str) -> Result<ApproveOutcome, CoreError> {
    let tx = db::immediate_tx(conn)?;
    let sheet = load_header(&tx, id)?;
    actor.require_admin_of(&sheet.school_id)?;
    require_not_archived(&sheet, "approve")?;
    let next = sheet.status.apply(SheetAction::Approve)?;
    records::require_branding(&tx, &sheet.school_id)?;
    let now = db::now_rfc3339();
    update_status(
        &tx,
        &sheet,
        next,
        ", reviewed_by = ?, reviewed_at = ?",
        vec![
            SqlValue::Text(actor.user_id.clone()),
            SqlValue::Text(now),
        ],
    )?;
    tx.commit()?;

    tracing::info!(sheet_id = id, reviewer = %actor.user_id, "sheet approved");
    events::notify(
        conn,
        Audience::User(&sheet.created_by),
        "sheet_approved",
        "Result sheet approved",
        &format!(
            "Your {} result sheet for {} {} was approved",
            sheet.subject_label, sheet.session, sheet.term
        ),
        json!({ "sheetId": id }),
    );
    events::record_audit(
        conn,
        &actor.user_id,
        "sheet.approve",
        "result_sheet",
        Some(id),
        json!({}),
    );

    let scope = Scope {
        school_id: sheet.school_id.clone(),
        session: sheet.session.clone(),
        term: sheet.term.clone(),
    };
    let (aggregation, aggregation_error) = match aggregate::run_aggregation(
        conn,
        &scope,
        AggregationTrigger::SheetApproved(id.to_string()),
        &actor.user_id,
    ) {
        Ok(report) => (Some(report), None),
        Err(e) => {
            tracing::warn!(sheet_id = id, error = %e, "aggregation failed after approval");
            (None, Some(e.to_string()))
        }
    };

    Ok(ApproveOutcome {
        sheet: load_sheet(conn, id)?,
        aggregation,
        aggregation_error,
    })
}

pub fn reject_sheet(
    conn: &Connection,
    actor: &Actor,
    id: &str,
    reason: &str,
) -> Result<ResultSheet, CoreError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(CoreError::validation("a rejection reason is required"));
    }
    let tx = db::immediate_tx(conn)?;
    let sheet = load_header(&tx, id)?;
    actor.require_admin_of(&sheet.school_id)?;
    require_not_archived(&sheet, "reject")?;
    let next = sheet.status.apply(SheetAction::Reject)?;
    update_status(
        &tx,
        &sheet,
        next,
        ", rejection_reason = ?, reviewed_by = ?, reviewed_at = ?",
        vec![
            SqlValue::Text(reason.to_string()),
            SqlValue::Text(actor.user_id.clone()),
            SqlValue::Text(db::now_rfc3339()),
        ],
    )?;
    tx.commit()?;

    tracing::info!(sheet_id = id, reviewer = %actor.user_id, "sheet rejected");
    events::notify(
        conn,
        Audience::User(&sheet.created_by),
        "sheet_rejected",
        "Result sheet returned",
        &format!(
            "Your {} result sheet for {} {} was returned: {}",
            sheet.subject_label, sheet.session, sheet.term, reason
        ),
        json!({ "sheetId": id, "reason": reason }),
    );
    events::record_audit(
        conn,
        &actor.user_id,
        "sheet.reject",
        "result_sheet",
        Some(id),
        json!({ "reason": reason }),
    );
    load_sheet(conn, id)
}

/// Creators may delete their own drafts; admins may delete any sheet of
/// their school unless it is published-derived.
pub fn delete_sheet(conn: &Connection, actor: &Actor, id: &str) -> Result<(), CoreError> {
    let tx = db::immediate_tx(conn)?;
    let sheet = load_header(&tx, id)?;
    if actor.is_admin() {
        actor.require_admin_of(&sheet.school_id)?;
    } else {
        require_creator(actor, &sheet)?;
        if sheet.status != SheetStatus::Draft {
            return Err(CoreError::InvalidState {
                entity: "sheet",
                from: sheet.status.as_str(),
                action: "delete",
            });
        }
    }
    if is_published_derived(&tx, &sheet)? {
        return Err(CoreError::InvalidState {
            entity: "sheet",
            from: "published",
            action: "delete",
        });
    }
    tx.execute("DELETE FROM result_sheets WHERE id = ?", [id])?;
    tx.commit()?;

    tracing::info!(sheet_id = id, actor = %actor.user_id, "sheet deleted");
    events::record_audit(
        conn,
        &actor.user_id,
        "sheet.delete",
        "result_sheet",
        Some(id),
        json!({ "status": sheet.status.as_str() }),
    );
    reaggregate_after_removal(conn, actor, &sheet);
    Ok(())
}

/// Results built from an approved sheet must stop reflecting it once the
/// sheet is gone. A failed re-run leaves the removal in place; an admin can
/// re-run the scope by hand.
fn reaggregate_after_removal(conn: &Connection, actor: &Actor, sheet: &ResultSheet) {
    if sheet.status != SheetStatus::Approved {
        return;
    }
    let scope = Scope {
        school_id: sheet.school_id.clone(),
        session: sheet.session.clone(),
        term: sheet.term.clone(),
    };
    if let Err(e) = aggregate::run_aggregation(
        conn,
        &scope,
        AggregationTrigger::SheetRemoved(sheet.id.clone()),
        &actor.user_id,
    ) {
        tracing::warn!(sheet_id = %sheet.id, error = %e, "aggregation failed after sheet removal");
    }
}

pub fn archive_sheet(conn: &Connection, actor: &Actor, id: &str) -> Result<(), CoreError> {
    let tx = db::immediate_tx(conn)?;
    let sheet = load_header(&tx, id)?;
    actor.require_admin_of(&sheet.school_id)?;
    if sheet.archived_at.is_some() {
        return Ok(());
    }
    if is_published_derived(&tx, &sheet)? {
        return Err(CoreError::InvalidState {
            entity: "sheet",
            from: "published",
            action: "archive",
        });
    }
    tx.execute(
        "UPDATE result_sheets SET archived_at = ?, updated_at = ? WHERE id = ?",
        (db::now_rfc3339(), db::now_rfc3339(), id),
    )?;
    tx.commit()?;

    events::record_audit(
        conn,
        &actor.user_id,
        "sheet.archive",
        "result_sheet",
        Some(id),
        json!({ "status": sheet.status.as_str() }),
    );
    reaggregate_after_removal(conn, actor, &sheet);
    Ok(())
}

pub fn bulk_action(
    conn: &Connection,
    actor: &Actor,
    ids: &[String],
    action: BulkSheetAction,
) -> Result<BulkOutcome, CoreError> {
    if !actor.is_admin() {
        return Err(CoreError::Forbidden(
            "bulk sheet actions are limited to administrators".to_string(),
        ));
    }
    let mut outcome = BulkOutcome::default();
    for id in ids {
        let res = match action {
            BulkSheetAction::Delete => delete_sheet(conn, actor, id),
            BulkSheetAction::Archive => archive_sheet(conn, actor, id),
        };
        outcome.record(id, res);
    }
    tracing::info!(
        ?action,
        succeeded = outcome.succeeded.len(),
        failed = outcome.failed.len(),
        "bulk sheet action finished"
    );
    Ok(outcome)
}
