//! Folds every approved sheet of a school/session/term into per-student
//! results. The job is keyed by scope and safe to re-run: each run reads one
//! snapshot, ranks the whole cohort, then upserts student by student.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::actor::Actor;
use crate::db;
use crate::error::CoreError;
use crate::events;
use crate::grading::{self, ComponentScores, GradingConfig, RecordTotals, SubjectEntry};
use crate::status::{ResultAction, ResultStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub school_id: String,
    pub session: String,
    pub term: String,
}

#[derive(Debug, Clone)]
pub enum AggregationTrigger {
    SheetApproved(String),
    /// An approved sheet was deleted or archived.
    SheetRemoved(String),
    Manual,
}

impl AggregationTrigger {
    fn label(&self) -> String {
        match self {
            Self::SheetApproved(sheet_id) => format!("sheet:{sheet_id}"),
            Self::SheetRemoved(sheet_id) => format!("sheet-removed:{sheet_id}"),
            Self::Manual => "manual".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFailure {
    pub student_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub student_id: String,
    pub class_id: String,
    pub total_score: f64,
    pub average_score: f64,
    pub position: i64,
    pub total_students: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    pub run_id: String,
    pub school_id: String,
    pub session: String,
    pub term: String,
    pub trigger: String,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub skipped_published: Vec<String>,
    /// Students whose aggregated result lost its last approved sheet and went
    /// back to draft.
    pub withdrawn: Vec<String>,
    pub errors: Vec<StudentFailure>,
    /// Ordered by class, position, then total score and student id.
    pub standings: Vec<Standing>,
}

struct StudentSubjects {
    class_id: String,
    /// (subject id, label, component scores json); a later approval of the
    /// same subject replaces the earlier one.
    subjects: Vec<(String, String, String)>,
}

struct ComputedStudent {
    student_id: String,
    class_id: String,
    subjects: Vec<SubjectEntry>,
    totals: RecordTotals,
}

enum Upsert {
    Created,
    Updated,
    SkippedPublished,
}

fn load_snapshot(
    conn: &Connection,
    scope: &Scope,
) -> Result<BTreeMap<String, StudentSubjects>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT s.class_id, s.subject_id, COALESCE(sub.name, s.subject_id),
                e.student_id, e.component_scores_json
         FROM result_sheets s
         JOIN sheet_entries e ON e.sheet_id = s.id
         LEFT JOIN subjects sub ON sub.id = s.subject_id
         WHERE s.school_id = ? AND s.session = ? AND s.term = ?
           AND s.status = 'approved' AND s.archived_at IS NULL
         ORDER BY s.reviewed_at, s.id, e.sort_order",
    )?;
    let rows = stmt
        .query_map((&scope.school_id, &scope.session, &scope.term), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_student: BTreeMap<String, StudentSubjects> = BTreeMap::new();
    for (class_id, subject_id, label, student_id, scores_json) in rows {
        let acc = by_student
            .entry(student_id)
            .or_insert_with(|| StudentSubjects {
                class_id,
                subjects: Vec::new(),
            });
        match acc.subjects.iter_mut().find(|(sid, _, _)| *sid == subject_id) {
            Some(slot) => *slot = (subject_id, label, scores_json),
            None => acc.subjects.push((subject_id, label, scores_json)),
        }
    }
    Ok(by_student)
}

fn compute_student(
    acc: &StudentSubjects,
    config: &GradingConfig,
) -> Result<(Vec<SubjectEntry>, RecordTotals), CoreError> {
    let mut entries = Vec::with_capacity(acc.subjects.len());
    for (_, label, scores_json) in &acc.subjects {
        let scores: ComponentScores = serde_json::from_str(scores_json)?;
        entries.push(SubjectEntry::compute(label, scores, &config.scale)?);
    }
    let totals = grading::aggregate(&entries, &config.subject_weights);
    Ok((entries, totals))
}

fn upsert_student(
    conn: &Connection,
    scope: &Scope,
    student: &ComputedStudent,
    position: i64,
    total_students: i64,
    actor_id: &str,
) -> Result<Upsert, CoreError> {
    let existing: Option<(String, ResultStatus)> = conn
        .query_row(
            "SELECT id, status FROM results WHERE student_id = ? AND session = ? AND term = ?",
            (&student.student_id, &scope.session, &scope.term),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let subjects_json = serde_json::to_string(&student.subjects)?;
    let now = db::now_rfc3339();
    match existing {
        Some((_, ResultStatus::Published)) => Ok(Upsert::SkippedPublished),
        Some((result_id, status)) => {
            let next = status.apply(ResultAction::Aggregate)?;
            let changed = conn.execute(
                "UPDATE results SET
                   class_id = ?, subjects_json = ?, total_score = ?, average_score = ?,
                   position = ?, total_students = ?, status = ?, source = 'aggregated',
                   approved_by = ?, approved_at = ?, rejection_reason = NULL, updated_at = ?
                 WHERE id = ? AND status != 'published'",
                (
                    &student.class_id,
                    &subjects_json,
                    student.totals.total_score,
                    student.totals.average_score,
                    position,
                    total_students,
                    next,
                    actor_id,
                    &now,
                    &now,
                    &result_id,
                ),
            )?;
            if changed == 0 {
                return Ok(Upsert::SkippedPublished);
            }
            Ok(Upsert::Updated)
        }
        None => {
            let next = ResultStatus::Draft.apply(ResultAction::Aggregate)?;
            conn.execute(
                "INSERT INTO results(id, school_id, class_id, student_id, session, term,
                                     subjects_json, total_score, average_score, position,
                                     total_students, status, source, uploaded_by,
                                     approved_by, approved_at, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'aggregated', ?, ?, ?, ?, ?)",
                params![
                    Uuid::new_v4().to_string(),
                    scope.school_id,
                    student.class_id,
                    student.student_id,
                    scope.session,
                    scope.term,
                    subjects_json,
                    student.totals.total_score,
                    student.totals.average_score,
                    position,
                    total_students,
                    next,
                    actor_id,
                    actor_id,
                    now,
                    now,
                    now,
                ],
            )?;
            Ok(Upsert::Created)
        }
    }
}

/// Frozen totals of every published result in scope, keyed by student.
fn published_totals(
    conn: &Connection,
    scope: &Scope,
) -> rusqlite::Result<HashMap<String, RecordTotals>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, total_score, average_score FROM results
         WHERE school_id = ? AND session = ? AND term = ? AND status = 'published'",
    )?;
    let rows = stmt
        .query_map((&scope.school_id, &scope.session, &scope.term), |r| {
            Ok((
                r.get::<_, String>(0)?,
                RecordTotals {
                    total_score: r.get(1)?,
                    average_score: r.get(2)?,
                },
            ))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

/// Aggregated, unpublished results in scope whose student no longer appears
/// on any approved sheet.
fn orphaned_results(
    conn: &Connection,
    scope: &Scope,
    snapshot: &BTreeMap<String, StudentSubjects>,
) -> rusqlite::Result<Vec<(String, String, ResultStatus)>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, status FROM results
         WHERE school_id = ? AND session = ? AND term = ?
           AND source = 'aggregated' AND status != 'published'
           AND NOT (status = 'draft' AND subjects_json = '[]')
         ORDER BY student_id",
    )?;
    let rows = stmt
        .query_map((&scope.school_id, &scope.session, &scope.term), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })?
        .collect::<Result<Vec<(String, String, ResultStatus)>, _>>()?;
    Ok(rows
        .into_iter()
        .filter(|(_, student_id, _)| !snapshot.contains_key(student_id))
        .collect())
}

/// Clears the subjects and standing of a result nothing backs any more.
/// Comments and attendance stay with the record.
fn withdraw_result(conn: &Connection, result_id: &str, status: ResultStatus) -> Result<bool, CoreError> {
    let next = status.apply(ResultAction::Withdraw)?;
    let changed = conn.execute(
        "UPDATE results SET
           subjects_json = '[]', total_score = 0, average_score = 0,
           position = NULL, total_students = NULL, status = ?,
           approved_by = NULL, approved_at = NULL, updated_at = ?
         WHERE id = ? AND status != 'published'",
        (next, db::now_rfc3339(), result_id),
    )?;
    Ok(changed == 1)
}

/// Ranks each class cohort by average (competition ranking). Returns
/// `(position, cohort size)` aligned with `students`.
fn rank_by_class(students: &[ComputedStudent]) -> Vec<(i64, i64)> {
    let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, s) in students.iter().enumerate() {
        by_class.entry(s.class_id.as_str()).or_default().push(i);
    }

    let mut ranks = vec![(0_i64, 0_i64); students.len()];
    for members in by_class.values() {
        let averages: Vec<f64> = members
            .iter()
            .map(|&i| students[i].totals.average_score)
            .collect();
        let positions = grading::competition_positions(&averages);
        let cohort = members.len() as i64;
        for (&i, position) in members.iter().zip(positions) {
            ranks[i] = (position, cohort);
        }
    }
    ranks
}

pub fn run_aggregation(
    conn: &Connection,
    scope: &Scope,
    trigger: AggregationTrigger,
    actor_id: &str,
) -> Result<AggregationReport, CoreError> {
    let started_at = db::now_rfc3339();
    let mut tx = db::immediate_tx(conn)?;
    let config = grading::load_config(&tx, &scope.school_id)?;
    let snapshot = load_snapshot(&tx, scope)?;

    let mut report = AggregationReport {
        run_id: Uuid::new_v4().to_string(),
        school_id: scope.school_id.clone(),
        session: scope.session.clone(),
        term: scope.term.clone(),
        trigger: trigger.label(),
        created: Vec::new(),
        updated: Vec::new(),
        skipped_published: Vec::new(),
        withdrawn: Vec::new(),
        errors: Vec::new(),
        standings: Vec::new(),
    };
    let frozen = published_totals(&tx, scope)?;

    let mut computed = Vec::with_capacity(snapshot.len());
    for (student_id, acc) in &snapshot {
        match compute_student(acc, &config) {
            Ok((subjects, totals)) => computed.push(ComputedStudent {
                // A published record keeps its stored standing in the cohort.
                totals: frozen.get(student_id).copied().unwrap_or(totals),
                student_id: student_id.clone(),
                class_id: acc.class_id.clone(),
                subjects,
            }),
            Err(e) => {
                tracing::warn!(student_id = %student_id, error = %e, "skipping student in aggregation");
                report.errors.push(StudentFailure {
                    student_id: student_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    // Every position is assigned from the full snapshot before anything is written.
    let ranks = rank_by_class(&computed);

    for (student, &(position, total_students)) in computed.iter().zip(&ranks) {
        let sp = tx.savepoint()?;
        match upsert_student(&sp, scope, student, position, total_students, actor_id) {
            Ok(outcome) => {
                sp.commit()?;
                match outcome {
                    Upsert::Created => report.created.push(student.student_id.clone()),
                    Upsert::Updated => report.updated.push(student.student_id.clone()),
                    Upsert::SkippedPublished => {
                        tracing::warn!(
                            student_id = %student.student_id,
                            session = %scope.session,
                            term = %scope.term,
                            "result already published; aggregation left it unchanged"
                        );
                        report.skipped_published.push(student.student_id.clone());
                    }
                }
            }
            Err(e) => {
                // Dropping the savepoint rolls back this student only.
                drop(sp);
                report.errors.push(StudentFailure {
                    student_id: student.student_id.clone(),
                    message: e.to_string(),
                });
            }
        }
        report.standings.push(Standing {
            student_id: student.student_id.clone(),
            class_id: student.class_id.clone(),
            total_score: student.totals.total_score,
            average_score: student.totals.average_score,
            position,
            total_students,
        });
    }
    for (result_id, student_id, status) in orphaned_results(&tx, scope, &snapshot)? {
        let sp = tx.savepoint()?;
        match withdraw_result(&sp, &result_id, status) {
            Ok(true) => {
                sp.commit()?;
                tracing::info!(student_id = %student_id, "no approved sheet backs this result; withdrawn to draft");
                report.withdrawn.push(student_id);
            }
            Ok(false) => {
                sp.commit()?;
            }
            Err(e) => {
                drop(sp);
                report.errors.push(StudentFailure {
                    student_id,
                    message: e.to_string(),
                });
            }
        }
    }

    report.standings.sort_by(|a, b| {
        a.class_id
            .cmp(&b.class_id)
            .then(a.position.cmp(&b.position))
            .then(
                b.total_score
                    .partial_cmp(&a.total_score)
                    .unwrap_or(Ordering::Equal),
            )
            .then(a.student_id.cmp(&b.student_id))
    });

    tx.execute(
        "INSERT INTO aggregation_runs(id, school_id, session, term, trigger, created_count,
                                      updated_count, skipped_published, error_count,
                                      withdrawn_count, started_at, finished_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &report.run_id,
            &scope.school_id,
            &scope.session,
            &scope.term,
            &report.trigger,
            report.created.len() as i64,
            report.updated.len() as i64,
            report.skipped_published.len() as i64,
            report.errors.len() as i64,
            report.withdrawn.len() as i64,
            &started_at,
            db::now_rfc3339(),
        ),
    )?;
    tx.commit()?;

    tracing::info!(
        school_id = %scope.school_id,
        session = %scope.session,
        term = %scope.term,
        trigger = %report.trigger,
        created = report.created.len(),
        updated = report.updated.len(),
        skipped = report.skipped_published.len(),
        withdrawn = report.withdrawn.len(),
        errors = report.errors.len(),
        "aggregation finished"
    );
    events::record_audit(
        conn,
        actor_id,
        "results.aggregate",
        "aggregation_run",
        Some(&report.run_id),
        json!({
            "schoolId": scope.school_id,
            "session": scope.session,
            "term": scope.term,
            "trigger": report.trigger,
        }),
    );
    Ok(report)
}

/// Admin-triggered re-run for a scope, e.g. after an earlier run failed.
pub fn aggregate_scope(
    conn: &Connection,
    actor: &Actor,
    scope: &Scope,
) -> Result<AggregationReport, CoreError> {
    actor.require_admin_of(&scope.school_id)?;
    run_aggregation(conn, scope, AggregationTrigger::Manual, &actor.user_id)
}
