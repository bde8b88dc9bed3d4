//! Scratch-card PINs: issuance by school administrators and the anonymous
//! verify-and-consume check guardians use to view a result.

use chrono::{DateTime, Months, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::actor::Actor;
use crate::db;
use crate::error::{BulkOutcome, CoreError};
use crate::events;
use crate::grading::SubjectEntry;
use crate::records;
use crate::results::{self, Attendance};
use crate::status::ResultStatus;

const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_GROUP_LEN: usize = 4;
const CODE_LEN: usize = 12;

pub const NEVER_EXPIRES: &str = "9999-12-31T23:59:59Z";
pub const MAX_BATCH: u32 = 500;
const DEFAULT_MAX_ATTEMPTS: i64 = 3;
const DEFAULT_VALIDITY_MONTHS: u32 = 6;
const CODE_COLLISION_RETRIES: usize = 8;
const CHECK_RETRIES: usize = 5;

/// `XXXX-XXXX-XXXX` drawn from the random bits of a v4 UUID. Byte 6 carries
/// the version nibble and is skipped.
pub fn generate_code() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let symbols = bytes[0..6]
        .iter()
        .chain(bytes[7..13].iter())
        .map(|b| CODE_ALPHABET[usize::from(b & 31)] as char);
    let mut out = String::with_capacity(CODE_LEN + 2);
    for (i, c) in symbols.enumerate() {
        if i > 0 && i % CODE_GROUP_LEN == 0 {
            out.push('-');
        }
        out.push(c);
    }
    out
}

/// Guardians type codes by hand: accept lower case, stray whitespace and a
/// missing set of dashes.
pub fn normalize_code(raw: &str) -> String {
    let upper: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    if upper.len() == CODE_LEN && upper.chars().all(|c| c.is_ascii_alphanumeric()) {
        let (a, rest) = upper.split_at(CODE_GROUP_LEN);
        let (b, c) = rest.split_at(CODE_GROUP_LEN);
        return format!("{a}-{b}-{c}");
    }
    upper
}

/// Short stable tag for logs; the code itself is a bearer credential.
pub fn fingerprint(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

/// Successful checks count as attempts too, so the failure allowance sits on
/// top of the paid uses.
fn effective_max_attempts(requested: Option<i64>, max_usage_count: i64) -> i64 {
    max_usage_count + requested.unwrap_or(DEFAULT_MAX_ATTEMPTS)
}

fn is_expired(expires_at: &str, now: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(expires_at) {
        Ok(t) => now > t.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!(expires_at, error = %e, "unreadable pin expiry; treating as expired");
            true
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsedBy {
    pub admission_number: String,
    pub student_name: String,
    pub used_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub id: String,
    pub code: String,
    pub school_id: String,
    pub session: String,
    pub term: String,
    pub expires_at: String,
    pub max_attempts: i64,
    pub attempt_count: i64,
    pub max_usage_count: i64,
    pub usage_count: i64,
    pub used_by: Option<UsedBy>,
    pub created_by: String,
    pub created_at: String,
}

const PIN_SELECT: &str = "SELECT id, code, school_id, session, term, expires_at, max_attempts,
            attempt_count, max_usage_count, usage_count, used_by_json, created_by, created_at
     FROM pins";

fn pin_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Pin> {
    let used_by_json: Option<String> = r.get(10)?;
    Ok(Pin {
        id: r.get(0)?,
        code: r.get(1)?,
        school_id: r.get(2)?,
        session: r.get(3)?,
        term: r.get(4)?,
        expires_at: r.get(5)?,
        max_attempts: r.get(6)?,
        attempt_count: r.get(7)?,
        max_usage_count: r.get(8)?,
        usage_count: r.get(9)?,
        used_by: used_by_json.and_then(|s| serde_json::from_str(&s).ok()),
        created_by: r.get(11)?,
        created_at: r.get(12)?,
    })
}

fn pin_by_code(conn: &Connection, code: &str) -> rusqlite::Result<Option<Pin>> {
    conn.query_row(&format!("{PIN_SELECT} WHERE code = ?"), [code], pin_from_row)
        .optional()
}

fn pin_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<Pin>> {
    conn.query_row(&format!("{PIN_SELECT} WHERE id = ?"), [id], pin_from_row)
        .optional()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub school_id: String,
    pub session: String,
    pub term: String,
    pub quantity: u32,
    pub max_usage_count: i64,
    #[serde(default)]
    pub max_attempts: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub never_expires: bool,
}

fn resolve_expiry(req: &IssueRequest, now: DateTime<Utc>) -> Result<String, CoreError> {
    if req.never_expires {
        if req.expires_at.is_some() {
            return Err(CoreError::validation(
                "expiresAt and neverExpires are mutually exclusive",
            ));
        }
        return Ok(NEVER_EXPIRES.to_string());
    }
    let at = match req.expires_at.as_deref() {
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map_err(|_| CoreError::validation("expiresAt must be an RFC 3339 timestamp"))?
            .with_timezone(&Utc),
        None => now
            .checked_add_months(Months::new(DEFAULT_VALIDITY_MONTHS))
            .ok_or_else(|| CoreError::validation("default expiry is out of range"))?,
    };
    if at <= now {
        return Err(CoreError::validation("expiresAt must be in the future"));
    }
    Ok(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn issue_pins(conn: &Connection, actor: &Actor, req: &IssueRequest) -> Result<Vec<Pin>, CoreError> {
    actor.require_admin_of(&req.school_id)?;
    let session = req.session.trim();
    let term = req.term.trim();
    if session.is_empty() || term.is_empty() {
        return Err(CoreError::validation("session and term are required"));
    }
    if req.quantity == 0 || req.quantity > MAX_BATCH {
        return Err(CoreError::validation(format!(
            "quantity must be between 1 and {MAX_BATCH}"
        )));
    }
    if req.max_usage_count < 1 {
        return Err(CoreError::validation("maxUsageCount must be at least 1"));
    }
    if matches!(req.max_attempts, Some(n) if n < 1) {
        return Err(CoreError::validation("maxAttempts must be at least 1"));
    }
    records::require_school(conn, &req.school_id)?;

    let now = Utc::now();
    let expires_at = resolve_expiry(req, now)?;
    let max_attempts = effective_max_attempts(req.max_attempts, req.max_usage_count);
    let created_at = now.to_rfc3339_opts(SecondsFormat::Millis, true);

    let tx = db::immediate_tx(conn)?;
    let mut ids = Vec::with_capacity(req.quantity as usize);
    for _ in 0..req.quantity {
        let id = Uuid::new_v4().to_string();
        let mut inserted = false;
        for _ in 0..CODE_COLLISION_RETRIES {
            let changed = tx.execute(
                "INSERT INTO pins(id, code, school_id, session, term, expires_at, max_attempts,
                                  max_usage_count, created_by, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(code) DO NOTHING",
                (
                    &id,
                    generate_code(),
                    &req.school_id,
                    session,
                    term,
                    &expires_at,
                    max_attempts,
                    req.max_usage_count,
                    &actor.user_id,
                    &created_at,
                ),
            )?;
            if changed == 1 {
                inserted = true;
                break;
            }
            tracing::debug!("pin code collision; drawing again");
        }
        if !inserted {
            return Err(CoreError::Internal(anyhow::anyhow!(
                "could not draw a unique pin code"
            )));
        }
        ids.push(id);
    }
    tx.commit()?;

    tracing::info!(
        school_id = %req.school_id,
        session,
        term,
        quantity = req.quantity,
        max_usage = req.max_usage_count,
        max_attempts,
        "pins issued"
    );
    events::record_audit(
        conn,
        &actor.user_id,
        "pin.issue",
        "pin",
        None,
        json!({
            "schoolId": req.school_id,
            "session": session,
            "term": term,
            "quantity": req.quantity,
            "maxUsageCount": req.max_usage_count,
            "maxAttempts": max_attempts,
            "expiresAt": expires_at,
        }),
    );

    let mut pins = Vec::with_capacity(ids.len());
    for id in &ids {
        pins.push(pin_by_id(conn, id)?.ok_or_else(|| CoreError::not_found("pin", id.as_str()))?);
    }
    Ok(pins)
}

pub fn list_pins(
    conn: &Connection,
    actor: &Actor,
    school_id: &str,
    session: Option<&str>,
    term: Option<&str>,
) -> Result<Vec<Pin>, CoreError> {
    actor.require_admin_of(school_id)?;
    let mut sql = format!("{PIN_SELECT} WHERE school_id = ?");
    let mut params = vec![SqlValue::Text(school_id.to_string())];
    if let Some(session) = session {
        sql.push_str(" AND session = ?");
        params.push(SqlValue::Text(session.to_string()));
    }
    if let Some(term) = term {
        sql.push_str(" AND term = ?");
        params.push(SqlValue::Text(term.to_string()));
    }
    sql.push_str(" ORDER BY created_at, code");
    let mut stmt = conn.prepare(&sql)?;
    let pins = stmt
        .query_map(params_from_iter(params), pin_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pins)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinAttempt {
    pub id: String,
    pub admission_number: String,
    pub success: bool,
    pub reason: Option<String>,
    pub attempted_at: String,
}

pub fn pin_attempts(conn: &Connection, actor: &Actor, pin_id: &str) -> Result<Vec<PinAttempt>, CoreError> {
    let pin = pin_by_id(conn, pin_id)?.ok_or_else(|| CoreError::not_found("pin", pin_id))?;
    actor.require_admin_of(&pin.school_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, admission_number, success, reason, attempted_at
         FROM pin_attempts WHERE pin_id = ? ORDER BY attempted_at, rowid",
    )?;
    let rows = stmt
        .query_map([pin_id], |r| {
            Ok(PinAttempt {
                id: r.get(0)?,
                admission_number: r.get(1)?,
                success: r.get::<_, i64>(2)? != 0,
                reason: r.get(3)?,
                attempted_at: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_pins(conn: &Connection, actor: &Actor, ids: &[String]) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for id in ids {
        let res = (|| -> Result<(), CoreError> {
            let pin = pin_by_id(conn, id)?.ok_or_else(|| CoreError::not_found("pin", id.as_str()))?;
            actor.require_admin_of(&pin.school_id)?;
            conn.execute("DELETE FROM pins WHERE id = ?", [id])?;
            events::record_audit(
                conn,
                &actor.user_id,
                "pin.delete",
                "pin",
                Some(id),
                json!({
                    "schoolId": pin.school_id,
                    "usageCount": pin.usage_count,
                    "fingerprint": fingerprint(&pin.code),
                }),
            );
            Ok(())
        })();
        outcome.record(id, res);
    }
    tracing::info!(
        succeeded = outcome.succeeded.len(),
        failed = outcome.failed.len(),
        "pins deleted"
    );
    outcome
}

/// Outcomes of a refused check. Unknown codes and unknown admission numbers
/// share one public code and message.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("invalid pin or admission number")]
    NotFound,
    #[error("pin is not valid for this session and term")]
    ScopeMismatch,
    #[error("pin has expired")]
    Expired,
    #[error("pin has no attempts left")]
    AttemptsExhausted,
    #[error("pin has been used up")]
    UsageExhausted,
    #[error("invalid pin or admission number")]
    StudentNotFound,
    #[error("no result has been uploaded for this session and term")]
    ResultNotFound,
    #[error("result is not yet approved")]
    NotApproved,
    #[error("pin is busy; retry")]
    Contended,
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<rusqlite::Error> for CheckError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref f, _)
                if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                Self::Contended
            }
            other => Self::Core(CoreError::Storage(other)),
        }
    }
}

impl From<serde_json::Error> for CheckError {
    fn from(e: serde_json::Error) -> Self {
        Self::Core(CoreError::Encoding(e))
    }
}

impl CheckError {
    pub fn public_code(&self) -> &'static str {
        match self {
            Self::NotFound | Self::StudentNotFound => "not_found",
            Self::ScopeMismatch => "scope_mismatch",
            Self::Expired => "expired",
            Self::AttemptsExhausted => "attempts_exhausted",
            Self::UsageExhausted => "usage_exhausted",
            Self::ResultNotFound => "result_not_found",
            Self::NotApproved => "not_approved",
            Self::Contended => "conflict",
            Self::Core(e) => e.code(),
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::StudentNotFound => "student_not_found",
            other => other.public_code(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub code: String,
    pub admission_number: String,
    pub session: String,
    pub term: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: String,
    pub admission_number: String,
    pub full_name: String,
    pub class_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolSummary {
    pub id: String,
    pub name: String,
    pub logo_url: Option<String>,
}

/// What a guardian sees after a successful check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    pub student: StudentSummary,
    pub school: SchoolSummary,
    pub session: String,
    pub term: String,
    pub status: ResultStatus,
    pub subjects: Vec<SubjectEntry>,
    pub total_score: f64,
    pub average_score: f64,
    pub position: Option<i64>,
    pub total_students: Option<i64>,
    pub teacher_comment: Option<String>,
    pub principal_comment: Option<String>,
    pub attendance: Option<Attendance>,
    pub remaining_uses: i64,
}

pub fn check_result(conn: &Connection, req: &CheckRequest) -> Result<ResultView, CheckError> {
    let code = normalize_code(&req.code);
    let tag = fingerprint(&code);
    let mut outcome = Err(CheckError::Contended);
    for attempt in 1..=CHECK_RETRIES {
        match check_once(conn, &code, req) {
            Ok(view) => {
                tracing::info!(pin = %tag, remaining = view.remaining_uses, "result check succeeded");
                outcome = Ok(view);
                break;
            }
            Err(CheckError::Contended) => {
                tracing::warn!(pin = %tag, attempt, "pin counters moved under us; retrying");
            }
            Err(e) => {
                tracing::warn!(pin = %tag, reason = e.reason(), "result check refused");
                outcome = Err(e);
                break;
            }
        }
    }
    audit_check(conn, &code, &tag, req, &outcome);
    outcome
}

/// Every check lands in the audit log under the pin it named, success or
/// not. The code itself is never written; the fingerprint stands in.
fn audit_check(
    conn: &Connection,
    code: &str,
    tag: &str,
    req: &CheckRequest,
    outcome: &Result<ResultView, CheckError>,
) {
    let pin_id = match pin_by_code(conn, code) {
        Ok(pin) => pin.map(|p| p.id),
        Err(e) => {
            tracing::warn!(pin = %tag, error = %e, "pin lookup for check audit failed");
            None
        }
    };
    let (success, reason) = match outcome {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.reason())),
    };
    events::record_audit(
        conn,
        "anonymous",
        "pin.check",
        "pin",
        pin_id.as_deref(),
        json!({
            "fingerprint": tag,
            "admissionNumber": req.admission_number.trim(),
            "session": req.session.trim(),
            "term": req.term.trim(),
            "success": success,
            "reason": reason,
        }),
    );
}

fn check_once(conn: &Connection, code: &str, req: &CheckRequest) -> Result<ResultView, CheckError> {
    let tx = db::immediate_tx(conn)?;
    let pin = pin_by_code(&tx, code)?.ok_or(CheckError::NotFound)?;

    if pin.session != req.session.trim() || pin.term != req.term.trim() {
        return Err(CheckError::ScopeMismatch);
    }
    let now = Utc::now();
    if is_expired(&pin.expires_at, now) {
        return Err(CheckError::Expired);
    }
    if pin.attempt_count >= pin.max_attempts {
        return Err(CheckError::AttemptsExhausted);
    }
    if pin.usage_count >= pin.max_usage_count {
        return Err(CheckError::UsageExhausted);
    }

    let admission_number = req.admission_number.trim();
    let Some(student) = records::student_by_admission(&tx, &pin.school_id, admission_number)? else {
        consume(&tx, &pin, admission_number, None)?;
        tx.commit()?;
        return Err(CheckError::StudentNotFound);
    };

    let result = results::find_result(&tx, &student.id, &pin.session, &pin.term)?
        .ok_or(CheckError::ResultNotFound)?;
    if !result.status.is_visible_to_guardians() {
        return Err(CheckError::NotApproved);
    }

    let used_by = UsedBy {
        admission_number: student.admission_number.clone(),
        student_name: student.full_name(),
        used_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    consume(&tx, &pin, admission_number, Some(&used_by))?;

    let school = records::require_school(&tx, &pin.school_id)?;
    let class = records::require_class(&tx, &student.class_id)?;
    tx.commit()?;

    Ok(ResultView {
        student: StudentSummary {
            full_name: used_by.student_name,
            id: student.id,
            admission_number: student.admission_number,
            class_name: class.name,
        },
        school: SchoolSummary {
            id: school.id,
            name: school.name,
            logo_url: school.logo_url,
        },
        session: result.session,
        term: result.term,
        status: result.status,
        subjects: result.subjects,
        total_score: result.total_score,
        average_score: result.average_score,
        position: result.position,
        total_students: result.total_students,
        teacher_comment: result.teacher_comment,
        principal_comment: result.principal_comment,
        attendance: result.attendance,
        remaining_uses: pin.max_usage_count - pin.usage_count - 1,
    })
}

/// Records one attempt against the snapshot read at the top of the check.
/// A successful attempt also spends one use.
fn consume(
    conn: &Connection,
    pin: &Pin,
    admission_number: &str,
    used_by: Option<&UsedBy>,
) -> Result<(), CheckError> {
    let changed = match used_by {
        Some(used_by) => conn.execute(
            "UPDATE pins SET attempt_count = attempt_count + 1, usage_count = usage_count + 1,
                             used_by_json = ?
             WHERE id = ? AND attempt_count = ? AND usage_count = ?",
            (
                serde_json::to_string(used_by)?,
                &pin.id,
                pin.attempt_count,
                pin.usage_count,
            ),
        )?,
        None => conn.execute(
            "UPDATE pins SET attempt_count = attempt_count + 1
             WHERE id = ? AND attempt_count = ? AND usage_count = ?",
            (&pin.id, pin.attempt_count, pin.usage_count),
        )?,
    };
    if changed == 0 {
        return Err(CheckError::Contended);
    }
    conn.execute(
        "INSERT INTO pin_attempts(id, pin_id, admission_number, success, reason, attempted_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &pin.id,
            admission_number,
            used_by.is_some() as i64,
            used_by.is_none().then_some("student_not_found"),
            db::now_rfc3339(),
        ),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_the_unambiguous_alphabet() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 14, "{code}");
            let groups: Vec<&str> = code.split('-').collect();
            assert_eq!(groups.len(), 3);
            assert!(groups.iter().all(|g| g.len() == 4));
            for c in code.chars().filter(|c| *c != '-') {
                assert!(CODE_ALPHABET.contains(&(c as u8)), "{c} in {code}");
                assert!(!"0O1I".contains(c));
            }
        }
    }

    #[test]
    fn normalize_accepts_hand_typed_codes() {
        assert_eq!(normalize_code("  abcd-efgh-jklm "), "ABCD-EFGH-JKLM");
        assert_eq!(normalize_code("abcdefghjklm"), "ABCD-EFGH-JKLM");
        assert_eq!(normalize_code("ABCD EFGH JKLM"), "ABCD-EFGH-JKLM");
        assert_eq!(normalize_code("short"), "SHORT");
    }

    #[test]
    fn failed_attempt_allowance_sits_on_top_of_uses() {
        assert_eq!(effective_max_attempts(None, 1), 4);
        assert_eq!(effective_max_attempts(None, 5), 8);
        assert_eq!(effective_max_attempts(Some(10), 2), 12);
        assert_eq!(effective_max_attempts(Some(1), 4), 5);
    }

    #[test]
    fn never_expires_sentinel_is_in_the_future() {
        assert!(!is_expired(NEVER_EXPIRES, Utc::now()));
        assert!(is_expired("2000-01-01T00:00:00Z", Utc::now()));
        assert!(is_expired("not a date", Utc::now()));
    }

    #[test]
    fn fingerprint_is_stable_and_hides_the_code() {
        let code = "ABCD-EFGH-JKLM";
        let fp = fingerprint(code);
        assert_eq!(fp.len(), 12);
        assert_eq!(fp, fingerprint(code));
        assert_ne!(fp, fingerprint("ABCD-EFGH-JKLN"));
        assert!(!fp.contains("ABCD"));
    }

    #[test]
    fn unknown_code_and_unknown_student_look_the_same() {
        assert_eq!(
            CheckError::NotFound.public_code(),
            CheckError::StudentNotFound.public_code()
        );
        assert_eq!(
            CheckError::NotFound.to_string(),
            CheckError::StudentNotFound.to_string()
        );
        assert_eq!(CheckError::StudentNotFound.reason(), "student_not_found");
    }

    #[test]
    fn default_expiry_is_six_months_out() {
        let req = IssueRequest {
            school_id: "s".into(),
            session: "2024/2025".into(),
            term: "First".into(),
            quantity: 1,
            max_usage_count: 1,
            max_attempts: None,
            expires_at: None,
            never_expires: false,
        };
        let now = Utc::now();
        let at = resolve_expiry(&req, now).expect("expiry");
        let parsed = DateTime::parse_from_rfc3339(&at).expect("rfc3339");
        let days = (parsed.with_timezone(&Utc) - now).num_days();
        assert!((180..=185).contains(&days), "{days}");

        let never = IssueRequest {
            never_expires: true,
            ..req
        };
        assert_eq!(resolve_expiry(&never, now).expect("never"), NEVER_EXPIRES);
    }
}
