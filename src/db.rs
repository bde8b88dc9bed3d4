use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "results.sqlite3";

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    conn.busy_timeout(busy_timeout)?;
    // Several sidecars may share one workspace; WAL keeps readers off the writer's lock.
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates every table and index the sidecar uses and brings older
/// workspaces up to date.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            logo_url TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_school ON classes(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            admission_number TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(school_id, admission_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_sheets(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            created_by TEXT NOT NULL,
            status TEXT NOT NULL,
            rejection_reason TEXT,
            submitted_at TEXT,
            reviewed_by TEXT,
            reviewed_at TEXT,
            archived_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_sheets_tuple
         ON result_sheets(class_id, subject_id, session, term, created_by)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_sheets_scope
         ON result_sheets(school_id, session, term, status)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sheet_entries(
            sheet_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            component_scores_json TEXT NOT NULL,
            total REAL NOT NULL,
            grade TEXT NOT NULL,
            remark TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY(sheet_id, student_id),
            FOREIGN KEY(sheet_id) REFERENCES result_sheets(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sheet_entries_student ON sheet_entries(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            subjects_json TEXT NOT NULL,
            total_score REAL NOT NULL,
            average_score REAL NOT NULL,
            position INTEGER,
            total_students INTEGER,
            teacher_comment TEXT,
            principal_comment TEXT,
            attendance_json TEXT,
            status TEXT NOT NULL,
            source TEXT NOT NULL,
            uploaded_by TEXT NOT NULL,
            submitted_at TEXT,
            approved_by TEXT,
            approved_at TEXT,
            rejection_reason TEXT,
            published_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, session, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_scope ON results(school_id, session, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pins(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            school_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            max_attempts INTEGER NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            max_usage_count INTEGER NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 0,
            used_by_json TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pins_scope ON pins(school_id, session, term)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pin_attempts(
            id TEXT PRIMARY KEY,
            pin_id TEXT NOT NULL,
            admission_number TEXT NOT NULL,
            success INTEGER NOT NULL,
            reason TEXT,
            attempted_at TEXT NOT NULL,
            FOREIGN KEY(pin_id) REFERENCES pins(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pin_attempts_pin ON pin_attempts(pin_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS aggregation_runs(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            trigger TEXT NOT NULL,
            created_count INTEGER NOT NULL,
            updated_count INTEGER NOT NULL,
            skipped_published INTEGER NOT NULL,
            error_count INTEGER NOT NULL,
            withdrawn_count INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_aggregation_runs_withdrawn_count(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            audience TEXT NOT NULL,
            user_id TEXT,
            school_id TEXT,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            data_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log(
            id TEXT PRIMARY KEY,
            actor_id TEXT NOT NULL,
            action TEXT NOT NULL,
            resource TEXT NOT NULL,
            resource_id TEXT,
            details_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_resource ON audit_log(resource, resource_id)",
        [],
    )?;

    Ok(())
}

fn ensure_aggregation_runs_withdrawn_count(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "aggregation_runs", "withdrawn_count")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE aggregation_runs ADD COLUMN withdrawn_count INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Takes the write lock up front so read-decide-write sequences cannot
/// interleave with another writer on the same workspace.
pub fn immediate_tx(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

/// RFC 3339 UTC with fixed millisecond precision, so stored timestamps sort
/// lexicographically.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("malformed setting {key}"))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
