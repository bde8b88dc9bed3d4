//! Notification and audit sinks. Both are outbox tables the surrounding
//! system drains; writes are fire-and-forget and never fail the operation
//! that emitted them.

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::db;

#[derive(Debug, Clone, Copy)]
pub enum Audience<'a> {
    User(&'a str),
    SchoolAdmins(&'a str),
}

pub fn notify(
    conn: &Connection,
    audience: Audience<'_>,
    kind: &str,
    title: &str,
    message: &str,
    data: Value,
) {
    let (audience_kind, user_id, school_id) = match audience {
        Audience::User(u) => ("user", Some(u), None),
        Audience::SchoolAdmins(s) => ("school_admins", None, Some(s)),
    };
    let res = conn.execute(
        "INSERT INTO notifications(id, audience, user_id, school_id, kind, title, message, data_json, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            audience_kind,
            user_id,
            school_id,
            kind,
            title,
            message,
            data.to_string(),
            db::now_rfc3339(),
        ),
    );
    if let Err(e) = res {
        tracing::warn!(kind, error = %e, "dropping notification");
    }
}

pub fn record_audit(
    conn: &Connection,
    actor_id: &str,
    action: &str,
    resource: &str,
    resource_id: Option<&str>,
    details: Value,
) {
    let res = conn.execute(
        "INSERT INTO audit_log(id, actor_id, action, resource, resource_id, details_json, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            actor_id,
            action,
            resource,
            resource_id,
            details.to_string(),
            db::now_rfc3339(),
        ),
    );
    if let Err(e) = res {
        tracing::warn!(action, resource, error = %e, "dropping audit record");
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRow {
    pub id: String,
    pub audience: String,
    pub user_id: Option<String>,
    pub school_id: Option<String>,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: Value,
    pub created_at: String,
}

/// Notifications addressed to a user, plus school-admin broadcasts when the
/// caller administers that school.
pub fn list_notifications(
    conn: &Connection,
    user_id: &str,
    admin_school_id: Option<&str>,
) -> rusqlite::Result<Vec<NotificationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, audience, user_id, school_id, kind, title, message, data_json, created_at
         FROM notifications
         WHERE user_id = ?1 OR (audience = 'school_admins' AND school_id = ?2)
         ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map((user_id, admin_school_id), |r| {
            let data_json: String = r.get(7)?;
            Ok(NotificationRow {
                id: r.get(0)?,
                audience: r.get(1)?,
                user_id: r.get(2)?,
                school_id: r.get(3)?,
                kind: r.get(4)?,
                title: r.get(5)?,
                message: r.get(6)?,
                data: serde_json::from_str(&data_json).unwrap_or(Value::Null),
                created_at: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub id: String,
    pub actor_id: String,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub details: Value,
    pub created_at: String,
}

pub fn list_audit(
    conn: &Connection,
    resource: Option<&str>,
    resource_id: Option<&str>,
    limit: i64,
) -> rusqlite::Result<Vec<AuditRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, actor_id, action, resource, resource_id, details_json, created_at
         FROM audit_log
         WHERE (?1 IS NULL OR resource = ?1) AND (?2 IS NULL OR resource_id = ?2)
         ORDER BY created_at, rowid
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map((resource, resource_id, limit), |r| {
            let details_json: String = r.get(5)?;
            Ok(AuditRow {
                id: r.get(0)?,
                actor_id: r.get(1)?,
                action: r.get(2)?,
                resource: r.get(3)?,
                resource_id: r.get(4)?,
                details: serde_json::from_str(&details_json).unwrap_or(Value::Null),
                created_at: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
