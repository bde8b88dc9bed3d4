use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors raised by the result lifecycle, sheet store, aggregator and
/// grading engine. Each variant maps onto one wire code.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("cannot {action} {entity} while {from}")]
    InvalidState {
        entity: &'static str,
        from: &'static str,
        action: &'static str,
    },

    #[error("{0}")]
    ValidationFailed(String),

    #[error("invalid score for {metric}: {value}")]
    InvalidScore { metric: String, value: f64 },

    #[error("precondition failed: {message}")]
    PreconditionFailed {
        precondition: &'static str,
        message: String,
    },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
        existing_id: Option<String>,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    pub fn conflict(message: impl Into<String>, existing_id: Option<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            existing_id,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState { .. } => "invalid_state",
            Self::ValidationFailed(_) => "validation_failed",
            Self::InvalidScore { .. } => "invalid_score",
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::Conflict { .. } => "conflict",
            Self::Storage(_) | Self::Encoding(_) | Self::Internal(_) => "db_error",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            Self::InvalidState {
                entity,
                from,
                action,
            } => Some(json!({ "entity": entity, "status": from, "action": action })),
            Self::InvalidScore { metric, value } => {
                Some(json!({ "metric": metric, "value": value }))
            }
            Self::PreconditionFailed { precondition, .. } => {
                Some(json!({ "precondition": precondition }))
            }
            Self::Conflict {
                existing_id: Some(existing),
                ..
            } => Some(json!({ "existingId": existing })),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// Per-item outcome of a bulk action. Items that fail never undo the ones
/// that already committed.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

impl BulkOutcome {
    pub fn record(&mut self, id: &str, outcome: Result<(), CoreError>) {
        match outcome {
            Ok(()) => self.succeeded.push(id.to_string()),
            Err(e) => self.failed.push(BulkFailure {
                id: id.to_string(),
                code: e.code().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_share_db_error_code() {
        let e = CoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(e.code(), "db_error");
        assert!(e.details().is_none());
    }

    #[test]
    fn bulk_outcome_keeps_failures_next_to_successes() {
        let mut outcome = BulkOutcome::default();
        outcome.record("a", Ok(()));
        outcome.record("b", Err(CoreError::not_found("sheet", "b")));
        outcome.record("c", Ok(()));
        assert_eq!(outcome.succeeded, vec!["a", "c"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].code, "not_found");
    }
}
