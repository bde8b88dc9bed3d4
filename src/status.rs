//! Closed status enumerations for sheets and results, with the transition
//! tables that decide which lifecycle moves are legal.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetAction {
    Submit,
    Approve,
    Reject,
}

const SHEET_TRANSITIONS: &[(SheetStatus, SheetAction, SheetStatus)] = &[
    (SheetStatus::Draft, SheetAction::Submit, SheetStatus::Submitted),
    (SheetStatus::Rejected, SheetAction::Submit, SheetStatus::Submitted),
    (SheetStatus::Submitted, SheetAction::Approve, SheetStatus::Approved),
    (SheetStatus::Submitted, SheetAction::Reject, SheetStatus::Rejected),
];

impl SheetAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl SheetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Entries may only be replaced while the creator holds the sheet.
    pub fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::Rejected)
    }

    pub fn apply(self, action: SheetAction) -> Result<Self, CoreError> {
        SHEET_TRANSITIONS
            .iter()
            .find(|(from, a, _)| *from == self && *a == action)
            .map(|(_, _, to)| *to)
            .ok_or(CoreError::InvalidState {
                entity: "sheet",
                from: self.as_str(),
                action: action.as_str(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Published,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultAction {
    Submit,
    Approve,
    Reject,
    Publish,
    /// Placement by the aggregator from approved sheets.
    Aggregate,
    /// The aggregator pulling back a result no approved sheet backs any more.
    Withdraw,
}

const RESULT_TRANSITIONS: &[(ResultStatus, ResultAction, ResultStatus)] = &[
    (ResultStatus::Draft, ResultAction::Submit, ResultStatus::Submitted),
    (ResultStatus::Rejected, ResultAction::Submit, ResultStatus::Submitted),
    (ResultStatus::Submitted, ResultAction::Approve, ResultStatus::Approved),
    (ResultStatus::Submitted, ResultAction::Reject, ResultStatus::Rejected),
    (ResultStatus::Approved, ResultAction::Publish, ResultStatus::Published),
    (ResultStatus::Draft, ResultAction::Aggregate, ResultStatus::Approved),
    (ResultStatus::Submitted, ResultAction::Aggregate, ResultStatus::Approved),
    (ResultStatus::Approved, ResultAction::Aggregate, ResultStatus::Approved),
    (ResultStatus::Rejected, ResultAction::Aggregate, ResultStatus::Approved),
    (ResultStatus::Draft, ResultAction::Withdraw, ResultStatus::Draft),
    (ResultStatus::Submitted, ResultAction::Withdraw, ResultStatus::Draft),
    (ResultStatus::Approved, ResultAction::Withdraw, ResultStatus::Draft),
    (ResultStatus::Rejected, ResultAction::Withdraw, ResultStatus::Draft),
];

impl ResultAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Publish => "publish",
            Self::Aggregate => "aggregate",
            Self::Withdraw => "withdraw",
        }
    }
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "published" => Some(Self::Published),
            _ => None,
        }
    }

    pub fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::Rejected)
    }

    /// Guardians only ever see school-approved content.
    pub fn is_visible_to_guardians(self) -> bool {
        matches!(self, Self::Approved | Self::Published)
    }

    pub fn apply(self, action: ResultAction) -> Result<Self, CoreError> {
        RESULT_TRANSITIONS
            .iter()
            .find(|(from, a, _)| *from == self && *a == action)
            .map(|(_, _, to)| *to)
            .ok_or(CoreError::InvalidState {
                entity: "result",
                from: self.as_str(),
                action: action.as_str(),
            })
    }
}

impl ToSql for SheetStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SheetStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()
            .and_then(|s| Self::parse(s).ok_or(FromSqlError::InvalidType))
    }
}

impl ToSql for ResultStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ResultStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()
            .and_then(|s| Self::parse(s).ok_or(FromSqlError::InvalidType))
    }
}
