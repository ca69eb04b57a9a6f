//! Query Ledger
//!
//! Append-only record of every submitted statement and what became of it.
//! Records are never removed; undoing a statement is a status transition.
//!
//! # Lifecycle
//!
//! ```text
//! submit ──► EXECUTED ──undo──► UNDONE
//!    │
//!    ├─────► REJECTED
//!    │
//!    └─────► PENDING_APPROVAL ──approve──► EXECUTED
//!                     │
//!                     └────────reject────► REJECTED
//! ```

mod store;

pub use store::{ApprovalQueue, QueryLedger};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::ids::{PrincipalId, QueryId};
use crate::sql::StatementKind;
use crate::undo::NotUndoableReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Executed,
    PendingApproval,
    Rejected,
    Undone,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Executed => "EXECUTED",
            QueryStatus::PendingApproval => "PENDING_APPROVAL",
            QueryStatus::Rejected => "REJECTED",
            QueryStatus::Undone => "UNDONE",
        }
    }

    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryStatus::Rejected | QueryStatus::Undone)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Query {id} cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub id: QueryId,
    pub from: QueryStatus,
    pub to: QueryStatus,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Query not found: {0}")]
    NotFound(QueryId),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Query ID already recorded: {0}")]
    DuplicateId(QueryId),
}

/// One submitted statement.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRecord {
    pub id: QueryId,
    /// Creation order across the whole ledger.
    pub seq: u64,
    pub principal_id: PrincipalId,
    pub trusted: bool,
    pub original_sql: String,
    /// Text sent to the store after row scoping.
    pub effective_sql: String,
    /// Absent when the statement could not be classified.
    pub kind: Option<StatementKind>,
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_undoable: Option<NotUndoableReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueryRecord {
    pub fn new(
        seq: u64,
        principal_id: PrincipalId,
        trusted: bool,
        original_sql: impl Into<String>,
        status: QueryStatus,
    ) -> Self {
        let now = Utc::now();
        let original_sql = original_sql.into();
        Self {
            id: QueryId::new(),
            seq,
            principal_id,
            trusted,
            effective_sql: original_sql.clone(),
            original_sql,
            kind: None,
            status,
            approval_reason: None,
            error: None,
            rows_affected: None,
            undo_sql: None,
            not_undoable: None,
            undo_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_kind(mut self, kind: StatementKind, effective_sql: impl Into<String>) -> Self {
        self.kind = Some(kind);
        self.effective_sql = effective_sql.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_approval_reason(mut self, reason: impl Into<String>) -> Self {
        self.approval_reason = Some(reason.into());
        self
    }

    /// Attach the execution outcome: rows affected and the derived inverse.
    pub fn with_execution(mut self, rows: u64, undo: Result<String, NotUndoableReason>) -> Self {
        self.apply_execution(rows, undo);
        self
    }

    fn apply_execution(&mut self, rows: u64, undo: Result<String, NotUndoableReason>) {
        self.rows_affected = Some(rows);
        match undo {
            Ok(sql) => self.undo_sql = Some(sql),
            Err(reason) => self.not_undoable = Some(reason),
        }
    }

    fn transition(&mut self, from: QueryStatus, to: QueryStatus) -> Result<(), InvalidTransition> {
        if self.status != from {
            return Err(InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// PENDING_APPROVAL → EXECUTED.
    pub fn mark_executed(
        &mut self,
        rows: u64,
        undo: Result<String, NotUndoableReason>,
    ) -> Result<(), InvalidTransition> {
        self.transition(QueryStatus::PendingApproval, QueryStatus::Executed)?;
        self.apply_execution(rows, undo);
        Ok(())
    }

    /// PENDING_APPROVAL → REJECTED.
    pub fn mark_rejected(&mut self, reason: Option<String>) -> Result<(), InvalidTransition> {
        self.transition(QueryStatus::PendingApproval, QueryStatus::Rejected)?;
        self.error = reason;
        Ok(())
    }

    /// EXECUTED → UNDONE.
    pub fn mark_undone(&mut self) -> Result<(), InvalidTransition> {
        self.transition(QueryStatus::Executed, QueryStatus::Undone)?;
        self.undo_error = None;
        Ok(())
    }

    /// Note a failed undo attempt. The status stays EXECUTED.
    pub fn record_undo_failure(&mut self, message: impl Into<String>) {
        self.undo_error = Some(message.into());
        self.updated_at = Utc::now();
    }

    /// Fail unless the record is in `expected`; `to` names the attempted move.
    pub fn require(&self, expected: QueryStatus, to: QueryStatus) -> Result<(), InvalidTransition> {
        if self.status == expected {
            Ok(())
        } else {
            Err(InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> QueryRecord {
        QueryRecord::new(1, PrincipalId(5), false, "DELETE FROM purchases", QueryStatus::PendingApproval)
            .with_kind(StatementKind::Delete, "DELETE FROM purchases")
            .with_approval_reason("no WHERE clause")
    }

    #[test]
    fn test_pending_can_execute_once() {
        let mut record = pending();
        record
            .mark_executed(3, Err(NotUndoableReason::NoPriorState))
            .unwrap();
        assert_eq!(record.status, QueryStatus::Executed);
        assert_eq!(record.rows_affected, Some(3));
        assert_eq!(record.not_undoable, Some(NotUndoableReason::NoPriorState));

        let err = record.mark_executed(1, Err(NotUndoableReason::NoPriorState)).unwrap_err();
        assert_eq!(err.from, QueryStatus::Executed);
        assert_eq!(err.to, QueryStatus::Executed);
    }

    #[test]
    fn test_rejected_is_terminal() {
        let mut record = pending();
        record.mark_rejected(Some("not today".into())).unwrap();
        assert!(record.status.is_terminal());
        assert_eq!(record.error.as_deref(), Some("not today"));
        assert!(record.mark_undone().is_err());
        assert!(record.mark_rejected(None).is_err());
    }

    #[test]
    fn test_undo_only_from_executed_and_only_once() {
        let mut record = QueryRecord::new(1, PrincipalId(1), true, "CREATE TABLE t (x)", QueryStatus::Executed)
            .with_kind(StatementKind::CreateTable, "CREATE TABLE t (x)")
            .with_execution(0, Ok("DROP TABLE IF EXISTS t".into()));

        record.record_undo_failure("locked");
        assert_eq!(record.status, QueryStatus::Executed);
        assert_eq!(record.undo_error.as_deref(), Some("locked"));

        record.mark_undone().unwrap();
        assert_eq!(record.status, QueryStatus::Undone);
        assert!(record.undo_error.is_none());
        assert!(record.mark_undone().is_err());
    }

    #[test]
    fn test_status_serializes_in_screaming_case() {
        let json = serde_json::to_string(&QueryStatus::PendingApproval).unwrap();
        assert_eq!(json, "\"PENDING_APPROVAL\"");
    }
}
