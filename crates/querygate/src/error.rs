//! Gateway error taxonomy.

use thiserror::Error;

use crate::ids::QueryId;
use crate::ledger::{InvalidTransition, LedgerError};
use crate::scope::BypassRisk;
use crate::sql::ParseError;
use crate::undo::NotUndoableReason;
use querygate_db::BackendError;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The statement was recorded as rejected; nothing ran.
    #[error("Parse error: {source}")]
    Parse {
        id: Option<QueryId>,
        #[source]
        source: ParseError,
    },

    #[error("Malformed INSERT: {source}")]
    MalformedInsert {
        id: Option<QueryId>,
        #[source]
        source: ParseError,
    },

    #[error("Authorization bypass risk: {source}")]
    AuthorizationBypassRisk {
        id: Option<QueryId>,
        #[source]
        source: BypassRisk,
    },

    #[error("Query {id} cannot be undone: {reason}")]
    NotUndoable { id: QueryId, reason: NotUndoableReason },

    /// The inverse ran but touched a different number of rows than the
    /// original statement did. The record stays EXECUTED.
    #[error("Undo of query {id} matched {actual} rows, expected {expected}")]
    UndoMismatch { id: QueryId, expected: u64, actual: u64 },

    /// The store failed the statement; its message is passed through.
    #[error("Execution failed: {source}")]
    Execution {
        id: Option<QueryId>,
        #[source]
        source: BackendError,
    },

    #[error("Query not found: {0}")]
    NotFound(QueryId),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Classification failure, split by category.
    pub(crate) fn from_parse(id: Option<QueryId>, source: ParseError) -> Self {
        match source {
            ParseError::MalformedInsert { .. } => GatewayError::MalformedInsert { id, source },
            _ => GatewayError::Parse { id, source },
        }
    }

    /// Ledger id of the record this error was filed under, if any.
    pub fn query_id(&self) -> Option<&QueryId> {
        match self {
            GatewayError::Parse { id, .. }
            | GatewayError::MalformedInsert { id, .. }
            | GatewayError::AuthorizationBypassRisk { id, .. }
            | GatewayError::Execution { id, .. } => id.as_ref(),
            GatewayError::NotUndoable { id, .. } | GatewayError::UndoMismatch { id, .. } => Some(id),
            GatewayError::NotFound(id) => Some(id),
            GatewayError::InvalidTransition(t) => Some(&t.id),
            GatewayError::Internal(_) => None,
        }
    }

    /// Stable machine-readable category.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Parse { .. } => "parse_error",
            GatewayError::MalformedInsert { .. } => "malformed_insert",
            GatewayError::AuthorizationBypassRisk { .. } => "authorization_bypass_risk",
            GatewayError::NotUndoable { .. } => "not_undoable",
            GatewayError::UndoMismatch { .. } => "undo_mismatch",
            GatewayError::Execution { .. } => "execution_error",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::InvalidTransition(_) => "invalid_transition",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}

impl From<LedgerError> for GatewayError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(id) => GatewayError::NotFound(id),
            LedgerError::InvalidTransition(t) => GatewayError::InvalidTransition(t),
            LedgerError::DuplicateId(id) => {
                GatewayError::Internal(format!("query id {} recorded twice", id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_insert_is_its_own_category() {
        let err = GatewayError::from_parse(
            None,
            ParseError::MalformedInsert {
                row: 1,
                columns: 2,
                values: 1,
            },
        );
        assert_eq!(err.code(), "malformed_insert");

        let err = GatewayError::from_parse(None, ParseError::Empty);
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn test_ledger_errors_map_across() {
        let id = QueryId::new();
        let err: GatewayError = LedgerError::NotFound(id.clone()).into();
        assert!(matches!(err, GatewayError::NotFound(ref missing) if *missing == id));
        assert_eq!(err.query_id(), Some(&id));
    }

    #[test]
    fn test_not_undoable_message() {
        let err = GatewayError::NotUndoable {
            id: QueryId::new(),
            reason: NotUndoableReason::NoPriorState,
        };
        assert!(err.to_string().ends_with("no prior state captured"));
    }
}
