//! querygate: a mediated SQL gateway.
//!
//! Statements from untrusted principals pass through the gateway before they
//! reach the store:
//!
//! 1. [`sql::classify`] turns the text into a [`StatementDescriptor`], failing
//!    closed on anything it cannot read.
//! 2. [`scope::scope_select`] pins every owner-scoped table of a SELECT to the
//!    caller's `user_id`.
//! 3. [`ApprovalPolicy`] decides whether a write runs now or waits for review.
//! 4. Executed writes are filed in the [`QueryLedger`] with an inverse
//!    statement ([`undo::undo_statement`]) where one can be derived.
//!
//! A per-principal [`RateLimiter`] hands out advisory lag.
//!
//! ```rust,ignore
//! let backend = Arc::new(SqliteBackend::open_from_url("sqlite::memory:").await?);
//! let gateway = Gateway::new(backend, registry);
//! let submission = gateway.submit("SELECT * FROM purchases", PrincipalId(10), false).await?;
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod ledger;
pub mod policy;
pub mod protocol;
pub mod rate_limit;
pub mod schema;
pub mod scope;
pub mod sql;
pub mod undo;

pub use audit::{AuditError, AuditEvent, AuditLog};
pub use config::{ConfigError, DatabaseConfig, GatewayConfig, LimitsConfig};
pub use error::{GatewayError, Result};
pub use gateway::{inspect, Gateway, Inspection, ListScope, Submission};
pub use ids::{PrincipalId, QueryId};
pub use ledger::{QueryLedger, QueryRecord, QueryStatus};
pub use policy::{ApprovalPolicy, Decision, PolicyConfig};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use schema::{SchemaRegistry, TableDefinition, TableSchema, OWNER_COLUMN};
pub use sql::{classify, ConflictAction, ParseError, StatementDescriptor, StatementKind};
pub use undo::NotUndoableReason;

pub use querygate_db::{BackendError, DbValue, QueryBackend, QueryOutput};
