//! Execution backends for querygate.
//!
//! The gateway consumes a single capability from the store: run one SQL
//! statement and hand back its columns and rows. This crate defines that
//! seam ([`QueryBackend`]) and ships the SQLite implementation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use querygate_db::{QueryBackend, SqliteBackend};
//!
//! let backend = SqliteBackend::open_from_url("sqlite::memory:").await?;
//! backend.execute_batch("CREATE TABLE drugs (drug_id INTEGER, drug_name TEXT)").await?;
//! let output = backend.execute("SELECT drug_name FROM drugs").await?;
//! ```

mod backend;
mod error;
mod types;

pub use backend::{hash_sql, QueryBackend};
#[cfg(feature = "sqlite")]
pub use backend::SqliteBackend;
pub use error::{BackendError, Result};
pub use types::{DbValue, QueryOutput};
