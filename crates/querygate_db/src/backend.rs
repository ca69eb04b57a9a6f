//! Statement execution backends.
//!
//! The gateway never talks to a driver directly: every statement goes through
//! [`QueryBackend::execute`], which returns the column names and rows (or the
//! affected row count) produced by exactly one statement.

use crate::error::{BackendError, Result};
use crate::types::{DbValue, QueryOutput};
use async_trait::async_trait;
use std::time::Instant;
use tracing::debug_span;

/// A store able to run one SQL statement at a time.
///
/// Implementations use the store's own transaction and locking; the gateway
/// does not group statements.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Execute a single statement.
    async fn execute(&self, sql: &str) -> Result<QueryOutput>;

    /// Backend name for logs.
    fn backend_name(&self) -> &'static str;
}

#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteBackend;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
    use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
    use std::path::Path;
    use tracing::{info, Instrument};

    /// SQLite backend over an sqlx connection pool.
    #[derive(Clone)]
    pub struct SqliteBackend {
        pool: SqlitePool,
    }

    impl std::fmt::Debug for SqliteBackend {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SqliteBackend")
                .field("size", &self.pool.size())
                .finish()
        }
    }

    impl SqliteBackend {
        /// Open a backend from a URL.
        ///
        /// Supported: `sqlite::memory:` and `sqlite:<path>`.
        pub async fn open_from_url(url: &str) -> Result<Self> {
            if url == "sqlite::memory:" || url == ":memory:" {
                return Self::open_memory().await;
            }
            if let Some(path) = url.strip_prefix("sqlite:") {
                return Self::open(Path::new(path)).await;
            }
            Err(BackendError::NotAvailable(format!(
                "Unsupported database URL: {}",
                url
            )))
        }

        /// Open or create a database file.
        pub async fn open(path: &Path) -> Result<Self> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let url = format!("sqlite:{}?mode=rwc", path.display());
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await?;

            info!(path = %path.display(), "SQLite database opened");
            Ok(Self { pool })
        }

        /// Open a private in-memory database.
        ///
        /// Every SQLite connection to `:memory:` is a separate database, so the
        /// pool is pinned to one connection that never expires.
        pub async fn open_memory() -> Result<Self> {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;

            info!("Opened in-memory SQLite database");
            Ok(Self { pool })
        }

        /// Run a multi-statement script (schema setup, seed data).
        ///
        /// This bypasses the gateway entirely and is meant for bootstrapping.
        pub async fn execute_batch(&self, sql: &str) -> Result<()> {
            sqlx::raw_sql(sql).execute(&self.pool).await?;
            Ok(())
        }

        pub fn pool(&self) -> &SqlitePool {
            &self.pool
        }

        pub async fn close(self) {
            self.pool.close().await;
        }

        async fn run(&self, sql: &str) -> Result<QueryOutput> {
            let mut conn = self.pool.acquire().await?;
            let statement = (&mut *conn).prepare(sql).await?;
            let columns: Vec<String> = statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();

            if columns.is_empty() {
                let done = statement.query().execute(&mut *conn).await?;
                return Ok(QueryOutput::affected(done.rows_affected()));
            }

            let rows = statement.query().fetch_all(&mut *conn).await?;
            let mut decoded = Vec::with_capacity(rows.len());
            for row in &rows {
                let mut values = Vec::with_capacity(columns.len());
                for index in 0..columns.len() {
                    values.push(decode_cell(row, index)?);
                }
                decoded.push(values);
            }

            Ok(QueryOutput {
                columns,
                rows: decoded,
                rows_affected: 0,
                truncated: false,
            })
        }
    }

    #[async_trait]
    impl QueryBackend for SqliteBackend {
        async fn execute(&self, sql: &str) -> Result<QueryOutput> {
            let span = debug_span!(
                "db.exec",
                op = sql_op_name(sql),
                sql_hash = %hash_sql(sql),
                duration_ms = tracing::field::Empty
            );
            let start = Instant::now();
            let result = self.run(sql).instrument(span.clone()).await;
            span.record("duration_ms", start.elapsed().as_millis() as u64);
            result
        }

        fn backend_name(&self) -> &'static str {
            "SQLite"
        }
    }

    fn decode_cell(row: &SqliteRow, index: usize) -> Result<DbValue> {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(DbValue::Null);
        }
        let type_name = raw.type_info().name().to_ascii_uppercase();

        let value = match type_name.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "INT8" => DbValue::Integer(row.try_get::<i64, _>(index)?),
            "REAL" | "FLOAT" | "DOUBLE" => DbValue::Real(row.try_get::<f64, _>(index)?),
            "BOOLEAN" => DbValue::Boolean(row.try_get::<bool, _>(index)?),
            "BLOB" => DbValue::Blob(row.try_get::<Vec<u8>, _>(index)?),
            _ => DbValue::Text(row.try_get::<String, _>(index)?),
        };
        Ok(value)
    }
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

/// FNV-1a 64-bit hash, used to correlate statements in logs without
/// printing their text.
pub fn hash_sql(sql: &str) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}
