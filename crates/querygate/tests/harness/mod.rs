//! Shared fixtures for gateway integration tests.
//!
//! - [`pharmacy_gateway`]: in-memory SQLite seeded with the demo pharmacy
//! - [`RecordingBackend`]: records every statement it is asked to run and can
//!   be told to fail or stall

#![allow(dead_code)]

use async_trait::async_trait;
use querygate::{Gateway, GatewayConfig, LimitsConfig, SchemaRegistry};
use querygate_db::{BackendError, QueryBackend, QueryOutput, SqliteBackend};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SEED_SQL: &str = include_str!("../../../../demos/pharmacy/seed.sql");

pub fn demo_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/pharmacy/querygate.toml")
}

/// Demo configuration with the audit trail switched off.
pub fn demo_config() -> GatewayConfig {
    let mut config = GatewayConfig::load(&demo_config_path()).unwrap();
    config.audit_log_path = None;
    config
}

pub fn pharmacy_registry() -> SchemaRegistry {
    demo_config().registry().unwrap()
}

pub async fn seeded_sqlite() -> Arc<SqliteBackend> {
    let backend = SqliteBackend::open_memory().await.unwrap();
    backend.execute_batch(SEED_SQL).await.unwrap();
    Arc::new(backend)
}

pub async fn pharmacy_gateway() -> (Gateway, Arc<SqliteBackend>) {
    let backend = seeded_sqlite().await;
    let gateway = Gateway::from_config(backend.clone(), &demo_config()).unwrap();
    (gateway, backend)
}

/// Run a statement straight against the store, bypassing the gateway.
pub async fn direct(backend: &SqliteBackend, sql: &str) -> QueryOutput {
    backend.execute(sql).await.unwrap()
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    statements: Mutex<Vec<String>>,
    /// Statements containing this text fail with a database error.
    fail_on: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }

    pub fn stall(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.statements.lock().unwrap().len()
    }
}

#[async_trait]
impl QueryBackend for RecordingBackend {
    async fn execute(&self, sql: &str) -> querygate_db::Result<QueryOutput> {
        self.statements.lock().unwrap().push(sql.to_string());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.fail_on.lock().unwrap().clone();
        if let Some(needle) = failing {
            if sql.contains(&needle) {
                return Err(BackendError::database(format!("simulated failure near \"{}\"", needle)));
            }
        }

        let upper = sql.trim_start().to_ascii_uppercase();
        if upper.starts_with("SELECT COUNT(*) AS N FROM") {
            // Counts taken ahead of an undo: one row matches.
            Ok(QueryOutput {
                columns: vec!["n".to_string()],
                rows: vec![vec![querygate_db::DbValue::Integer(1)]],
                ..QueryOutput::default()
            })
        } else if upper.starts_with("SELECT") {
            Ok(QueryOutput {
                columns: vec!["n".to_string()],
                rows: (0..3).map(|i| vec![querygate_db::DbValue::Integer(i)]).collect(),
                ..QueryOutput::default()
            })
        } else {
            Ok(QueryOutput::affected(1))
        }
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

pub fn recording_gateway() -> (Gateway, Arc<RecordingBackend>) {
    let backend = RecordingBackend::new();
    let gateway = Gateway::new(backend.clone(), pharmacy_registry());
    (gateway, backend)
}

pub fn tight_limits(max_result_rows: usize, statement_timeout_ms: u64) -> LimitsConfig {
    LimitsConfig {
        max_result_rows,
        statement_timeout_ms,
    }
}
