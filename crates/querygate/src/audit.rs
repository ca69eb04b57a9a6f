//! Audit Trail
//!
//! Optional append-only NDJSON record of ledger events. Never read back.
//!
//! # Log Format
//!
//! ```json
//! {"ts":"2026-10-16T09:12:00Z","event":"queued","id":"…","principal":5,"kind":"UPDATE","detail":"WHERE clause binds user_id to 2"}
//! {"ts":"2026-10-16T09:13:41Z","event":"approved","id":"…","principal":5,"kind":"UPDATE"}
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::ids::{PrincipalId, QueryId};
use crate::ledger::QueryRecord;
use crate::sql::StatementKind;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write audit entry: {0}")]
    Write(#[from] std::io::Error),

    #[error("Failed to serialize audit entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Audit log lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Submitted,
    Executed,
    Queued,
    Approved,
    Rejected,
    Undone,
    UndoFailed,
}

#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    ts: DateTime<Utc>,
    event: AuditEvent,
    id: &'a QueryId,
    principal: PrincipalId,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<StatementKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| AuditError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    /// Append one event for `record`. `detail` defaults to the record's
    /// error or approval reason.
    pub fn record(
        &self,
        event: AuditEvent,
        record: &QueryRecord,
        detail: Option<&str>,
    ) -> Result<(), AuditError> {
        let detail = detail
            .or(record.error.as_deref())
            .or(record.approval_reason.as_deref());
        let entry = AuditEntry {
            ts: Utc::now(),
            event,
            id: &record.id,
            principal: record.principal_id,
            kind: record.kind,
            detail,
        };
        let json = serde_json::to_string(&entry)?;

        let mut writer = self.writer.lock().map_err(|_| AuditError::Poisoned)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
