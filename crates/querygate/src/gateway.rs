//! The mediated gateway.
//!
//! Ties classification, row scoping, approval policy, execution, the ledger
//! and the rate limiter together behind one shareable handle.
//!
//! Locking: the ledger and its approval queue sit behind one async mutex.
//! `submit` does its analysis and execution without it and only takes it to
//! append the record; its creation sequence is drawn up front so listings
//! follow submission order. `approve` and `undo` hold the lock across
//! execution, so a pending record can never run twice.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

use querygate_db::{BackendError, DbValue, QueryBackend, QueryOutput};

use crate::audit::{AuditEvent, AuditLog};
use crate::config::{ConfigError, GatewayConfig, LimitsConfig};
use crate::error::{GatewayError, Result};
use crate::ids::{PrincipalId, QueryId};
use crate::ledger::{QueryLedger, QueryRecord, QueryStatus};
use crate::policy::{ApprovalPolicy, Decision, PolicyConfig};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::schema::SchemaRegistry;
use crate::scope::scope_select;
use crate::sql::{classify, StatementKind};
use crate::undo::{undo_statement, NotUndoableReason};

/// Which ledger entries to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    Principal(PrincipalId),
    All,
}

/// Result of a submission that was not an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Submission {
    Executed {
        id: QueryId,
        effective_sql: String,
        output: QueryOutput,
    },
    /// Queued for human review; nothing ran.
    Pending { id: QueryId, reason: String },
}

impl Submission {
    pub fn id(&self) -> &QueryId {
        match self {
            Submission::Executed { id, .. } | Submission::Pending { id, .. } => id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Submission::Pending { .. })
    }

    pub fn output(&self) -> Option<&QueryOutput> {
        match self {
            Submission::Executed { output, .. } => Some(output),
            Submission::Pending { .. } => None,
        }
    }
}

/// Dry-run analysis of one statement.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub kind: StatementKind,
    pub tables: Vec<String>,
    pub has_where: bool,
    pub effective_sql: String,
    /// Why the statement would be queued; `None` means it would run.
    pub approval_reason: Option<String>,
    pub undo_sql: Option<String>,
    pub not_undoable: Option<NotUndoableReason>,
}

/// Classify, scope, decide and derive the inverse without executing.
pub fn inspect(
    sql: &str,
    principal: PrincipalId,
    trusted: bool,
    registry: &SchemaRegistry,
    policy: &ApprovalPolicy,
) -> Result<Inspection> {
    let desc = classify(sql).map_err(|e| GatewayError::from_parse(None, e))?;
    let effective_sql = scope_select(&desc, registry, principal, trusted)
        .map_err(|source| GatewayError::AuthorizationBypassRisk { id: None, source })?;
    let approval_reason = match policy.decide(&desc, principal, trusted, registry) {
        Decision::Execute => None,
        Decision::RequireApproval(reason) => Some(reason),
    };
    let undo = undo_statement(&desc);

    Ok(Inspection {
        kind: desc.kind,
        tables: desc.tables.iter().map(|t| t.name.clone()).collect(),
        has_where: desc.has_where,
        effective_sql,
        approval_reason,
        undo_sql: undo.clone().ok(),
        not_undoable: undo.err(),
    })
}

pub struct Gateway {
    backend: Arc<dyn QueryBackend>,
    registry: SchemaRegistry,
    policy: ApprovalPolicy,
    limiter: RateLimiter,
    limits: LimitsConfig,
    ledger: Mutex<QueryLedger>,
    next_seq: AtomicU64,
    audit: Option<AuditLog>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("backend", &self.backend.backend_name())
            .field("tables", &self.registry.len())
            .field("audit", &self.audit.as_ref().map(AuditLog::path))
            .finish()
    }
}

impl Gateway {
    /// Gateway with default policy, rate limits and output limits.
    pub fn new(backend: Arc<dyn QueryBackend>, registry: SchemaRegistry) -> Self {
        Self {
            backend,
            registry,
            policy: ApprovalPolicy::default(),
            limiter: RateLimiter::default(),
            limits: LimitsConfig::default(),
            ledger: Mutex::new(QueryLedger::new()),
            next_seq: AtomicU64::new(1),
            audit: None,
        }
    }

    /// Gateway configured from `config`, opening the audit trail if one is set.
    pub fn from_config(
        backend: Arc<dyn QueryBackend>,
        config: &GatewayConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let mut gateway = Self::new(backend, config.registry()?)
            .with_policy(config.policy.clone())
            .with_rate_limit(config.rate_limit.clone())
            .with_limits(config.limits.clone());
        if let Some(path) = &config.audit_log_path {
            gateway = gateway.with_audit_log(AuditLog::open(path)?);
        }
        Ok(gateway)
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = ApprovalPolicy::new(policy);
        self
    }

    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.limiter = RateLimiter::new(config);
        self
    }

    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// Submit one statement on behalf of `principal`.
    pub async fn submit(&self, sql: &str, principal: PrincipalId, trusted: bool) -> Result<Submission> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        let desc = match classify(sql) {
            Ok(desc) => desc,
            Err(e) => {
                warn!(principal = %principal, error = %e, "Rejected unparsable statement");
                let record = QueryRecord::new(seq, principal, trusted, sql, QueryStatus::Rejected)
                    .with_error(e.to_string());
                let id = self.file(record, AuditEvent::Rejected).await?;
                return Err(GatewayError::from_parse(Some(id), e));
            }
        };

        let effective_sql = match scope_select(&desc, &self.registry, principal, trusted) {
            Ok(effective) => effective,
            Err(risk) => {
                warn!(principal = %principal, reason = %risk, "Refused statement that cannot be scoped");
                let record = QueryRecord::new(seq, principal, trusted, sql, QueryStatus::Rejected)
                    .with_kind(desc.kind, sql)
                    .with_error(format!("authorization bypass risk: {}", risk));
                let id = self.file(record, AuditEvent::Rejected).await?;
                return Err(GatewayError::AuthorizationBypassRisk {
                    id: Some(id),
                    source: risk,
                });
            }
        };

        if let Decision::RequireApproval(reason) =
            self.policy.decide(&desc, principal, trusted, &self.registry)
        {
            let record = QueryRecord::new(seq, principal, trusted, sql, QueryStatus::PendingApproval)
                .with_kind(desc.kind, effective_sql)
                .with_approval_reason(reason.clone());
            let id = self.file(record, AuditEvent::Queued).await?;
            info!(
                query_id = %id,
                principal = %principal,
                kind = %desc.kind,
                "Queued for approval: {}",
                reason
            );
            return Ok(Submission::Pending { id, reason });
        }

        match self.run(&effective_sql).await {
            Ok(output) => {
                let record = QueryRecord::new(seq, principal, trusted, sql, QueryStatus::Executed)
                    .with_kind(desc.kind, effective_sql.clone())
                    .with_execution(output.rows_affected, undo_statement(&desc));
                let id = self.file(record, AuditEvent::Executed).await?;
                info!(
                    query_id = %id,
                    principal = %principal,
                    kind = %desc.kind,
                    rows = output.row_count(),
                    "Executed"
                );
                Ok(Submission::Executed {
                    id,
                    effective_sql,
                    output,
                })
            }
            Err(e) => {
                warn!(principal = %principal, error = %e, "Statement failed in the store");
                let record = QueryRecord::new(seq, principal, trusted, sql, QueryStatus::Rejected)
                    .with_kind(desc.kind, effective_sql)
                    .with_error(e.to_string());
                let id = self.file(record, AuditEvent::Rejected).await?;
                Err(GatewayError::Execution {
                    id: Some(id),
                    source: e,
                })
            }
        }
    }

    /// Execute a pending statement. A store failure rejects it.
    pub async fn approve(&self, id: &QueryId) -> Result<QueryOutput> {
        let mut ledger = self.ledger.lock().await;
        let sql = ledger
            .expect_status(id, QueryStatus::PendingApproval, QueryStatus::Executed)?
            .effective_sql
            .clone();

        match self.run(&sql).await {
            Ok(output) => {
                let undo = classify(&sql)
                    .map_err(|_| NotUndoableReason::Unsupported)
                    .and_then(|desc| undo_statement(&desc));
                let record = ledger.approve(id, output.rows_affected, undo)?;
                self.audit(AuditEvent::Approved, record, None);
                info!(query_id = %id, rows_affected = output.rows_affected, "Approved and executed");
                Ok(output)
            }
            Err(e) => {
                let record = ledger.reject(id, Some(e.to_string()))?;
                self.audit(AuditEvent::Rejected, record, None);
                warn!(query_id = %id, error = %e, "Approved statement failed in the store");
                Err(GatewayError::Execution {
                    id: Some(id.clone()),
                    source: e,
                })
            }
        }
    }

    /// Reject a pending statement without running it.
    pub async fn reject(&self, id: &QueryId, reason: Option<String>) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        let record = ledger.reject(id, reason)?;
        self.audit(AuditEvent::Rejected, record, None);
        info!(
            "Rejected query: {} (reason: {})",
            id,
            record.error.as_deref().unwrap_or("none")
        );
        Ok(())
    }

    /// Run the stored inverse of an executed statement. Returns the inverse.
    pub async fn undo(&self, id: &QueryId) -> Result<String> {
        let mut ledger = self.ledger.lock().await;
        let record = ledger.expect_status(id, QueryStatus::Executed, QueryStatus::Undone)?;

        let Some(undo_sql) = record.undo_sql.clone() else {
            let reason = record.not_undoable.unwrap_or(NotUndoableReason::Unsupported);
            ledger.record_undo_failure(id, reason.to_string())?;
            if let Some(record) = ledger.get(id) {
                self.audit(AuditEvent::UndoFailed, record, Some(&reason.to_string()));
            }
            warn!(query_id = %id, %reason, "Undo refused");
            return Err(GatewayError::NotUndoable {
                id: id.clone(),
                reason,
            });
        };

        // Only an INSERT's count is comparable; sqlite3_changes() is stale after DDL.
        let expected = match record.kind {
            Some(StatementKind::Insert) => record.rows_affected,
            _ => None,
        };

        match self.run_inverse(id, &undo_sql, expected).await {
            Ok(()) => {
                let record = ledger.mark_undone(id)?;
                self.audit(AuditEvent::Undone, record, Some(&undo_sql));
                info!(query_id = %id, "Undone");
                Ok(undo_sql)
            }
            Err(err) => {
                ledger.record_undo_failure(id, err.to_string())?;
                if let Some(record) = ledger.get(id) {
                    self.audit(AuditEvent::UndoFailed, record, Some(&err.to_string()));
                }
                warn!(query_id = %id, error = %err, "Undo failed");
                Err(err)
            }
        }
    }

    /// Ledger entries in creation order.
    pub async fn list_queries(&self, scope: ListScope) -> Vec<QueryRecord> {
        let principal = match scope {
            ListScope::Principal(p) => Some(p),
            ListScope::All => None,
        };
        self.ledger.lock().await.list(principal)
    }

    /// Pending entries in queue order.
    pub async fn pending_queries(&self) -> Vec<QueryRecord> {
        self.ledger.lock().await.pending()
    }

    pub async fn get(&self, id: &QueryId) -> Option<QueryRecord> {
        self.ledger.lock().await.get(id).cloned()
    }

    /// Advisory lag for a call by `principal` at `now`.
    pub fn observe_call(&self, principal: PrincipalId, now: Instant) -> Duration {
        self.limiter.observe_call(principal, now)
    }

    pub fn observe_trusted_call(&self, principal: PrincipalId, now: Instant) -> Duration {
        self.limiter.observe_trusted_call(principal, now)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn inspect(&self, sql: &str, principal: PrincipalId, trusted: bool) -> Result<Inspection> {
        inspect(sql, principal, trusted, &self.registry, &self.policy)
    }

    async fn run(&self, sql: &str) -> std::result::Result<QueryOutput, BackendError> {
        let timeout_ms = self.limits.statement_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.backend.execute(sql)).await {
            Ok(Ok(output)) => Ok(output.enforce_row_limit(self.limits.max_result_rows)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BackendError::Timeout(timeout_ms)),
        }
    }

    /// Run an inverse, refusing it when it would touch a different number of
    /// rows than the statement it reverses.
    async fn run_inverse(&self, id: &QueryId, undo_sql: &str, expected: Option<u64>) -> Result<()> {
        let execution = |source| GatewayError::Execution {
            id: Some(id.clone()),
            source,
        };
        let mismatch = |expected, actual| GatewayError::UndoMismatch {
            id: id.clone(),
            expected,
            actual,
        };

        if let Some(expected) = expected {
            if let Some(actual) = self.rows_matching(undo_sql).await.map_err(execution)? {
                if actual != expected {
                    return Err(mismatch(expected, actual));
                }
            }
        }

        let output = self.run(undo_sql).await.map_err(execution)?;
        match expected {
            Some(expected) if expected != output.rows_affected => {
                Err(mismatch(expected, output.rows_affected))
            }
            _ => Ok(()),
        }
    }

    /// Rows an inverse `DELETE` would remove, counted before it runs.
    async fn rows_matching(&self, delete_sql: &str) -> std::result::Result<Option<u64>, BackendError> {
        let Some(rest) = delete_sql.strip_prefix("DELETE FROM ") else {
            return Ok(None);
        };
        let output = self.run(&format!("SELECT COUNT(*) AS n FROM {}", rest)).await?;
        Ok(match output.cell(0, "n") {
            Some(DbValue::Integer(n)) => u64::try_from(*n).ok(),
            _ => None,
        })
    }

    /// Append a new record and write its audit lines.
    async fn file(&self, record: QueryRecord, outcome: AuditEvent) -> Result<QueryId> {
        let mut ledger = self.ledger.lock().await;
        let record = ledger.append(record)?;
        self.audit(AuditEvent::Submitted, record, Some(&record.original_sql));
        self.audit(outcome, record, None);
        Ok(record.id.clone())
    }

    fn audit(&self, event: AuditEvent, record: &QueryRecord, detail: Option<&str>) {
        if let Some(log) = &self.audit {
            if let Err(e) = log.record(event, record, detail) {
                warn!(error = %e, "Failed to write audit entry");
            }
        }
    }
}
