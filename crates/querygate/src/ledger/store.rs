//! In-memory ledger storage and the approval queue.

use std::collections::{BTreeMap, HashMap, VecDeque};

use super::{LedgerError, QueryRecord, QueryStatus};
use crate::ids::{PrincipalId, QueryId};
use crate::undo::NotUndoableReason;

/// Ids awaiting review, oldest first.
#[derive(Debug, Default)]
pub struct ApprovalQueue {
    ids: VecDeque<QueryId>,
}

impl ApprovalQueue {
    pub fn push(&mut self, id: QueryId) {
        self.ids.push_back(id);
    }

    /// Remove `id`; returns whether it was queued.
    pub fn remove(&mut self, id: &QueryId) -> bool {
        match self.ids.iter().position(|queued| queued == id) {
            Some(pos) => {
                self.ids.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &QueryId) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryId> {
        self.ids.iter()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Records keyed by creation sequence, plus the approval queue.
#[derive(Debug, Default)]
pub struct QueryLedger {
    records: BTreeMap<u64, QueryRecord>,
    index: HashMap<QueryId, u64>,
    queue: ApprovalQueue,
}

impl QueryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new statement. Pending records join the approval queue.
    pub fn append(&mut self, record: QueryRecord) -> Result<&QueryRecord, LedgerError> {
        if self.index.contains_key(&record.id) {
            return Err(LedgerError::DuplicateId(record.id));
        }
        let seq = record.seq;
        if record.status == QueryStatus::PendingApproval {
            self.queue.push(record.id.clone());
        }
        self.index.insert(record.id.clone(), seq);
        Ok(self.records.entry(seq).or_insert(record))
    }

    pub fn get(&self, id: &QueryId) -> Option<&QueryRecord> {
        self.index.get(id).and_then(|seq| self.records.get(seq))
    }

    fn get_mut(&mut self, id: &QueryId) -> Result<&mut QueryRecord, LedgerError> {
        let seq = self
            .index
            .get(id)
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;
        self.records
            .get_mut(seq)
            .ok_or_else(|| LedgerError::NotFound(id.clone()))
    }

    /// Look up a record that must be in `expected` for the move to `to`.
    pub fn expect_status(
        &self,
        id: &QueryId,
        expected: QueryStatus,
        to: QueryStatus,
    ) -> Result<&QueryRecord, LedgerError> {
        let record = self.get(id).ok_or_else(|| LedgerError::NotFound(id.clone()))?;
        record.require(expected, to)?;
        Ok(record)
    }

    /// Records in creation order, optionally for one principal.
    pub fn list(&self, principal: Option<PrincipalId>) -> Vec<QueryRecord> {
        self.records
            .values()
            .filter(|r| principal.map_or(true, |p| r.principal_id == p))
            .cloned()
            .collect()
    }

    /// Pending records in queue order.
    pub fn pending(&self) -> Vec<QueryRecord> {
        self.queue
            .iter()
            .filter_map(|id| self.get(id))
            .cloned()
            .collect()
    }

    pub fn queue(&self) -> &ApprovalQueue {
        &self.queue
    }

    /// PENDING_APPROVAL → EXECUTED, leaving the queue.
    pub fn approve(
        &mut self,
        id: &QueryId,
        rows: u64,
        undo: Result<String, NotUndoableReason>,
    ) -> Result<&QueryRecord, LedgerError> {
        self.get_mut(id)?.mark_executed(rows, undo)?;
        self.queue.remove(id);
        self.get(id).ok_or_else(|| LedgerError::NotFound(id.clone()))
    }

    /// PENDING_APPROVAL → REJECTED, leaving the queue.
    pub fn reject(&mut self, id: &QueryId, reason: Option<String>) -> Result<&QueryRecord, LedgerError> {
        self.get_mut(id)?.mark_rejected(reason)?;
        self.queue.remove(id);
        self.get(id).ok_or_else(|| LedgerError::NotFound(id.clone()))
    }

    /// EXECUTED → UNDONE.
    pub fn mark_undone(&mut self, id: &QueryId) -> Result<&QueryRecord, LedgerError> {
        self.get_mut(id)?.mark_undone()?;
        self.get(id).ok_or_else(|| LedgerError::NotFound(id.clone()))
    }

    pub fn record_undo_failure(&mut self, id: &QueryId, message: impl Into<String>) -> Result<(), LedgerError> {
        self.get_mut(id)?.record_undo_failure(message);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::StatementKind;

    fn record(seq: u64, principal: i64, status: QueryStatus) -> QueryRecord {
        QueryRecord::new(seq, PrincipalId(principal), false, format!("stmt {}", seq), status)
            .with_kind(StatementKind::Update, format!("stmt {}", seq))
    }

    #[test]
    fn test_list_follows_creation_sequence_not_append_order() {
        let mut ledger = QueryLedger::new();
        ledger.append(record(3, 1, QueryStatus::Executed)).unwrap();
        ledger.append(record(1, 2, QueryStatus::Executed)).unwrap();
        ledger.append(record(2, 1, QueryStatus::Rejected)).unwrap();

        let seqs: Vec<u64> = ledger.list(None).iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let mine: Vec<u64> = ledger.list(Some(PrincipalId(1))).iter().map(|r| r.seq).collect();
        assert_eq!(mine, vec![2, 3]);
    }

    #[test]
    fn test_queue_tracks_pending_records() {
        let mut ledger = QueryLedger::new();
        let first = ledger.append(record(1, 5, QueryStatus::PendingApproval)).unwrap().id.clone();
        let second = ledger.append(record(2, 6, QueryStatus::PendingApproval)).unwrap().id.clone();
        ledger.append(record(3, 6, QueryStatus::Executed)).unwrap();

        let pending: Vec<QueryId> = ledger.pending().into_iter().map(|r| r.id).collect();
        assert_eq!(pending, vec![first.clone(), second.clone()]);

        ledger.reject(&first, Some("no".into())).unwrap();
        assert!(!ledger.queue().contains(&first));
        assert_eq!(ledger.get(&first).unwrap().status, QueryStatus::Rejected);

        ledger.approve(&second, 1, Err(NotUndoableReason::NoPriorState)).unwrap();
        assert!(ledger.queue().is_empty());
        assert_eq!(ledger.get(&second).unwrap().status, QueryStatus::Executed);
    }

    #[test]
    fn test_illegal_moves_are_rejected() {
        let mut ledger = QueryLedger::new();
        let id = ledger.append(record(1, 5, QueryStatus::Executed)).unwrap().id.clone();

        assert!(matches!(
            ledger.approve(&id, 0, Err(NotUndoableReason::NoPriorState)),
            Err(LedgerError::InvalidTransition(_))
        ));
        assert!(matches!(ledger.reject(&id, None), Err(LedgerError::InvalidTransition(_))));

        ledger.mark_undone(&id).unwrap();
        assert!(matches!(ledger.mark_undone(&id), Err(LedgerError::InvalidTransition(_))));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let mut ledger = QueryLedger::new();
        let missing = QueryId::new();
        assert!(ledger.get(&missing).is_none());
        assert_eq!(
            ledger.reject(&missing, None).unwrap_err(),
            LedgerError::NotFound(missing)
        );
    }

    #[test]
    fn test_duplicate_id_is_refused() {
        let mut ledger = QueryLedger::new();
        let first = record(1, 1, QueryStatus::Executed);
        let mut copy = first.clone();
        copy.seq = 2;
        ledger.append(first).unwrap();
        assert!(matches!(ledger.append(copy), Err(LedgerError::DuplicateId(_))));
        assert_eq!(ledger.len(), 1);
    }
}
