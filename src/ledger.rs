//! Durable, transactional persistence for everything the rest of the
//! pipeline needs to remember. Backed by `sled`'s embedded, ACID,
//! single-writer-per-tree store.
//!
//! Window queries (`query_spend`, `count_transactions`) are served by a
//! single secondary index tree keyed `principal || timestamp_nanos || id`,
//! so a `[start, end)` scan is a sorted-range iteration rather than a full
//! table scan — this is what keeps the cap checks in the controller
//! cheap even as history grows (design note 9).

use crate::approval::ApprovalStatus;
use crate::error::LedgerError;
use crate::evaluation::RuleEvaluation;
use crate::event::Event;
use crate::principal::Principal;
use crate::rule::Rule;
use crate::spending::SpendingRecord;
use crate::timestamp::TimeStamp;
use crate::transaction::{TransactionRecord, TransactionStatus};
use crate::approval::ApprovalRequest;
use chrono::{DateTime, Utc};
use sled::transaction::Transactional;

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn id_from_key(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

fn principal_tag(p: Principal) -> u8 {
    match p {
        Principal::Human => 0,
        Principal::Ai => 1,
    }
}

fn window_index_key(principal: Principal, at: TimeStamp<Utc>, id: u64) -> [u8; 17] {
    let mut key = [0u8; 17];
    key[0] = principal_tag(principal);
    let nanos = at.to_datetime_utc().timestamp_nanos_opt().unwrap_or(0);
    key[1..9].copy_from_slice(&(nanos as u64).to_be_bytes());
    key[9..17].copy_from_slice(&id.to_be_bytes());
    key
}

fn window_bounds(principal: Principal, start: DateTime<Utc>, end: DateTime<Utc>) -> ([u8; 9], [u8; 9]) {
    let mut lo = [0u8; 9];
    lo[0] = principal_tag(principal);
    lo[1..9].copy_from_slice(&(start.timestamp_nanos_opt().unwrap_or(0) as u64).to_be_bytes());
    let mut hi = [0u8; 9];
    hi[0] = principal_tag(principal);
    hi[1..9].copy_from_slice(&(end.timestamp_nanos_opt().unwrap_or(0) as u64).to_be_bytes());
    (lo, hi)
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, LedgerError> {
    minicbor::to_vec(value).map_err(|e| LedgerError::Encoding(e.to_string()))
}

fn decode<'b, T: minicbor::Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T, LedgerError> {
    minicbor::decode(bytes).map_err(|e| LedgerError::Encoding(e.to_string()))
}

/// Fields that may change on a status transition; everything else about a
/// `TransactionRecord` is immutable once written.
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub hash: Option<String>,
    pub gas_used: Option<u64>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
}

pub struct Ledger {
    #[allow(dead_code)]
    db: sled::Db,
    transactions: sled::Tree,
    transactions_by_hash: sled::Tree,
    events: sled::Tree,
    rules: sled::Tree,
    rule_evaluations: sled::Tree,
    spending_records: sled::Tree,
    spending_index: sled::Tree,
    approvals: sled::Tree,
}

impl Ledger {
    pub fn open(db: sled::Db) -> Result<Self, LedgerError> {
        let open_tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| LedgerError::Storage(e.to_string()))
        };
        Ok(Self {
            transactions: open_tree("transactions")?,
            transactions_by_hash: open_tree("transactions_by_hash")?,
            events: open_tree("events")?,
            rules: open_tree("rules")?,
            rule_evaluations: open_tree("rule_evaluations")?,
            spending_records: open_tree("spending_records")?,
            spending_index: open_tree("spending_index")?,
            approvals: open_tree("approvals")?,
            db,
        })
    }

    fn next_id(&self) -> Result<u64, LedgerError> {
        self.db
            .generate_id()
            .map_err(|e| LedgerError::Storage(e.to_string()))
    }

    // ---- transactions ----

    pub fn insert_transaction(&self, mut record: TransactionRecord) -> Result<u64, LedgerError> {
        record.check_invariants()?;
        let id = self.next_id()?;
        record.id = id;
        let key = id_key(id);
        let value = encode(&record)?;

        if let Some(hash) = record.hash.clone() {
            let hash_key = hash.into_bytes();
            (&self.transactions, &self.transactions_by_hash)
                .transaction(|(tx_tree, hash_tree)| {
                    if hash_tree.get(hash_key.as_slice())?.is_some() {
                        return Err(sled::transaction::ConflictableTransactionError::Abort(()));
                    }
                    tx_tree.insert(&key, value.as_slice())?;
                    hash_tree.insert(hash_key.as_slice(), &key)?;
                    Ok(())
                })
                .map_err(|e| match e {
                    sled::transaction::TransactionError::Abort(()) => {
                        LedgerError::DuplicateHash(record.hash.clone().unwrap_or_default())
                    }
                    sled::transaction::TransactionError::Storage(se) => {
                        LedgerError::Storage(se.to_string())
                    }
                })?;
        } else {
            self.transactions
                .insert(key, value)
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
        }

        tracing::debug!(transaction_id = id, "inserted transaction row");
        Ok(id)
    }

    pub fn get_transaction(&self, id: u64) -> Result<TransactionRecord, LedgerError> {
        let bytes = self
            .transactions
            .get(id_key(id))
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
        decode(&bytes)
    }

    pub fn get_transaction_by_hash(&self, hash: &str) -> Result<TransactionRecord, LedgerError> {
        let id_bytes = self
            .transactions_by_hash
            .get(hash.as_bytes())
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .ok_or_else(|| LedgerError::TransactionNotFound(hash.to_string()))?;
        let bytes = self
            .transactions
            .get(&id_bytes)
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .ok_or_else(|| LedgerError::TransactionNotFound(hash.to_string()))?;
        decode(&bytes)
    }

    pub fn list_transactions(&self) -> Result<Vec<TransactionRecord>, LedgerError> {
        let mut out = vec![];
        for item in self.transactions.iter() {
            let (_, value) = item.map_err(|e| LedgerError::Storage(e.to_string()))?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    /// Atomic status transition. Rejects a transition the state machine
    /// disallows — that is a programming error and is surfaced as
    /// `LedgerError::IllegalTransition`, never silently dropped.
    pub fn update_transaction_status(
        &self,
        id: u64,
        new_status: TransactionStatus,
        patch: TransactionPatch,
    ) -> Result<TransactionRecord, LedgerError> {
        let mut record = self.get_transaction(id)?;
        if !record.status.can_transition_to(new_status) {
            return Err(LedgerError::IllegalTransition {
                from: record.status.to_string(),
                to: new_status.to_string(),
            });
        }
        record.status = new_status;
        record.updated_at = TimeStamp::new();
        if let Some(hash) = patch.hash {
            record.hash = Some(hash);
        }
        if let Some(gas_used) = patch.gas_used {
            record.gas_used = Some(gas_used);
        }
        if let Some(block_number) = patch.block_number {
            record.block_number = Some(block_number);
        }
        if let Some(error) = patch.error {
            record.error = Some(error);
        }
        record.check_invariants()?;

        let key = id_key(id);
        let value = encode(&record)?;
        if let Some(hash) = record.hash.clone() {
            let hash_key = hash.into_bytes();
            (&self.transactions, &self.transactions_by_hash)
                .transaction(|(tx_tree, hash_tree)| {
                    tx_tree.insert(&key, value.as_slice())?;
                    hash_tree.insert(hash_key.as_slice(), &key)?;
                    Ok::<_, sled::transaction::ConflictableTransactionError<()>>(())
                })
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
        } else {
            self.transactions
                .insert(key, value)
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
        }
        tracing::info!(transaction_id = id, status = %record.status, "transaction status transition");
        Ok(record)
    }

    /// Insert a record and a spending record in one atomic step — the
    /// cap check and the spend write must be indivisible per principal.
    pub fn transition_to_submitted_with_spend(
        &self,
        id: u64,
        hash: String,
        principal: Principal,
        amount: u128,
    ) -> Result<(TransactionRecord, u64), LedgerError> {
        let mut record = self.get_transaction(id)?;
        if !record.status.can_transition_to(TransactionStatus::Submitted) {
            return Err(LedgerError::IllegalTransition {
                from: record.status.to_string(),
                to: TransactionStatus::Submitted.to_string(),
            });
        }
        record.status = TransactionStatus::Submitted;
        record.hash = Some(hash.clone());
        record.updated_at = TimeStamp::new();
        record.check_invariants()?;

        let spend_id = self.next_id()?;
        let spend_record = SpendingRecord {
            id: spend_id,
            principal,
            amount,
            recorded_at: record.updated_at,
        };

        let tx_key = id_key(id);
        let tx_value = encode(&record)?;
        let hash_key = hash.into_bytes();
        let spend_key = id_key(spend_id);
        let spend_value = encode(&spend_record)?;
        let index_key = window_index_key(principal, record.updated_at, spend_id);

        (
            &self.transactions,
            &self.transactions_by_hash,
            &self.spending_records,
            &self.spending_index,
        )
            .transaction(|(tx_tree, hash_tree, spend_tree, index_tree)| {
                tx_tree.insert(&tx_key, tx_value.as_slice())?;
                hash_tree.insert(hash_key.as_slice(), &tx_key)?;
                spend_tree.insert(&spend_key, spend_value.as_slice())?;
                index_tree.insert(&index_key[..], amount.to_be_bytes().to_vec())?;
                Ok::<_, sled::transaction::ConflictableTransactionError<()>>(())
            })
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        tracing::info!(transaction_id = id, spend_id, "submitted with spend recorded");
        Ok((record, spend_id))
    }

    // ---- spending / count windows ----

    pub fn query_spend(
        &self,
        principal: Principal,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<u128, LedgerError> {
        let (lo, hi) = window_bounds(principal, window_start, window_end);
        let mut total: u128 = 0;
        for item in self.spending_index.range(lo.to_vec()..hi.to_vec()) {
            let (_, value) = item.map_err(|e| LedgerError::Storage(e.to_string()))?;
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&value);
            total += u128::from_be_bytes(buf);
        }
        Ok(total)
    }

    /// Counts submitted transactions in the window. A transaction is only
    /// ever indexed here at the moment its spending record is written, so
    /// this shares the spend index rather than duplicating it.
    pub fn count_transactions(
        &self,
        principal: Principal,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<u64, LedgerError> {
        let (lo, hi) = window_bounds(principal, window_start, window_end);
        Ok(self.spending_index.range(lo.to_vec()..hi.to_vec()).count() as u64)
    }

    pub fn insert_spending_record(&self, mut record: SpendingRecord) -> Result<u64, LedgerError> {
        let id = self.next_id()?;
        record.id = id;
        let key = id_key(id);
        let value = encode(&record)?;
        let index_key = window_index_key(record.principal, record.recorded_at, id);
        (&self.spending_records, &self.spending_index)
            .transaction(|(spend_tree, index_tree)| {
                spend_tree.insert(&key, value.as_slice())?;
                index_tree.insert(&index_key[..], record.amount.to_be_bytes().to_vec())?;
                Ok::<_, sled::transaction::ConflictableTransactionError<()>>(())
            })
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(id)
    }

    // ---- rule evaluations ----

    pub fn insert_rule_evaluation(&self, mut eval: RuleEvaluation) -> Result<u64, LedgerError> {
        let id = self.next_id()?;
        eval.id = id;
        let value = encode(&eval)?;
        self.rule_evaluations
            .insert(id_key(id), value)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(id)
    }

    pub fn list_rule_evaluations_for(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<RuleEvaluation>, LedgerError> {
        let mut out = vec![];
        for item in self.rule_evaluations.iter() {
            let (_, value) = item.map_err(|e| LedgerError::Storage(e.to_string()))?;
            let eval: RuleEvaluation = decode(&value)?;
            if eval.correlation_id == correlation_id {
                out.push(eval);
            }
        }
        Ok(out)
    }

    // ---- events ----

    pub fn insert_event(&self, mut event: Event) -> Result<u64, LedgerError> {
        let id = self.next_id()?;
        event.id = id;
        let value = encode(&event)?;
        self.events
            .insert(id_key(id), value)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(id)
    }

    // ---- rule CRUD ----

    pub fn create_rule(&self, mut rule: Rule) -> Result<u64, LedgerError> {
        let id = self.next_id()?;
        rule.id = id;
        let value = encode(&rule)?;
        self.rules
            .insert(id_key(id), value)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(id)
    }

    pub fn get_rule(&self, id: u64) -> Result<Rule, LedgerError> {
        let bytes = self
            .rules
            .get(id_key(id))
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .ok_or(LedgerError::RuleNotFound(id))?;
        decode(&bytes)
    }

    pub fn list_rules(&self, enabled_only: bool) -> Result<Vec<Rule>, LedgerError> {
        let mut out = vec![];
        for item in self.rules.iter() {
            let (_, value) = item.map_err(|e| LedgerError::Storage(e.to_string()))?;
            let rule: Rule = decode(&value)?;
            if !enabled_only || rule.enabled {
                out.push(rule);
            }
        }
        Ok(out)
    }

    pub fn update_rule(&self, rule: Rule) -> Result<(), LedgerError> {
        if self.rules.get(id_key(rule.id)).map_err(|e| LedgerError::Storage(e.to_string()))?.is_none() {
            return Err(LedgerError::RuleNotFound(rule.id));
        }
        let value = encode(&rule)?;
        self.rules
            .insert(id_key(rule.id), value)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn delete_rule(&self, id: u64) -> Result<(), LedgerError> {
        let removed = self
            .rules
            .remove(id_key(id))
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        if removed.is_none() {
            return Err(LedgerError::RuleNotFound(id));
        }
        Ok(())
    }

    // ---- approval CRUD ----

    pub fn create_approval(&self, approval: ApprovalRequest) -> Result<(), LedgerError> {
        let value = encode(&approval)?;
        self.approvals
            .insert(approval.id.as_bytes(), value)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn get_approval(&self, id: &str) -> Result<ApprovalRequest, LedgerError> {
        let bytes = self
            .approvals
            .get(id.as_bytes())
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .ok_or_else(|| LedgerError::ApprovalNotFound(id.to_string()))?;
        decode(&bytes)
    }

    pub fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ApprovalRequest>, LedgerError> {
        let mut out = vec![];
        for item in self.approvals.iter() {
            let (_, value) = item.map_err(|e| LedgerError::Storage(e.to_string()))?;
            let approval: ApprovalRequest = decode(&value)?;
            if status.is_none_or(|s| s == approval.status) {
                out.push(approval);
            }
        }
        Ok(out)
    }

    /// CAS on status: only one caller wins the transition.
    pub fn transition_approval(
        &self,
        id: &str,
        from: ApprovalStatus,
        to: ApprovalStatus,
        reviewer: Option<String>,
        at: TimeStamp<Utc>,
    ) -> Result<ApprovalRequest, LedgerError> {
        let mut approval = self.get_approval(id)?;
        if approval.status != from {
            return Err(LedgerError::Storage(format!(
                "approval {id} is {}, expected {from}",
                approval.status
            )));
        }
        let old_value = encode(&approval)?;
        approval.status = to;
        approval.reviewer_id = reviewer;
        approval.decided_at = Some(at);
        let new_value = encode(&approval)?;

        self.approvals
            .compare_and_swap(id.as_bytes(), Some(old_value), Some(new_value))
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .map_err(|_| {
                LedgerError::Storage(format!("concurrent modification of approval {id}"))
            })?;

        Ok(approval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::transaction::TransactionRequest;

    fn open_test_ledger() -> Ledger {
        let config = sled::Config::new().temporary(true);
        let db = config.open().unwrap();
        Ledger::open(db).unwrap()
    }

    fn sample_request() -> TransactionRequest {
        TransactionRequest::new(
            Address::from_bytes([1u8; 20]),
            Address::from_bytes([2u8; 20]),
            1000,
            Principal::Human,
        )
    }

    #[test]
    fn insert_and_fetch_transaction() {
        let ledger = open_test_ledger();
        let req = sample_request();
        let record = TransactionRecord::new_pending(0, "corr-1".into(), &req);
        let id = ledger.insert_transaction(record).unwrap();
        let fetched = ledger.get_transaction(id).unwrap();
        assert_eq!(fetched.value, 1000);
    }

    #[test]
    fn duplicate_hash_rejected() {
        let ledger = open_test_ledger();
        let req = sample_request();
        let mut record = TransactionRecord::new_pending(0, "corr-1".into(), &req);
        record.status = TransactionStatus::Submitted;
        record.hash = Some("0xabc".into());
        ledger.insert_transaction(record.clone()).unwrap();

        let mut other = TransactionRecord::new_pending(0, "corr-2".into(), &req);
        other.status = TransactionStatus::Submitted;
        other.hash = Some("0xabc".into());
        let err = ledger.insert_transaction(other).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateHash(_)));
    }

    #[test]
    fn illegal_transition_rejected() {
        let ledger = open_test_ledger();
        let req = sample_request();
        let record = TransactionRecord::new_pending(0, "corr-1".into(), &req);
        let id = ledger.insert_transaction(record).unwrap();
        let err = ledger
            .update_transaction_status(id, TransactionStatus::Confirmed, TransactionPatch::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::IllegalTransition { .. }));
    }

    #[test]
    fn query_spend_window_scan() {
        let ledger = open_test_ledger();
        let now = Utc::now();
        let rec1 = SpendingRecord {
            id: 0,
            principal: Principal::Ai,
            amount: 100,
            recorded_at: now.into(),
        };
        ledger.insert_spending_record(rec1).unwrap();
        let total = ledger
            .query_spend(Principal::Ai, now - chrono::Duration::hours(1), now + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(total, 100);

        let outside = ledger
            .query_spend(Principal::Ai, now + chrono::Duration::hours(1), now + chrono::Duration::hours(2))
            .unwrap();
        assert_eq!(outside, 0);
    }

    #[test]
    fn approval_cas_single_winner() {
        let ledger = open_test_ledger();
        let approval = ApprovalRequest {
            id: "appr_1".into(),
            transaction_correlation_id: "corr-1".into(),
            snapshot: crate::approval::TransactionSnapshot {
                source: Address::from_bytes([1u8; 20]),
                destination: Address::from_bytes([2u8; 20]),
                value: 500,
                note: None,
            },
            reason: "hourly_cap".into(),
            status: ApprovalStatus::Pending,
            created_at: TimeStamp::new(),
            expires_at: TimeStamp::new().checked_add_hours(24),
            reviewer_id: None,
            decided_at: None,
        };
        ledger.create_approval(approval).unwrap();

        let approved = ledger
            .transition_approval(
                "appr_1",
                ApprovalStatus::Pending,
                ApprovalStatus::Approved,
                Some("reviewer1".into()),
                TimeStamp::new(),
            )
            .unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);

        let err = ledger
            .transition_approval(
                "appr_1",
                ApprovalStatus::Pending,
                ApprovalStatus::Rejected,
                Some("reviewer2".into()),
                TimeStamp::new(),
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
    }
}
