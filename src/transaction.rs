//! The ephemeral request a client submits, and the ledger row that tracks
//! it through its lifecycle.

use crate::address::Address;
use crate::error::LedgerError;
use crate::principal::Principal;
use crate::timestamp::TimeStamp;
use chrono::Utc;

/// Ephemeral input to `Submit`; never itself persisted, only the
/// `TransactionRecord` derived from it.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub source: Address,
    pub destination: Address,
    pub value: u128,
    pub token_contract: Option<Address>,
    pub token_amount: Option<u128>,
    pub note: Option<String>,
    pub principal: Principal,
}

impl TransactionRequest {
    pub fn new(source: Address, destination: Address, value: u128, principal: Principal) -> Self {
        Self {
            source,
            destination,
            value,
            token_contract: None,
            token_amount: None,
            note: None,
            principal,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_token(mut self, contract: Address, amount: u128) -> Self {
        self.token_contract = Some(contract);
        self.token_amount = Some(amount);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum TransactionStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Submitted,
    #[n(2)]
    Confirmed,
    #[n(3)]
    Failed,
    #[n(4)]
    Denied,
    #[n(5)]
    AwaitingApproval,
}

impl TransactionStatus {
    /// The state machine: `pending -> submitted -> {confirmed, failed}`,
    /// plus the terminal `denied` and `awaiting_approval` branches
    /// reachable only from `pending`.
    pub fn can_transition_to(self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, to),
            (Pending, Submitted)
                | (Pending, Denied)
                | (Pending, AwaitingApproval)
                | (AwaitingApproval, Submitted)
                | (AwaitingApproval, Failed)
                | (AwaitingApproval, Denied)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Submitted => "submitted",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Denied => "denied",
            TransactionStatus::AwaitingApproval => "awaiting_approval",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct TransactionRecord {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub correlation_id: String,
    #[n(2)]
    pub hash: Option<String>,
    #[n(3)]
    pub source: Address,
    #[n(4)]
    pub destination: Address,
    #[n(5)]
    pub value: u128,
    #[n(6)]
    pub token_contract: Option<Address>,
    #[n(7)]
    pub token_amount: Option<u128>,
    #[n(8)]
    pub note: Option<String>,
    #[n(9)]
    pub gas_limit: u64,
    #[n(10)]
    pub gas_price: u128,
    #[n(11)]
    pub gas_used: Option<u64>,
    #[n(12)]
    pub block_number: Option<u64>,
    #[n(13)]
    pub status: TransactionStatus,
    #[n(14)]
    pub principal: Principal,
    #[n(15)]
    pub created_at: TimeStamp<Utc>,
    #[n(16)]
    pub updated_at: TimeStamp<Utc>,
    #[n(17)]
    pub error: Option<String>,
}

impl TransactionRecord {
    pub fn new_pending(id: u64, correlation_id: String, req: &TransactionRequest) -> Self {
        let now = TimeStamp::new();
        Self {
            id,
            correlation_id,
            hash: None,
            source: req.source,
            destination: req.destination,
            value: req.value,
            token_contract: req.token_contract,
            token_amount: req.token_amount,
            note: req.note.clone(),
            gas_limit: 21_000,
            gas_price: 0,
            gas_used: None,
            block_number: None,
            status: TransactionStatus::Pending,
            principal: req.principal,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Validates the structural invariant: a record in `submitted` must
    /// have a hash, and `confirmed`/`failed` must carry a block number /
    /// error respectively.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        match self.status {
            TransactionStatus::Submitted | TransactionStatus::Confirmed
                if self.hash.is_none() =>
            {
                Err(LedgerError::Storage(format!(
                    "transaction {} in status {} lacks a hash",
                    self.id, self.status
                )))
            }
            TransactionStatus::Confirmed if self.block_number.is_none() => {
                Err(LedgerError::Storage(format!(
                    "transaction {} confirmed without a block number",
                    self.id
                )))
            }
            TransactionStatus::Failed if self.error.is_none() => Err(LedgerError::Storage(
                format!("transaction {} failed without an error message", self.id),
            )),
            _ => Ok(()),
        }
    }
}
