//! Held-aside transactions awaiting explicit human approve/reject.

use crate::timestamp::TimeStamp;
use crate::transaction::TransactionRequest;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ApprovalStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Expired,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Snapshot of the request fields embedded verbatim in the approval row so
/// a reviewer can inspect it without chasing the transaction record.
#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct TransactionSnapshot {
    #[n(0)]
    pub source: crate::address::Address,
    #[n(1)]
    pub destination: crate::address::Address,
    #[n(2)]
    pub value: u128,
    #[n(3)]
    pub note: Option<String>,
}

impl From<&TransactionRequest> for TransactionSnapshot {
    fn from(req: &TransactionRequest) -> Self {
        Self {
            source: req.source,
            destination: req.destination,
            value: req.value,
            note: req.note.clone(),
        }
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ApprovalRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub transaction_correlation_id: String,
    #[n(2)]
    pub snapshot: TransactionSnapshot,
    #[n(3)]
    pub reason: String,
    #[n(4)]
    pub status: ApprovalStatus,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub expires_at: TimeStamp<Utc>,
    #[n(7)]
    pub reviewer_id: Option<String>,
    #[n(8)]
    pub decided_at: Option<TimeStamp<Utc>>,
}

impl ApprovalRequest {
    pub fn is_expired_at(&self, now: TimeStamp<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now > self.expires_at
    }
}
