//! Append-only system events: one row per state transition, independent of
//! the typed tables (transactions, approvals) so the audit trail survives
//! even if a caller only reads this stream.

use crate::timestamp::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Event {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub correlation_id: String,
    #[n(2)]
    pub kind: String,
    #[n(3)]
    pub detail: String,
    #[n(4)]
    pub recorded_at: TimeStamp<Utc>,
}

impl Event {
    pub fn new(id: u64, correlation_id: impl Into<String>, kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            id,
            correlation_id: correlation_id.into(),
            kind: kind.into(),
            detail: detail.into(),
            recorded_at: TimeStamp::new(),
        }
    }
}
