//! Append-only spending history, consulted by rolling-window cap checks.

use crate::principal::Principal;
use crate::timestamp::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct SpendingRecord {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub principal: Principal,
    #[n(2)]
    pub amount: u128,
    #[n(3)]
    pub recorded_at: TimeStamp<Utc>,
}
