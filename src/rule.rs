//! Rule storage types: kind, parameters, action, and the stored `Rule` row.

use crate::address::Address;
use crate::error::RuleError;
use crate::timestamp::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum RuleKind {
    #[n(0)]
    SpendingLimit,
    #[n(1)]
    AddressWhitelist,
    #[n(2)]
    AddressBlacklist,
    #[n(3)]
    TimeRestriction,
    #[n(4)]
    AmountThreshold,
    #[n(5)]
    DailyTxCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub enum RuleAction {
    #[n(0)]
    Allow,
    #[n(1)]
    RequireApproval,
    #[n(2)]
    Deny,
}

impl RuleAction {
    /// `deny > require_approval > allow`; used to fold many failed-rule
    /// actions into the single most restrictive decision.
    pub fn more_restrictive(self, other: RuleAction) -> RuleAction {
        self.max(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum SpendingScope {
    #[n(0)]
    PerTransaction,
    #[n(1)]
    Daily,
    #[n(2)]
    Weekly,
    #[n(3)]
    Monthly,
}

impl SpendingScope {
    /// Trailing window length in hours; `None` for per-transaction scope,
    /// which has no rolling window.
    pub fn window_hours(self) -> Option<i64> {
        match self {
            SpendingScope::PerTransaction => None,
            SpendingScope::Daily => Some(24),
            SpendingScope::Weekly => Some(7 * 24),
            SpendingScope::Monthly => Some(30 * 24),
        }
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub enum RuleParameters {
    #[n(0)]
    SpendingLimit {
        #[n(0)]
        scope: SpendingScope,
        #[n(1)]
        amount: u128,
    },
    #[n(1)]
    AddressWhitelist {
        #[n(0)]
        addresses: Vec<Address>,
    },
    #[n(2)]
    AddressBlacklist {
        #[n(0)]
        addresses: Vec<Address>,
    },
    #[n(3)]
    TimeRestriction {
        /// hour-of-day in [0, 24), half-open range `[start, end)`, wrap-around
        /// permitted (e.g. start=22, end=6 covers 22:00-06:00 UTC).
        #[n(0)]
        start_hour: u8,
        #[n(1)]
        end_hour: u8,
    },
    #[n(4)]
    AmountThreshold {
        #[n(0)]
        threshold: u128,
    },
    #[n(5)]
    DailyTxCount {
        #[n(0)]
        max_count: u64,
    },
}

impl RuleParameters {
    pub fn kind(&self) -> RuleKind {
        match self {
            RuleParameters::SpendingLimit { .. } => RuleKind::SpendingLimit,
            RuleParameters::AddressWhitelist { .. } => RuleKind::AddressWhitelist,
            RuleParameters::AddressBlacklist { .. } => RuleKind::AddressBlacklist,
            RuleParameters::TimeRestriction { .. } => RuleKind::TimeRestriction,
            RuleParameters::AmountThreshold { .. } => RuleKind::AmountThreshold,
            RuleParameters::DailyTxCount { .. } => RuleKind::DailyTxCount,
        }
    }

    /// Validated at rule creation time, not at evaluation (design note 9).
    pub fn validate(&self) -> Result<(), RuleError> {
        match self {
            RuleParameters::TimeRestriction { start_hour, end_hour } => {
                if *start_hour >= 24 || *end_hour >= 24 {
                    return Err(RuleError::ParameterMismatch(
                        "time_restriction hours must be in [0, 24)".into(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Rule {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub parameters: RuleParameters,
    #[n(3)]
    pub action: RuleAction,
    #[n(4)]
    pub enabled: bool,
    #[n(5)]
    pub priority: i64,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub updated_at: TimeStamp<Utc>,
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        self.parameters.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restrictiveness_ordering() {
        assert_eq!(
            RuleAction::Allow.more_restrictive(RuleAction::Deny),
            RuleAction::Deny
        );
        assert_eq!(
            RuleAction::RequireApproval.more_restrictive(RuleAction::Allow),
            RuleAction::RequireApproval
        );
        assert_eq!(
            RuleAction::Deny.more_restrictive(RuleAction::RequireApproval),
            RuleAction::Deny
        );
    }

    #[test]
    fn window_hours_per_scope() {
        assert_eq!(SpendingScope::PerTransaction.window_hours(), None);
        assert_eq!(SpendingScope::Daily.window_hours(), Some(24));
        assert_eq!(SpendingScope::Weekly.window_hours(), Some(168));
        assert_eq!(SpendingScope::Monthly.window_hours(), Some(720));
    }

    #[test]
    fn time_restriction_validation_rejects_bad_hours() {
        let params = RuleParameters::TimeRestriction {
            start_hour: 25,
            end_hour: 3,
        };
        assert!(params.validate().is_err());
    }
}
