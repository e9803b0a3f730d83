//! Rule evaluation rows and the decision record produced by a full pass.

use crate::rule::RuleAction;
use crate::timestamp::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct RuleEvaluation {
    #[n(0)]
    pub id: u64,
    /// correlation id of the candidate transaction; a transaction may not
    /// yet have a hash when this row is written.
    #[n(1)]
    pub correlation_id: String,
    #[n(2)]
    pub rule_id: u64,
    #[n(3)]
    pub passed: bool,
    #[n(4)]
    pub reason: String,
    #[n(5)]
    pub evaluated_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        if score < 25 {
            RiskLevel::Low
        } else if score < 50 {
            RiskLevel::Medium
        } else if score < 75 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailedRuleSummary {
    pub rule_id: u64,
    pub name: String,
    pub reason: String,
}

/// The triple `{action, risk_level, failed_rules}` produced by the rule
/// engine, or the combined engine+controller decision.
#[derive(Debug, Clone)]
pub struct Decision {
    pub action: RuleAction,
    pub risk_level: RiskLevel,
    pub failed_rules: Vec<FailedRuleSummary>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            action: RuleAction::Allow,
            risk_level: RiskLevel::Low,
            failed_rules: vec![],
        }
    }

    pub fn is_deny(&self) -> bool {
        self.action == RuleAction::Deny
    }

    pub fn is_require_approval(&self) -> bool {
        self.action == RuleAction::RequireApproval
    }

    pub fn is_allow(&self) -> bool {
        self.action == RuleAction::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_buckets() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(24), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(25), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(49), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(74), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(75), RiskLevel::Critical);
    }
}
