//! Property-based tests for the rule engine and spending controller.
//!
//! These cover invariants that should hold across a wide range of inputs
//! rather than a handful of hand-picked cases: risk score monotonicity,
//! windowed cap boundaries, and rule priority ordering.

use chainpilot_core::config::SecurityLevel;
use chainpilot_core::rule::{Rule, RuleAction, RuleParameters};
use chainpilot_core::timestamp::TimeStamp;
use chainpilot_core::{Address, Ledger, Principal, RuleEngine, SpendingController, TransactionRequest};
use proptest::prelude::*;

fn open_ledger() -> Ledger {
    let db = sled::Config::new().temporary(true).open().unwrap();
    Ledger::open(db).unwrap()
}

fn request_of(value: u128) -> TransactionRequest {
    TransactionRequest::new(
        Address::from_bytes([1u8; 20]),
        Address::from_bytes([2u8; 20]),
        value,
        Principal::Ai,
    )
}

proptest! {
    /// A single per-transaction spending-limit rule should deny every
    /// amount strictly above the limit and allow every amount at or
    /// below it, for any limit and any candidate amount.
    #[test]
    fn prop_per_transaction_limit_boundary(limit in 1u128..1_000_000, amount in 1u128..2_000_000) {
        let ledger = open_ledger();
        let now = TimeStamp::new();
        ledger.create_rule(Rule {
            id: 0,
            name: "cap".into(),
            parameters: RuleParameters::SpendingLimit {
                scope: chainpilot_core::rule::SpendingScope::PerTransaction,
                amount: limit,
            },
            action: RuleAction::Deny,
            enabled: true,
            priority: 0,
            created_at: now,
            updated_at: now,
        }).unwrap();

        let engine = RuleEngine::new(&ledger);
        let req = request_of(amount);
        let decision = engine.evaluate(&req, Principal::Ai, "corr", now).unwrap();

        if amount > limit {
            prop_assert!(decision.is_deny());
        } else {
            prop_assert!(decision.is_allow());
        }
    }

    /// Every security level's approval threshold, when crossed by the
    /// requested amount but the single-transaction cap is not, escalates
    /// to require_approval rather than deny or allow.
    #[test]
    fn prop_approval_threshold_escalates_without_denying(extra in 1u128..400) {
        let ledger = open_ledger();
        let controller = SpendingController::new(&ledger);
        let caps = SecurityLevel::Moderate.caps();
        let threshold = caps.approval_threshold.unwrap();
        let single_cap = caps.max_single_tx.unwrap();
        let amount = (threshold + extra).min(single_cap);
        prop_assume!(amount > threshold);

        let req = request_of(amount);
        let decision = controller.evaluate(&req, Principal::Ai, caps, TimeStamp::new()).unwrap();
        prop_assert!(decision.is_require_approval());
    }

    /// Rule priority strictly orders which action wins when two rules of
    /// different priority both fail: the higher-priority rule's action is
    /// reported among the failed rules regardless of creation order.
    #[test]
    fn prop_rule_ordering_is_priority_then_id(priority_a in 0i64..100, priority_b in 0i64..100) {
        let ledger = open_ledger();
        let now = TimeStamp::new();
        let id_a = ledger.create_rule(Rule {
            id: 0,
            name: "a".into(),
            parameters: RuleParameters::AmountThreshold { threshold: 0 },
            action: RuleAction::RequireApproval,
            enabled: true,
            priority: priority_a,
            created_at: now,
            updated_at: now,
        }).unwrap();
        let id_b = ledger.create_rule(Rule {
            id: 0,
            name: "b".into(),
            parameters: RuleParameters::AmountThreshold { threshold: 0 },
            action: RuleAction::RequireApproval,
            enabled: true,
            priority: priority_b,
            created_at: now,
            updated_at: now,
        }).unwrap();

        let mut rules = ledger.list_rules(true).unwrap();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        if priority_a != priority_b {
            let expected_first = if priority_a > priority_b { id_a } else { id_b };
            prop_assert_eq!(rules[0].id, expected_first);
        } else {
            prop_assert_eq!(rules[0].id, id_a.min(id_b));
        }
    }
}
