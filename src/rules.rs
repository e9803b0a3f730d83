//! Given a candidate transaction and the current ledger snapshot, compute
//! a decision: the composition of every enabled rule's predicate, folded
//! into the single most restrictive action, plus a risk score.

use crate::address::Address;
use crate::error::RuleError;
use crate::evaluation::{Decision, FailedRuleSummary, RiskLevel, RuleEvaluation};
use crate::ledger::Ledger;
use crate::principal::Principal;
use crate::rule::{Rule, RuleAction, RuleParameters, SpendingScope};
use crate::timestamp::TimeStamp;
use crate::transaction::TransactionRequest;
use chrono::{Timelike, Utc};
use std::sync::{Arc, RwLock};

/// Lock-free-read cache of the enabled rule set, already sorted in
/// evaluation order. Rule CRUD is rare compared to evaluation, so writers
/// take the exclusive path (`refresh`) and every evaluation just clones an
/// `Arc` snapshot under a read lock: lock-free reads, exclusive writes.
#[derive(Clone)]
pub struct RuleCache {
    rules: Arc<RwLock<Arc<[Rule]>>>,
}

impl RuleCache {
    pub fn load(ledger: &Ledger) -> Result<Self, RuleError> {
        let cache = Self {
            rules: Arc::new(RwLock::new(Arc::from([]))),
        };
        cache.refresh(ledger)?;
        Ok(cache)
    }

    /// Re-reads the enabled rule set from the ledger and re-sorts it.
    /// Call after any `create_rule`/`update_rule`/`delete_rule`.
    pub fn refresh(&self, ledger: &Ledger) -> Result<(), RuleError> {
        let mut rules = ledger.list_rules(true)?;
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        *self.rules.write().unwrap() = Arc::from(rules);
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<[Rule]> {
        self.rules.read().unwrap().clone()
    }
}

pub struct RuleEngine<'a> {
    ledger: &'a Ledger,
    cache: Option<RuleCache>,
}

struct Evaluated {
    rule: Rule,
    passed: bool,
    reason: String,
}

impl<'a> RuleEngine<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger, cache: None }
    }

    /// Serves rule evaluation order from a shared `RuleCache` instead of
    /// hitting the ledger's `rules` tree on every call.
    pub fn with_cache(ledger: &'a Ledger, cache: RuleCache) -> Self {
        Self {
            ledger,
            cache: Some(cache),
        }
    }

    /// Loads all enabled rules sorted by descending priority, ascending id
    /// as tie-break.
    fn ordered_enabled_rules(&self) -> Result<Vec<Rule>, RuleError> {
        if let Some(cache) = &self.cache {
            return Ok(cache.snapshot().to_vec());
        }
        let mut rules = self.ledger.list_rules(true)?;
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    fn evaluate_predicate(
        &self,
        rule: &Rule,
        req: &TransactionRequest,
        principal: Principal,
        now: TimeStamp<Utc>,
    ) -> Result<(bool, String), RuleError> {
        match &rule.parameters {
            RuleParameters::SpendingLimit { scope, amount } => {
                Ok(self.check_spending_limit(*scope, *amount, req, principal, now)?)
            }
            RuleParameters::AddressWhitelist { addresses } => {
                let passed = addresses.contains(&req.destination);
                let reason = if passed {
                    format!("destination {} is whitelisted", req.destination)
                } else {
                    format!("destination {} is not in the whitelist", req.destination)
                };
                Ok((passed, reason))
            }
            RuleParameters::AddressBlacklist { addresses } => {
                let passed = !addresses.contains(&req.destination);
                let reason = if passed {
                    format!("destination {} is not blacklisted", req.destination)
                } else {
                    format!("destination {} is blacklisted", req.destination)
                };
                Ok((passed, reason))
            }
            RuleParameters::TimeRestriction { start_hour, end_hour } => {
                let hour = now.to_datetime_utc().hour() as u8;
                let in_range = if start_hour <= end_hour {
                    hour >= *start_hour && hour < *end_hour
                } else {
                    hour >= *start_hour || hour < *end_hour
                };
                let reason = format!(
                    "hour {hour} {} allowed window [{start_hour}, {end_hour})",
                    if in_range { "is within" } else { "is outside" }
                );
                Ok((in_range, reason))
            }
            RuleParameters::AmountThreshold { threshold } => {
                let passed = req.value < *threshold;
                let reason = format!("amount {} vs threshold {}", req.value, threshold);
                Ok((passed, reason))
            }
            RuleParameters::DailyTxCount { max_count } => {
                let midnight = now
                    .to_datetime_utc()
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    .and_utc();
                let count = self
                    .ledger
                    .count_transactions(principal, midnight, now.to_datetime_utc())?;
                let passed = count + 1 <= *max_count;
                let reason = format!("{} transactions today vs max {}", count, max_count);
                Ok((passed, reason))
            }
        }
    }

    fn check_spending_limit(
        &self,
        scope: SpendingScope,
        amount: u128,
        req: &TransactionRequest,
        principal: Principal,
        now: TimeStamp<Utc>,
    ) -> Result<(bool, String), RuleError> {
        match scope.window_hours() {
            None => {
                let passed = req.value <= amount;
                Ok((passed, format!("amount {} vs per-transaction limit {}", req.value, amount)))
            }
            Some(hours) => {
                let window_start = now.checked_sub_hours(hours).to_datetime_utc();
                let spent = self
                    .ledger
                    .query_spend(principal, window_start, now.to_datetime_utc())?;
                let total = spent + req.value;
                let passed = total <= amount;
                Ok((
                    passed,
                    format!("window spend {spent} + amount {} = {total} vs limit {amount}", req.value),
                ))
            }
        }
    }

    /// Computes the risk score: 25 per
    /// failed rule, an amount-based term relative to the tightest
    /// per-transaction limit encountered, and a frequency term from the
    /// trailing-hour transaction count for this principal.
    fn risk_score(
        &self,
        evaluated: &[Evaluated],
        req: &TransactionRequest,
        principal: Principal,
        now: TimeStamp<Utc>,
    ) -> Result<u32, RuleError> {
        let failed_count = evaluated.iter().filter(|e| !e.passed).count() as u32;
        let mut score = failed_count * 25;

        let tightest_per_tx_limit = evaluated
            .iter()
            .filter_map(|e| match &e.rule.parameters {
                RuleParameters::SpendingLimit {
                    scope: SpendingScope::PerTransaction,
                    amount,
                } => Some(*amount),
                _ => None,
            })
            .min();

        if let Some(limit) = tightest_per_tx_limit {
            if limit > 0 {
                let ratio_x100 = req.value.saturating_mul(100) / limit;
                score += if ratio_x100 <= 100 {
                    0
                } else if ratio_x100 <= 500 {
                    5
                } else if ratio_x100 <= 2000 {
                    15
                } else {
                    30
                };
            }
        }

        let hour_ago = now.checked_sub_hours(1).to_datetime_utc();
        let recent_count = self
            .ledger
            .count_transactions(principal, hour_ago, now.to_datetime_utc())?;
        score += if recent_count > 10 {
            20
        } else if recent_count > 3 {
            10
        } else {
            0
        };

        Ok(score)
    }

    /// The full pipeline: evaluate every enabled rule, persist an
    /// evaluation row for each regardless of outcome, fold outcomes into a
    /// decision, and compute the risk score.
    pub fn evaluate(
        &self,
        req: &TransactionRequest,
        principal: Principal,
        correlation_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<Decision, RuleError> {
        let rules = self.ordered_enabled_rules()?;
        let mut evaluated = Vec::with_capacity(rules.len());

        for rule in rules {
            let (passed, reason) = self.evaluate_predicate(&rule, req, principal, now)?;
            self.ledger.insert_rule_evaluation(RuleEvaluation {
                id: 0,
                correlation_id: correlation_id.to_string(),
                rule_id: rule.id,
                passed,
                reason: reason.clone(),
                evaluated_at: now,
            })?;
            evaluated.push(Evaluated { rule, passed, reason });
        }

        let mut action = RuleAction::Allow;
        let mut failed_rules = Vec::new();
        for e in &evaluated {
            if !e.passed {
                action = action.more_restrictive(e.rule.action);
                failed_rules.push(FailedRuleSummary {
                    rule_id: e.rule.id,
                    name: e.rule.name.clone(),
                    reason: e.reason.clone(),
                });
            }
        }

        let score = self.risk_score(&evaluated, req, principal, now)?;
        let risk_level = RiskLevel::from_score(score);

        Ok(Decision {
            action,
            risk_level,
            failed_rules,
        })
    }
}
