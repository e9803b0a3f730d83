//! Applies a principal's `SecurityLevel` caps on top of the rule engine's
//! decision, and manages the approval lifecycle for anything the caps or
//! rules defer to a human.

use crate::approval::{ApprovalRequest, ApprovalStatus, TransactionSnapshot};
use crate::config::{CapVector, SecurityLevel};
use crate::error::ControllerError;
use crate::evaluation::{Decision, FailedRuleSummary, RiskLevel};
use crate::ledger::Ledger;
use crate::principal::Principal;
use crate::rule::RuleAction;
use crate::timestamp::TimeStamp;
use crate::transaction::TransactionRequest;
use chrono::Utc;

pub struct SpendingController<'a> {
    ledger: &'a Ledger,
}

/// Answer to `GetSpendingSummary`: what a principal has spent in the
/// trailing hour and trailing day, next to the cap vector those figures
/// are measured against.
#[derive(Debug, Clone)]
pub struct SpendingSummary {
    pub last_hour: u128,
    pub last_24h: u128,
    pub caps: CapVector,
}

impl<'a> SpendingController<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Walks the cap table in fixed order: single-transaction cap, hourly
    /// cap, daily cap, hourly frequency cap, then the approval threshold.
    /// None of these is a hard deny — only the rule engine can deny. Every
    /// breach here escalates to require-approval; `lockdown`'s all-zero
    /// cap vector is exactly this loop tripping on the first cap for
    /// every request.
    pub fn evaluate(
        &self,
        req: &TransactionRequest,
        principal: Principal,
        caps: CapVector,
        now: TimeStamp<Utc>,
    ) -> Result<Decision, ControllerError> {
        let mut action = RuleAction::Allow;
        let mut failed = Vec::new();

        if let Some(cap) = caps.max_single_tx {
            if req.value > cap {
                action = action.more_restrictive(RuleAction::RequireApproval);
                failed.push(FailedRuleSummary {
                    rule_id: 0,
                    name: "single_tx_cap".into(),
                    reason: format!("amount {} exceeds single-transaction cap {}", req.value, cap),
                });
            }
        }

        if let Some(cap) = caps.hourly_limit {
            let spent = self.ledger.query_spend(
                principal,
                now.checked_sub_hours(1).to_datetime_utc(),
                now.to_datetime_utc(),
            )?;
            let total = spent + req.value;
            if total > cap {
                action = action.more_restrictive(RuleAction::RequireApproval);
                failed.push(FailedRuleSummary {
                    rule_id: 0,
                    name: "hourly_cap".into(),
                    reason: format!("hourly spend {spent} + amount {} = {total} exceeds cap {cap}", req.value),
                });
            }
        }

        if let Some(cap) = caps.daily_limit {
            let spent = self.ledger.query_spend(
                principal,
                now.checked_sub_hours(24).to_datetime_utc(),
                now.to_datetime_utc(),
            )?;
            let total = spent + req.value;
            if total > cap {
                action = action.more_restrictive(RuleAction::RequireApproval);
                failed.push(FailedRuleSummary {
                    rule_id: 0,
                    name: "daily_cap".into(),
                    reason: format!("daily spend {spent} + amount {} = {total} exceeds cap {cap}", req.value),
                });
            }
        }

        if let Some(max) = caps.max_tx_per_hour {
            let count = self.ledger.count_transactions(
                principal,
                now.checked_sub_hours(1).to_datetime_utc(),
                now.to_datetime_utc(),
            )?;
            if count + 1 > max {
                action = action.more_restrictive(RuleAction::RequireApproval);
                failed.push(FailedRuleSummary {
                    rule_id: 0,
                    name: "frequency_cap".into(),
                    reason: format!("{count} transactions in the trailing hour, cap is {max}"),
                });
            }
        }

        if let Some(threshold) = caps.approval_threshold {
            if req.value > threshold {
                action = action.more_restrictive(RuleAction::RequireApproval);
                failed.push(FailedRuleSummary {
                    rule_id: 0,
                    name: "threshold".into(),
                    reason: format!("amount {} exceeds approval threshold {threshold}", req.value),
                });
            }
        }

        // Risk scoring is the rule engine's responsibility (`rules.rs`'s
        // `risk_score`, which has the failed-predicate context this cap
        // walk doesn't); the orchestrator combines both decisions and
        // keeps whichever `risk_level` belongs to the decision that
        // actually denied or required approval.
        Ok(Decision {
            action,
            risk_level: RiskLevel::Low,
            failed_rules: failed,
        })
    }

    /// Spend already recorded in the trailing hour and trailing 24 hours
    /// for `principal`, alongside the cap vector currently in force —
    /// everything a caller needs to show someone their remaining
    /// headroom without re-deriving it from raw ledger queries.
    pub fn spending_summary(
        &self,
        principal: Principal,
        caps: CapVector,
        now: TimeStamp<Utc>,
    ) -> Result<SpendingSummary, ControllerError> {
        let last_hour = self
            .ledger
            .query_spend(principal, now.checked_sub_hours(1).to_datetime_utc(), now.to_datetime_utc())?;
        let last_24h = self
            .ledger
            .query_spend(principal, now.checked_sub_hours(24).to_datetime_utc(), now.to_datetime_utc())?;
        Ok(SpendingSummary {
            last_hour,
            last_24h,
            caps,
        })
    }

    /// Persists a new pending approval for a transaction the caps or rules
    /// deferred, with the policy's default expiry window.
    pub fn request_approval(
        &self,
        req: &TransactionRequest,
        correlation_id: &str,
        reason: &str,
        expiry_hours: i64,
        now: TimeStamp<Utc>,
    ) -> Result<ApprovalRequest, ControllerError> {
        let approval = ApprovalRequest {
            id: crate::utils::new_uuid7_string(),
            transaction_correlation_id: correlation_id.to_string(),
            snapshot: TransactionSnapshot::from(req),
            reason: reason.to_string(),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now.checked_add_hours(expiry_hours),
            reviewer_id: None,
            decided_at: None,
        };
        self.ledger.create_approval(approval.clone())?;
        tracing::info!(approval_id = %approval.id, correlation_id, "approval requested");
        Ok(approval)
    }

    /// Approving an already-approved request is a no-op that returns the
    /// existing row rather than erroring; any other non-pending status
    /// (rejected, expired) is still a hard error.
    pub fn approve(&self, id: &str, reviewer: &str, now: TimeStamp<Utc>) -> Result<ApprovalRequest, ControllerError> {
        let existing = self.ledger.get_approval(id)?;
        if existing.status == ApprovalStatus::Approved {
            return Ok(existing);
        }
        self.guard_pending_not_expired(id, now)?;
        let approved = self.ledger.transition_approval(
            id,
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            Some(reviewer.to_string()),
            now,
        )?;
        tracing::info!(approval_id = %approved.id, reviewer, "approval granted");
        Ok(approved)
    }

    pub fn reject(&self, id: &str, reviewer: &str, now: TimeStamp<Utc>) -> Result<ApprovalRequest, ControllerError> {
        self.guard_pending_not_expired(id, now)?;
        let rejected = self.ledger.transition_approval(
            id,
            ApprovalStatus::Pending,
            ApprovalStatus::Rejected,
            Some(reviewer.to_string()),
            now,
        )?;
        tracing::info!(approval_id = %rejected.id, reviewer, "approval rejected");
        Ok(rejected)
    }

    fn guard_pending_not_expired(&self, id: &str, now: TimeStamp<Utc>) -> Result<(), ControllerError> {
        let approval = self.ledger.get_approval(id)?;
        if approval.status != ApprovalStatus::Pending {
            return Err(ControllerError::InvalidTransition(
                id.to_string(),
                approval.status.to_string(),
                "a terminal decision".to_string(),
            ));
        }
        if approval.is_expired_at(now) {
            return Err(ControllerError::Expired(id.to_string()));
        }
        Ok(())
    }

    /// Sweeps every still-pending approval whose expiry has passed into
    /// `Expired`. Callers decide the cadence; nothing here assumes a
    /// particular scheduler (design note 9).
    pub fn sweep_expired(&self, now: TimeStamp<Utc>) -> Result<Vec<ApprovalRequest>, ControllerError> {
        let mut expired = Vec::new();
        for approval in self.ledger.list_approvals(Some(ApprovalStatus::Pending))? {
            if approval.is_expired_at(now) {
                let swept = self.ledger.transition_approval(
                    &approval.id,
                    ApprovalStatus::Pending,
                    ApprovalStatus::Expired,
                    None,
                    now,
                )?;
                tracing::info!(approval_id = %swept.id, "approval swept to expired");
                expired.push(swept);
            }
        }
        Ok(expired)
    }
}
