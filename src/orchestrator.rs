//! The Transaction Orchestrator: the one entry point that drives a
//! request through intake, rule evaluation, AI spending control, signing,
//! broadcast and confirmation, emitting an `Event` row at every step.
//!
//! A per-principal mutex stripe serializes the evaluate-then-spend
//! critical section without serializing unrelated principals against
//! each other.

use crate::config::PolicyConfig;
use crate::controller::{SpendingController, SpendingSummary};
use crate::error::OrchestratorError;
use crate::evaluation::{Decision, FailedRuleSummary, RiskLevel};
use crate::ledger::{Ledger, TransactionPatch};
use crate::principal::Principal;
use crate::rule::RuleAction;
use crate::rules::{RuleCache, RuleEngine};
use crate::timestamp::TimeStamp;
use crate::transaction::{TransactionRecord, TransactionRequest, TransactionStatus};
use crate::transport::BroadcastTransport;
use crate::vault::{UnsignedTransaction, WalletVault};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

/// Outcome of a single `submit` call: either the transaction went
/// straight through to the broadcast step, or it was deferred pending a
/// human decision.
#[derive(Debug)]
pub enum SubmitOutcome {
    Submitted(TransactionRecord),
    AwaitingApproval { record: TransactionRecord, approval_id: String },
    Denied {
        record: TransactionRecord,
        reason: String,
        risk_level: RiskLevel,
        failed_rules: Vec<FailedRuleSummary>,
    },
}

/// Per-principal striping so two requests from the same principal never
/// race past the cap check into the spend write, while requests from
/// different principals proceed concurrently.
struct PrincipalLocks {
    locks: Mutex<HashMap<Principal, std::sync::Arc<Mutex<()>>>>,
}

impl PrincipalLocks {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn stripe_for(&self, principal: Principal) -> std::sync::Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(principal)
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct Orchestrator<'a> {
    ledger: &'a Ledger,
    vault: &'a WalletVault,
    transport: &'a dyn BroadcastTransport,
    config: PolicyConfig,
    stripes: PrincipalLocks,
    rule_cache: RuleCache,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        ledger: &'a Ledger,
        vault: &'a WalletVault,
        transport: &'a dyn BroadcastTransport,
        config: PolicyConfig,
    ) -> Result<Self, OrchestratorError> {
        let rule_cache = RuleCache::load(ledger)?;
        Ok(Self {
            ledger,
            vault,
            transport,
            config,
            stripes: PrincipalLocks::new(),
            rule_cache,
        })
    }

    /// Re-reads the rule set from the ledger. Callers that mutate rules
    /// through the ledger directly (rather than through the orchestrator)
    /// must call this before the change is reflected in `submit`.
    pub fn refresh_rules(&self) -> Result<(), OrchestratorError> {
        self.rule_cache.refresh(self.ledger)?;
        Ok(())
    }

    fn emit(&self, correlation_id: &str, kind: &str, detail: impl Into<String>) {
        if let Err(e) = self
            .ledger
            .insert_event(crate::event::Event::new(0, correlation_id, kind, detail))
        {
            tracing::warn!(error = %e, "failed to record event");
        }
    }

    /// Steps 1-3 of the pipeline: intake, rule evaluation, AI control.
    /// Runs under the principal's stripe so the decision and the spend
    /// write it leads to are indivisible.
    fn authorize(
        &self,
        req: &TransactionRequest,
        correlation_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<(TransactionRecord, Decision, Decision), OrchestratorError> {
        if req.value == 0 {
            return Err(OrchestratorError::Validation("transaction value must be nonzero".into()));
        }

        let record = TransactionRecord::new_pending(0, correlation_id.to_string(), req);
        let id = self.ledger.insert_transaction(record)?;
        let record = self.ledger.get_transaction(id)?;
        self.emit(correlation_id, "intake", format!("transaction {id} pending"));

        let rule_engine = RuleEngine::with_cache(self.ledger, self.rule_cache.clone());
        let rule_decision = rule_engine.evaluate(req, req.principal, correlation_id, now)?;
        self.emit(
            correlation_id,
            "rule_evaluation",
            format!("{:?} risk={:?}", rule_decision.action, rule_decision.risk_level),
        );

        let controller = SpendingController::new(self.ledger);
        let caps = self.config.security_level.caps();
        let controller_decision = controller.evaluate(req, req.principal, caps, now)?;
        self.emit(
            correlation_id,
            "ai_control",
            format!("{:?} risk={:?}", controller_decision.action, controller_decision.risk_level),
        );

        Ok((record, rule_decision, controller_decision))
    }

    /// Steps 4-6: sign with the wallet vault, broadcast through the
    /// injected transport, and record the outcome. Only ever reached for
    /// `allow`ed or just-approved transactions.
    fn sign_and_broadcast(
        &self,
        record: &TransactionRecord,
        handle: &crate::vault::WalletHandle,
        nonce: u64,
        gas_price: u128,
    ) -> Result<TransactionRecord, OrchestratorError> {
        let unsigned = UnsignedTransaction {
            nonce,
            gas_price,
            gas_limit: record.gas_limit,
            to: record.destination,
            value: record.value,
            data: vec![],
        };
        let (raw_tx, hash) = self
            .vault
            .sign(handle, &unsigned, self.transport.chain_id())?;

        let (updated, _) = self.ledger.transition_to_submitted_with_spend(
            record.id,
            hash.clone(),
            record.principal,
            record.value,
        )?;
        self.emit(&record.correlation_id, "signed", format!("hash={hash}"));

        self.transport
            .broadcast_raw(&raw_tx)
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;
        self.emit(&record.correlation_id, "broadcast", format!("hash={hash}"));

        Ok(updated)
    }

    /// Polls the transport for a receipt and applies it. Returns the
    /// record unchanged if the receipt isn't ready yet; callers are
    /// expected to retry.
    pub fn poll_confirmation(&self, id: u64) -> Result<TransactionRecord, OrchestratorError> {
        let record = self.ledger.get_transaction(id)?;
        if record.status != TransactionStatus::Submitted {
            return Ok(record);
        }
        let hash = record
            .hash
            .clone()
            .ok_or_else(|| OrchestratorError::Invariant(format!("submitted transaction {id} has no hash")))?;

        match self
            .transport
            .fetch_receipt(&hash)
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?
        {
            None => Ok(record),
            Some(receipt) if receipt.success => {
                let updated = self.ledger.update_transaction_status(
                    id,
                    TransactionStatus::Confirmed,
                    TransactionPatch {
                        gas_used: Some(receipt.gas_used),
                        block_number: Some(receipt.block_number),
                        ..Default::default()
                    },
                )?;
                self.emit(&record.correlation_id, "confirmed", format!("block={}", receipt.block_number));
                Ok(updated)
            }
            Some(_) => {
                let updated = self.ledger.update_transaction_status(
                    id,
                    TransactionStatus::Failed,
                    TransactionPatch {
                        error: Some("transaction reverted".into()),
                        ..Default::default()
                    },
                )?;
                self.emit(&record.correlation_id, "failed", "transaction reverted on-chain");
                Ok(updated)
            }
        }
    }

    /// Entry point: drives a new transaction request all the way through
    /// to either broadcast or a deferred/denied terminal state.
    pub fn submit(
        &self,
        req: TransactionRequest,
        handle: &crate::vault::WalletHandle,
        nonce: u64,
        gas_price: u128,
    ) -> Result<SubmitOutcome, OrchestratorError> {
        let correlation_id = crate::utils::new_uuid7_string();
        let now = TimeStamp::new();
        let stripe = self.stripes.stripe_for(req.principal);
        let _guard = stripe.lock().unwrap();

        let (record, rule_decision, controller_decision) = self.authorize(&req, &correlation_id, now)?;
        let action = rule_decision.action.more_restrictive(controller_decision.action);

        // Whichever decision is at least as restrictive as the composed
        // action is the one that produced it; the rule engine takes
        // precedence when both tie (it's the only layer that can deny).
        let deciding = if rule_decision.action == action {
            &rule_decision
        } else {
            &controller_decision
        };

        match action {
            RuleAction::Deny => {
                let reason = deciding
                    .failed_rules
                    .first()
                    .map(|f| f.reason.clone())
                    .unwrap_or_else(|| "denied".to_string());
                let updated = self.ledger.update_transaction_status(
                    record.id,
                    TransactionStatus::Denied,
                    TransactionPatch {
                        error: Some(reason.clone()),
                        ..Default::default()
                    },
                )?;
                self.emit(&correlation_id, "denied", reason.clone());
                Ok(SubmitOutcome::Denied {
                    record: updated,
                    reason,
                    risk_level: deciding.risk_level,
                    failed_rules: deciding.failed_rules.clone(),
                })
            }
            RuleAction::RequireApproval => {
                let reason = deciding
                    .failed_rules
                    .first()
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| "escalated".to_string());
                let controller = SpendingController::new(self.ledger);
                let approval = controller.request_approval(
                    &req,
                    &correlation_id,
                    &reason,
                    self.config.approval_expiry_hours,
                    now,
                )?;
                let updated = self.ledger.update_transaction_status(
                    record.id,
                    TransactionStatus::AwaitingApproval,
                    TransactionPatch::default(),
                )?;
                self.emit(&correlation_id, "awaiting_approval", format!("approval={}", approval.id));
                Ok(SubmitOutcome::AwaitingApproval {
                    record: updated,
                    approval_id: approval.id,
                })
            }
            RuleAction::Allow => {
                let submitted = self.sign_and_broadcast(&record, handle, nonce, gas_price)?;
                Ok(SubmitOutcome::Submitted(submitted))
            }
        }
    }

    /// `GetSpendingSummary`: trailing-hour/trailing-day spend for
    /// `principal` alongside the cap vector currently in force.
    pub fn spending_summary(&self, principal: Principal) -> Result<SpendingSummary, OrchestratorError> {
        let controller = SpendingController::new(self.ledger);
        let caps = self.config.security_level.caps();
        Ok(controller.spending_summary(principal, caps, TimeStamp::new())?)
    }

    /// Resumes a transaction after a human approves the deferred
    /// approval, signing and broadcasting it exactly as the direct-allow
    /// path would have.
    pub fn resume_after_approval(
        &self,
        transaction_id: u64,
        approval_id: &str,
        reviewer: &str,
        handle: &crate::vault::WalletHandle,
        nonce: u64,
        gas_price: u128,
    ) -> Result<SubmitOutcome, OrchestratorError> {
        let now = TimeStamp::new();
        let controller = SpendingController::new(self.ledger);
        controller.approve(approval_id, reviewer, now)?;

        let record = self.ledger.get_transaction(transaction_id)?;
        let stripe = self.stripes.stripe_for(record.principal);
        let _guard = stripe.lock().unwrap();

        let submitted = self.sign_and_broadcast(&record, handle, nonce, gas_price)?;
        Ok(SubmitOutcome::Submitted(submitted))
    }
}
