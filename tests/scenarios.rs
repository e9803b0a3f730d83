//! End-to-end scenarios driving the full pipeline: rule engine, AI
//! spending controller, wallet vault, and ledger, wired together through
//! the orchestrator exactly as a caller would use them.

use anyhow::Context;
use chainpilot_core::config::PolicyConfig;
use chainpilot_core::error::OrchestratorError;
use chainpilot_core::rule::{Rule, RuleAction, RuleParameters};
use chainpilot_core::transport::NullTransport;
use chainpilot_core::{
    Address, Ledger, Orchestrator, Principal, SecurityLevel, SubmitOutcome, TransactionRequest,
    TransactionStatus, WalletVault,
};
use tempfile::tempdir;

fn open_ledger() -> anyhow::Result<Ledger> {
    let db = sled::Config::new().temporary(true).open()?;
    Ok(Ledger::open(db)?)
}

fn open_vault() -> anyhow::Result<(tempfile::TempDir, WalletVault)> {
    let dir = tempdir()?;
    let vault = WalletVault::open(dir.path(), 100_000)?;
    Ok((dir, vault))
}

#[test]
fn simple_allow_flows_through_to_confirmation() -> anyhow::Result<()> {
    let ledger = open_ledger()?;
    let (_dir, vault) = open_vault()?;
    let transport = NullTransport::new(1);
    let config = PolicyConfig::new(SecurityLevel::Unrestricted, 1);
    let orchestrator = Orchestrator::new(&ledger, &vault, &transport, config)?;

    let address = vault.create("wallet1", "hunter2")?;
    let handle = vault.load("wallet1", "hunter2")?;

    let req = TransactionRequest::new(address, Address::from_bytes([0x42; 20]), 10, Principal::Human);
    let outcome = orchestrator
        .submit(req, &handle, 0, 1)
        .context("submit should reach the broadcast step")?;

    let record = match outcome {
        SubmitOutcome::Submitted(record) => record,
        other => panic!("expected Submitted, got {other:?}"),
    };
    assert_eq!(record.status, TransactionStatus::Submitted);

    let confirmed = orchestrator.poll_confirmation(record.id)?;
    assert_eq!(confirmed.status, TransactionStatus::Confirmed);
    assert!(confirmed.block_number.is_some());

    Ok(())
}

#[test]
fn address_blacklist_rule_denies_transaction() -> anyhow::Result<()> {
    let ledger = open_ledger()?;
    let (_dir, vault) = open_vault()?;
    let transport = NullTransport::new(1);
    let config = PolicyConfig::new(SecurityLevel::Unrestricted, 1);

    let blocked = Address::from_bytes([0xde; 20]);
    let now = chainpilot_core::timestamp::TimeStamp::new();
    ledger.create_rule(Rule {
        id: 0,
        name: "known bad actor".into(),
        parameters: RuleParameters::AddressBlacklist { addresses: vec![blocked] },
        action: RuleAction::Deny,
        enabled: true,
        priority: 100,
        created_at: now,
        updated_at: now,
    })?;

    let orchestrator = Orchestrator::new(&ledger, &vault, &transport, config)?;
    let address = vault.create("wallet1", "hunter2")?;
    let handle = vault.load("wallet1", "hunter2")?;

    let req = TransactionRequest::new(address, blocked, 10, Principal::Human);
    let outcome = orchestrator.submit(req, &handle, 0, 1)?;
    match outcome {
        SubmitOutcome::Denied {
            reason,
            failed_rules,
            ..
        } => {
            assert!(reason.contains("blacklisted"));
            assert_eq!(failed_rules.len(), 1);
            assert_eq!(failed_rules[0].name, "known bad actor");
        }
        other => panic!("expected Denied, got {other:?}"),
    }

    Ok(())
}

#[test]
fn ai_approval_threshold_defers_to_approval() -> anyhow::Result<()> {
    let ledger = open_ledger()?;
    let (_dir, vault) = open_vault()?;
    let transport = NullTransport::new(1);
    // Moderate: hourly_limit = 5 * MILLI_UNIT = 5000
    let config = PolicyConfig::new(SecurityLevel::Moderate, 1);
    let orchestrator = Orchestrator::new(&ledger, &vault, &transport, config)?;

    let address = vault.create("ai-agent", "pw")?;
    let handle = vault.load("ai-agent", "pw")?;

    // First transaction well under every Moderate cap and under the
    // approval threshold (500): goes straight through.
    let req1 = TransactionRequest::new(address, Address::from_bytes([1; 20]), 400, Principal::Ai);
    let outcome1 = orchestrator.submit(req1, &handle, 0, 1)?;
    assert!(matches!(outcome1, SubmitOutcome::Submitted(_)));

    // Second transaction pushes spend over the approval threshold.
    let req2 = TransactionRequest::new(address, Address::from_bytes([2; 20]), 600, Principal::Ai);
    let outcome2 = orchestrator.submit(req2, &handle, 1, 1)?;
    assert!(matches!(outcome2, SubmitOutcome::AwaitingApproval { .. }));

    Ok(())
}

#[test]
fn ai_hourly_cap_trip_defers_to_approval_not_deny() -> anyhow::Result<()> {
    let ledger = open_ledger()?;
    let (_dir, vault) = open_vault()?;
    let transport = NullTransport::new(1);
    // Moderate: hourly_limit = 5000, max_single_tx = 2000.
    let config = PolicyConfig::new(SecurityLevel::Moderate, 1);
    let orchestrator = Orchestrator::new(&ledger, &vault, &transport, config)?;

    let address = vault.create("ai-agent", "pw")?;
    let handle = vault.load("ai-agent", "pw")?;

    let now = chainpilot_core::timestamp::TimeStamp::new();
    ledger.insert_spending_record(chainpilot_core::spending::SpendingRecord {
        id: 0,
        principal: Principal::Ai,
        amount: 3_600,
        recorded_at: now,
    })?;

    // 3600 prior + 2000 this = 5600 > 5000 hourly limit, while 2000 stays
    // at (not over) the 2000 single-tx cap: isolates the hourly-cap trip.
    let req = TransactionRequest::new(address, Address::from_bytes([4; 20]), 2_000, Principal::Ai);
    let outcome = orchestrator.submit(req, &handle, 0, 1)?;
    match outcome {
        SubmitOutcome::AwaitingApproval { .. } => {}
        other => panic!("expected AwaitingApproval, got {other:?}"),
    }

    let approvals = ledger.list_approvals(None)?;
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].reason, "hourly_cap");

    Ok(())
}

#[test]
fn ai_single_tx_cap_trip_defers_then_expires() -> anyhow::Result<()> {
    let ledger = open_ledger()?;
    let (_dir, vault) = open_vault()?;
    let transport = NullTransport::new(1);
    let mut config = PolicyConfig::new(SecurityLevel::Moderate, 1);
    config.approval_expiry_hours = 0;
    let orchestrator = Orchestrator::new(&ledger, &vault, &transport, config)?;

    let address = vault.create("ai-agent", "pw")?;
    let handle = vault.load("ai-agent", "pw")?;

    // Moderate max_single_tx = 2000; this amount trips only that cap.
    let req = TransactionRequest::new(address, Address::from_bytes([5; 20]), 2_500, Principal::Ai);
    let outcome = orchestrator.submit(req, &handle, 0, 1)?;
    let approval_id = match outcome {
        SubmitOutcome::AwaitingApproval { approval_id, .. } => approval_id,
        other => panic!("expected AwaitingApproval, got {other:?}"),
    };
    let approval = ledger.get_approval(&approval_id)?;
    assert_eq!(approval.reason, "single_tx_cap");

    let controller = chainpilot_core::SpendingController::new(&ledger);
    let later = chainpilot_core::timestamp::TimeStamp::new().checked_add_hours(1);
    let swept = controller.sweep_expired(later)?;
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].id, approval_id);
    assert_eq!(
        swept[0].status,
        chainpilot_core::approval::ApprovalStatus::Expired
    );

    Ok(())
}

#[test]
fn expired_approval_is_swept_and_cannot_be_resumed() -> anyhow::Result<()> {
    let ledger = open_ledger()?;
    let (_dir, vault) = open_vault()?;
    let transport = NullTransport::new(1);
    let mut config = PolicyConfig::new(SecurityLevel::Moderate, 1);
    config.approval_expiry_hours = 0;
    let orchestrator = Orchestrator::new(&ledger, &vault, &transport, config)?;

    let address = vault.create("ai-agent", "pw")?;
    let handle = vault.load("ai-agent", "pw")?;

    let req = TransactionRequest::new(address, Address::from_bytes([3; 20]), 600, Principal::Ai);
    let outcome = orchestrator.submit(req, &handle, 0, 1)?;
    let approval_id = match outcome {
        SubmitOutcome::AwaitingApproval { approval_id, .. } => approval_id,
        other => panic!("expected AwaitingApproval, got {other:?}"),
    };

    let controller = chainpilot_core::SpendingController::new(&ledger);
    let later = chainpilot_core::timestamp::TimeStamp::new().checked_add_hours(1);
    let swept = controller.sweep_expired(later)?;
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].id, approval_id);

    let err = controller.approve(&approval_id, "reviewer1", later).unwrap_err();
    assert!(matches!(
        err,
        chainpilot_core::error::ControllerError::InvalidTransition(_, _, _)
    ));

    Ok(())
}

#[test]
fn whitelist_and_threshold_compose_to_most_restrictive() -> anyhow::Result<()> {
    let ledger = open_ledger()?;
    let (_dir, vault) = open_vault()?;
    let transport = NullTransport::new(1);
    let config = PolicyConfig::new(SecurityLevel::Unrestricted, 1);

    let trusted = Address::from_bytes([7; 20]);
    let now = chainpilot_core::timestamp::TimeStamp::new();
    ledger.create_rule(Rule {
        id: 0,
        name: "trusted counterparties".into(),
        parameters: RuleParameters::AddressWhitelist { addresses: vec![trusted] },
        action: RuleAction::Deny,
        enabled: true,
        priority: 100,
        created_at: now,
        updated_at: now,
    })?;
    ledger.create_rule(Rule {
        id: 0,
        name: "large amount review".into(),
        parameters: RuleParameters::AmountThreshold { threshold: 50 },
        action: RuleAction::RequireApproval,
        enabled: true,
        priority: 50,
        created_at: now,
        updated_at: now,
    })?;

    let orchestrator = Orchestrator::new(&ledger, &vault, &transport, config)?;
    let address = vault.create("wallet1", "pw")?;
    let handle = vault.load("wallet1", "pw")?;

    // destination not whitelisted -> deny wins over the amount threshold's
    // require_approval, regardless of which rule evaluates first.
    let req = TransactionRequest::new(address, Address::from_bytes([9; 20]), 100, Principal::Human);
    let outcome = orchestrator.submit(req, &handle, 0, 1)?;
    assert!(matches!(outcome, SubmitOutcome::Denied { .. }));

    // destination whitelisted, amount over threshold -> require_approval only.
    let req2 = TransactionRequest::new(address, trusted, 100, Principal::Human);
    let outcome2 = orchestrator.submit(req2, &handle, 0, 1)?;
    assert!(matches!(outcome2, SubmitOutcome::AwaitingApproval { .. }));

    Ok(())
}

#[test]
fn rule_created_after_orchestrator_construction_needs_a_refresh() -> anyhow::Result<()> {
    let ledger = open_ledger()?;
    let (_dir, vault) = open_vault()?;
    let transport = NullTransport::new(1);
    let config = PolicyConfig::new(SecurityLevel::Unrestricted, 1);
    let orchestrator = Orchestrator::new(&ledger, &vault, &transport, config)?;

    let address = vault.create("wallet1", "pw")?;
    let handle = vault.load("wallet1", "pw")?;
    let blocked = Address::from_bytes([0xaa; 20]);

    let now = chainpilot_core::timestamp::TimeStamp::new();
    ledger.create_rule(Rule {
        id: 0,
        name: "late blacklist".into(),
        parameters: RuleParameters::AddressBlacklist { addresses: vec![blocked] },
        action: RuleAction::Deny,
        enabled: true,
        priority: 100,
        created_at: now,
        updated_at: now,
    })?;

    // The orchestrator's rule cache was populated before this rule existed.
    let req = TransactionRequest::new(address, blocked, 10, Principal::Human);
    let stale_outcome = orchestrator.submit(req, &handle, 0, 1)?;
    assert!(matches!(stale_outcome, SubmitOutcome::Submitted(_)));

    orchestrator.refresh_rules()?;
    let req2 = TransactionRequest::new(address, blocked, 10, Principal::Human);
    let fresh_outcome = orchestrator.submit(req2, &handle, 1, 1)?;
    assert!(matches!(fresh_outcome, SubmitOutcome::Denied { .. }));

    Ok(())
}

#[test]
fn wrong_password_never_exposes_the_signing_key() -> anyhow::Result<()> {
    let (_dir, vault) = open_vault()?;
    vault.create("wallet1", "correct horse battery staple")?;
    let err = vault.load("wallet1", "wrong password").unwrap_err();
    assert!(matches!(err, chainpilot_core::error::VaultError::BadCredentials(_)));

    Ok(())
}

#[test]
fn broadcast_failure_surfaces_as_transport_error() -> anyhow::Result<()> {
    let ledger = open_ledger()?;
    let (_dir, vault) = open_vault()?;
    let transport = chainpilot_core::transport::RejectingTransport { chain_id: 1 };
    let config = PolicyConfig::new(SecurityLevel::Unrestricted, 1);
    let orchestrator = Orchestrator::new(&ledger, &vault, &transport, config)?;

    let address = vault.create("wallet1", "pw")?;
    let handle = vault.load("wallet1", "pw")?;

    let req = TransactionRequest::new(address, Address::from_bytes([1; 20]), 10, Principal::Human);
    let err = orchestrator.submit(req, &handle, 0, 1).unwrap_err();
    assert!(matches!(err, OrchestratorError::Transport(_)));

    // The transaction is left in Submitted (signed and spend-recorded) even
    // though the broadcast itself failed; the caller can retry the broadcast
    // without re-running authorization.
    let rows = ledger.list_transactions()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, TransactionStatus::Submitted);

    Ok(())
}
