//! Error types for every layer of the pipeline.
//!
//! Each component returns its own flat error enum; the orchestrator's error
//! wraps all of them via `#[from]` so a caller can `?` through the pipeline
//! while still matching on the originating layer when needed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("wallet '{0}' already exists")]
    AlreadyExists(String),
    #[error("wallet '{0}' not found")]
    NotFound(String),
    #[error("bad credentials for wallet '{0}'")]
    BadCredentials(String),
    #[error("wallet storage error: {0}")]
    Storage(String),
    #[error("signing error: {0}")]
    Signing(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("transaction hash already present: {0}")]
    DuplicateHash(String),
    #[error("illegal status transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
    #[error("rule {0} not found")]
    RuleNotFound(u64),
    #[error("approval {0} not found")]
    ApprovalNotFound(String),
    #[error("transaction {0} not found")]
    TransactionNotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("encoding error: {0}")]
    Encoding(String),
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("rule parameters do not match declared kind: {0}")]
    ParameterMismatch(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("approval {0} not found")]
    ApprovalNotFound(String),
    #[error("approval {0} is already {1}, cannot transition to {2}")]
    InvalidTransition(String, String, String),
    #[error("approval {0} has expired")]
    Expired(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// A coarse classification surfaced across the adapter boundary so
/// callers don't need to pattern-match the full error enum tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    BadCredentials,
    NotFound,
    DeniedByRule,
    AwaitingApproval,
    Transport,
    Invariant,
    Expired,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Validation(_) => ErrorKind::Validation,
            OrchestratorError::Vault(VaultError::BadCredentials(_)) => ErrorKind::BadCredentials,
            OrchestratorError::Vault(VaultError::NotFound(_)) => ErrorKind::NotFound,
            OrchestratorError::Vault(_) => ErrorKind::Invariant,
            OrchestratorError::Ledger(LedgerError::RuleNotFound(_))
            | OrchestratorError::Ledger(LedgerError::ApprovalNotFound(_))
            | OrchestratorError::Ledger(LedgerError::TransactionNotFound(_)) => ErrorKind::NotFound,
            OrchestratorError::Ledger(LedgerError::DuplicateHash(_)) => ErrorKind::Validation,
            OrchestratorError::Ledger(_) => ErrorKind::Invariant,
            OrchestratorError::Rule(_) => ErrorKind::Invariant,
            OrchestratorError::Controller(ControllerError::ApprovalNotFound(_)) => {
                ErrorKind::NotFound
            }
            OrchestratorError::Controller(ControllerError::Expired(_)) => ErrorKind::Expired,
            OrchestratorError::Controller(_) => ErrorKind::Invariant,
            OrchestratorError::Transport(_) => ErrorKind::Transport,
            OrchestratorError::Invariant(_) => ErrorKind::Invariant,
        }
    }
}
