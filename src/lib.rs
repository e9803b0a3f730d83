//! ChainPilot: a mediating gateway between automated (AI or scripted)
//! clients and EVM-compatible chains. A transaction request passes
//! through rule evaluation and AI spending control before the wallet
//! vault ever signs anything, with every step recorded to a durable
//! ledger.

pub mod address;
pub mod approval;
pub mod config;
pub mod controller;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod ledger;
pub mod orchestrator;
pub mod principal;
pub mod rule;
pub mod rules;
pub mod spending;
pub mod timestamp;
pub mod transaction;
pub mod transport;
pub mod utils;
pub mod vault;

pub use address::Address;
pub use config::{CapVector, PolicyConfig, SecurityLevel};
pub use controller::{SpendingController, SpendingSummary};
pub use error::{ControllerError, ErrorKind, LedgerError, OrchestratorError, RuleError, VaultError};
pub use evaluation::{Decision, RiskLevel};
pub use ledger::Ledger;
pub use orchestrator::{Orchestrator, SubmitOutcome};
pub use principal::Principal;
pub use rule::{Rule, RuleAction, RuleKind, RuleParameters, SpendingScope};
pub use rules::{RuleCache, RuleEngine};
pub use transaction::{TransactionRecord, TransactionRequest, TransactionStatus};
pub use transport::{BroadcastTransport, NullTransport, Receipt, RejectingTransport, TransportError};
pub use vault::{UnsignedTransaction, WalletHandle, WalletVault};
