//! The boundary between this crate and an actual chain node. Injected so
//! the orchestrator's pipeline can be exercised without a live RPC
//! endpoint.

/// Everything the orchestrator needs from a node: broadcasting a signed
/// transaction, polling for its receipt, and the chain id used for
/// EIP-155 signing.
pub trait BroadcastTransport: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Submits a raw signed transaction blob, returning the accepted
    /// transaction hash (as reported by the node, which should match the
    /// locally computed hash).
    fn broadcast_raw(&self, raw_tx: &[u8]) -> Result<String, TransportError>;

    /// Polls for a receipt. `Ok(None)` means still pending; callers are
    /// expected to retry with backoff.
    fn fetch_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct Receipt {
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("node unreachable: {0}")]
    Unreachable(String),
    #[error("node rejected transaction: {0}")]
    Rejected(String),
}

/// A fake transport for tests: every broadcast "succeeds" immediately
/// with a deterministic receipt, so the orchestrator pipeline can be
/// exercised end to end without a live node.
pub struct NullTransport {
    pub chain_id: u64,
    pub confirm_block: u64,
}

impl NullTransport {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            confirm_block: 1,
        }
    }
}

impl BroadcastTransport for NullTransport {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn broadcast_raw(&self, raw_tx: &[u8]) -> Result<String, TransportError> {
        let hash = crate::utils::keccak256(raw_tx);
        Ok(format!("0x{}", hex::encode(hash)))
    }

    fn fetch_receipt(&self, _tx_hash: &str) -> Result<Option<Receipt>, TransportError> {
        Ok(Some(Receipt {
            block_number: self.confirm_block,
            gas_used: 21_000,
            success: true,
        }))
    }
}

/// A transport that always fails to broadcast, for exercising the
/// orchestrator's failure path.
pub struct RejectingTransport {
    pub chain_id: u64,
}

impl BroadcastTransport for RejectingTransport {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn broadcast_raw(&self, _raw_tx: &[u8]) -> Result<String, TransportError> {
        Err(TransportError::Rejected("simulated node rejection".into()))
    }

    fn fetch_receipt(&self, _tx_hash: &str) -> Result<Option<Receipt>, TransportError> {
        Ok(None)
    }
}
