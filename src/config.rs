//! Process-wide policy record, set once at start and never taken from
//! per-request input.

/// Amounts throughout this crate are integers in "milli-units": one native
/// unit (e.g. `2.0`) is represented as `2 * MILLI_UNIT`. This keeps spend
/// arithmetic exact
/// without floating point while still letting deployments express caps
/// like `0.1` as an integer (`100`).
pub const MILLI_UNIT: u128 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Unrestricted,
    Moderate,
    Strict,
    Lockdown,
}

/// The five spending caps a security level can configure. `None` means
/// unbounded.
#[derive(Debug, Clone, Copy)]
pub struct CapVector {
    pub max_single_tx: Option<u128>,
    pub hourly_limit: Option<u128>,
    pub daily_limit: Option<u128>,
    pub approval_threshold: Option<u128>,
    pub max_tx_per_hour: Option<u64>,
}

impl SecurityLevel {
    pub fn caps(self) -> CapVector {
        match self {
            SecurityLevel::Unrestricted => CapVector {
                max_single_tx: None,
                hourly_limit: None,
                daily_limit: None,
                approval_threshold: None,
                max_tx_per_hour: None,
            },
            SecurityLevel::Moderate => CapVector {
                max_single_tx: Some(2 * MILLI_UNIT),
                hourly_limit: Some(5 * MILLI_UNIT),
                daily_limit: Some(20 * MILLI_UNIT),
                approval_threshold: Some(MILLI_UNIT / 2),
                max_tx_per_hour: Some(50),
            },
            SecurityLevel::Strict => CapVector {
                max_single_tx: Some(MILLI_UNIT / 2),
                hourly_limit: Some(2 * MILLI_UNIT),
                daily_limit: Some(10 * MILLI_UNIT),
                approval_threshold: Some(MILLI_UNIT / 10),
                max_tx_per_hour: Some(20),
            },
            SecurityLevel::Lockdown => CapVector {
                max_single_tx: Some(0),
                hourly_limit: Some(0),
                daily_limit: Some(0),
                approval_threshold: Some(0),
                max_tx_per_hour: Some(0),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub security_level: SecurityLevel,
    /// Default approval expiry, in hours, applied to every newly created
    /// `ApprovalRequest`.
    pub approval_expiry_hours: i64,
    /// KDF iteration count override; must be at least 100,000, callers
    /// may raise it.
    pub kdf_iterations: u32,
    pub chain_id: u64,
}

impl PolicyConfig {
    pub fn new(security_level: SecurityLevel, chain_id: u64) -> Self {
        Self {
            security_level,
            approval_expiry_hours: 24,
            kdf_iterations: 100_000,
            chain_id,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::new(SecurityLevel::Strict, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockdown_zeroes_every_cap() {
        let caps = SecurityLevel::Lockdown.caps();
        assert_eq!(caps.max_single_tx, Some(0));
        assert_eq!(caps.approval_threshold, Some(0));
        assert_eq!(caps.max_tx_per_hour, Some(0));
    }

    #[test]
    fn unrestricted_has_no_caps() {
        let caps = SecurityLevel::Unrestricted.caps();
        assert!(caps.max_single_tx.is_none());
        assert!(caps.max_tx_per_hour.is_none());
    }
}
