//! Utility functions for hashing, id generation and serialisation

use bech32::Bech32m;
use sha3::{Digest, Keccak256};
use uuid7::uuid7;

/// Construct a unique id then encode using bech32 with the given human-readable prefix.
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// A plain uuid7 string, used for ids that are not displayed to end users
/// (correlation ids, approval ids).
pub fn new_uuid7_string() -> String {
    uuid7().to_string()
}

/// Keccak-256 digest, used for address derivation and transaction hashing.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    buf
}

/// Derive a 20-byte EVM address from an uncompressed secp256k1 public key
/// (the 64-byte X||Y coordinates, no leading 0x04 tag).
pub fn address_from_uncompressed_pubkey(pubkey_xy: &[u8; 64]) -> [u8; 20] {
    let digest = keccak256(pubkey_xy);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..]);
    addr
}

/// Render a 20-byte address as a `0x`-prefixed hex string.
pub fn address_to_hex(addr: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(addr))
}

/// Parse a `0x`-prefixed (or bare) hex address string into 20 bytes.
pub fn address_from_hex(s: &str) -> anyhow::Result<[u8; 20]> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed)?;
    if bytes.len() != 20 {
        anyhow::bail!("address must decode to 20 bytes, got {}", bytes.len());
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bech32_roundtrip_prefix() {
        let id = new_uuid_to_bech32("wallet_").unwrap();
        assert!(id.starts_with("wallet_1"));
    }

    #[test]
    fn address_hex_roundtrip() {
        let addr = [0xabu8; 20];
        let hex = address_to_hex(&addr);
        assert_eq!(hex, format!("0x{}", "ab".repeat(20)));
        let back = address_from_hex(&hex).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn keccak_is_deterministic() {
        assert_eq!(keccak256(b"abc"), keccak256(b"abc"));
        assert_ne!(keccak256(b"abc"), keccak256(b"abd"));
    }
}
