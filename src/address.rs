//! EVM address newtype — 20 raw bytes, hex-displayed, CBOR-encoded as a byte string.

use crate::utils::{address_from_hex, address_to_hex};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(Self(address_from_hex(s)?))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&address_to_hex(&self.0))
    }
}

impl<C> minicbor::Encode<C> for Address {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Address {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("address must be 20 bytes"))?;
        Ok(Address(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_roundtrip() {
        let a = Address::parse("0x0000000000000000000000000000000000000042").unwrap();
        assert_eq!(
            a.to_string(),
            "0x0000000000000000000000000000000000000042"
        );
    }

    #[test]
    fn cbor_roundtrip() {
        let a = Address::from_bytes([7u8; 20]);
        let enc = minicbor::to_vec(a).unwrap();
        let dec: Address = minicbor::decode(&enc).unwrap();
        assert_eq!(a, dec);
    }
}
