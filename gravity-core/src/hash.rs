use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha3::digest::Digest as _;
use sha3::Keccak256;

/// 32-byte Keccak-256 digest.
///
/// Used for commitments (hash of a not-yet-revealed value), aggregated value
/// hashes signed by oracles, and transaction ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash256(#[serde(with = "crate::encoding::as_hex")] [u8; 32]);

impl Hash256 {
    pub const fn from_byte_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Keccak-256 of `data`
    pub fn digest(data: &[u8]) -> Self {
        Self(Keccak256::digest(data).into())
    }

    pub const fn to_byte_array(self) -> [u8; 32] {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 32] = hex::decode(s)?
            .try_into()
            .map_err(|_| anyhow::format_err!("expected 32 bytes of hex"))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_vector() {
        // keccak256("") is a well-known constant
        assert_eq!(
            Hash256::digest(b"").to_string(),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn display_parse_round_trip() {
        let digest = Hash256::digest(b"pulse");
        assert_eq!(digest.to_string().parse::<Hash256>().unwrap(), digest);
    }
}
