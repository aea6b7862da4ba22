// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod clock;
pub mod hash;

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use hash::{sha3_256, sha3_256_concat};

/// Parse a `0x`-prefixed (or bare) hex string into a 32-byte commitment.
pub fn parse_commitment(s: &str) -> Option<[u8; 32]> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped).ok()?;
    <[u8; 32]>::try_from(bytes.as_slice()).ok()
}

/// Render a commitment the way the HTTP surfaces expect it.
pub fn commitment_hex(root: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_roundtrip() {
        let root = [0xabu8; 32];
        let s = commitment_hex(&root);
        assert_eq!(parse_commitment(&s), Some(root));
        assert_eq!(parse_commitment(s.trim_start_matches("0x")), Some(root));
        assert_eq!(parse_commitment("0x1234"), None);
        assert_eq!(parse_commitment("zz"), None);
    }
}
