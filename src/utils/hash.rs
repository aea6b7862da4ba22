// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use sha3::{Digest, Sha3_256};

/// SHA3-256 of a single buffer.
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA3-256 over a sequence of buffers, hashed as one concatenated message.
pub fn sha3_256_concat<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_matches_single_buffer() {
        let whole = sha3_256(b"hello world");
        let parts = sha3_256_concat([b"hello ".as_slice(), b"world".as_slice()]);
        assert_eq!(whole, parts);
    }

    #[test]
    fn empty_input_is_sha3_empty() {
        // Well-known SHA3-256 of the empty string.
        assert_eq!(
            hex::encode(sha3_256(b"")),
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );
    }
}
