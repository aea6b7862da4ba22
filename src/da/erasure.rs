// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Systematic k-of-n Reed-Solomon shard codec over GF(2^8). The first `k`
//! shards carry the data (zero-padded); any `k` of the `n` recover all of
//! them.

use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ErasureError {
    #[error("invalid erasure parameters k={k}, n={n}, shard_size={shard_size}")]
    InvalidParams { k: usize, n: usize, shard_size: usize },
    #[error("data length {len} exceeds k*shard_size = {capacity}")]
    DataTooLarge { len: usize, capacity: usize },
    #[error("insufficient shards: {present} present, {required} required")]
    InsufficientShards { present: usize, required: usize },
    #[error("shard {index} has length {len}, expected {expected}")]
    ShardSizeMismatch {
        index: usize,
        len: usize,
        expected: usize,
    },
    #[error("reed-solomon failure: {0}")]
    Codec(String),
}

fn check_params(k: usize, n: usize, shard_size: usize) -> Result<(), ErasureError> {
    if k == 0 || n < k || shard_size == 0 || n > 255 {
        return Err(ErasureError::InvalidParams { k, n, shard_size });
    }
    Ok(())
}

fn codec(k: usize, n: usize) -> Result<ReedSolomon, ErasureError> {
    ReedSolomon::new(k, n - k).map_err(|e| ErasureError::Codec(e.to_string()))
}

/// Split `data` into `k` zero-padded data shards and extend with `n - k`
/// parity shards.
pub fn encode(
    data: &[u8],
    k: usize,
    n: usize,
    shard_size: usize,
) -> Result<Vec<Vec<u8>>, ErasureError> {
    check_params(k, n, shard_size)?;
    let capacity = k * shard_size;
    if data.len() > capacity {
        return Err(ErasureError::DataTooLarge {
            len: data.len(),
            capacity,
        });
    }

    let mut shards: Vec<Vec<u8>> = (0..n).map(|_| vec![0u8; shard_size]).collect();
    for (i, chunk) in data.chunks(shard_size).enumerate() {
        shards[i][..chunk.len()].copy_from_slice(chunk);
    }
    if n > k {
        codec(k, n)?
            .encode(&mut shards)
            .map_err(|e| ErasureError::Codec(e.to_string()))?;
    }
    Ok(shards)
}

/// Recover all `n` shards from a set with up to `n - k` erasures marked as
/// `None`.
pub fn reconstruct(
    mut shards: Vec<Option<Vec<u8>>>,
    k: usize,
    n: usize,
    shard_size: usize,
) -> Result<Vec<Vec<u8>>, ErasureError> {
    check_params(k, n, shard_size)?;
    if shards.len() != n {
        return Err(ErasureError::InvalidParams { k, n, shard_size });
    }
    for (index, shard) in shards.iter().enumerate() {
        if let Some(shard) = shard {
            if shard.len() != shard_size {
                return Err(ErasureError::ShardSizeMismatch {
                    index,
                    len: shard.len(),
                    expected: shard_size,
                });
            }
        }
    }
    let present = shards.iter().filter(|s| s.is_some()).count();
    if present < k {
        return Err(ErasureError::InsufficientShards {
            present,
            required: k,
        });
    }
    if n == k {
        // no parity: present >= k == n means every shard is already here
        return Ok(shards
            .into_iter()
            .map(|s| s.expect("all shards present"))
            .collect());
    }
    codec(k, n)?
        .reconstruct(&mut shards)
        .map_err(|e| match e {
            reed_solomon_erasure::Error::TooFewShardsPresent => {
                ErasureError::InsufficientShards {
                    present,
                    required: k,
                }
            }
            other => ErasureError::Codec(other.to_string()),
        })?;
    Ok(shards
        .into_iter()
        .map(|s| s.expect("reconstructed shard present"))
        .collect())
}

/// Check that the parity shards are consistent with the data shards.
pub fn verify(shards: &[Vec<u8>], k: usize, n: usize) -> Result<bool, ErasureError> {
    let shard_size = shards.first().map(Vec::len).unwrap_or_default();
    check_params(k, n, shard_size)?;
    if shards.len() != n {
        return Err(ErasureError::InvalidParams { k, n, shard_size });
    }
    if n == k {
        return Ok(true);
    }
    codec(k, n)?
        .verify(shards)
        .map_err(|e| ErasureError::Codec(e.to_string()))
}

/// Reassemble the original byte string from the data shards.
pub fn join(shards: &[Vec<u8>], k: usize, data_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data_len);
    for shard in shards.iter().take(k) {
        out.extend_from_slice(shard);
    }
    out.truncate(data_len);
    out
}
