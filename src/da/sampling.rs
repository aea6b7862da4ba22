// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Data-availability sampling: the probability that a verifier misses all
//! corrupted shards, the inverse "how many samples for a target miss
//! probability", and light-client verification of sampled leaves.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use statrs::function::gamma::ln_gamma;

use crate::da::nmt::{verify_inclusion, InclusionProof};

fn ln_choose(n: u64, k: u64) -> f64 {
    ln_gamma(n as f64 + 1.0) - ln_gamma(k as f64 + 1.0) - ln_gamma((n - k) as f64 + 1.0)
}

/// Probability of missing all `c` corrupted items when sampling `s` distinct
/// indices out of `n`: `C(n-c, s) / C(n, s)`.
pub fn hypergeom_miss_prob(n: u64, c: u64, s: u64) -> f64 {
    if s == 0 || c == 0 {
        return 1.0;
    }
    if c >= n || s >= n || s > n - c {
        return 0.0;
    }
    (ln_choose(n - c, s) - ln_choose(n, s)).exp()
}

/// With-replacement upper bound `(1 - c/n)^s`.
pub fn replacement_miss_prob(n: u64, c: u64, s: u64) -> f64 {
    if s == 0 || c == 0 {
        return 1.0;
    }
    if c >= n {
        return 0.0;
    }
    (1.0 - c as f64 / n as f64).powi(s as i32)
}

/// Upper-bound the miss probability for a sampling plan.
///
/// `assumed_corrupt_fraction`: `None` assumes the weakest non-trivial level
/// (one bad shard). A value in (0, 1) is a fraction converted to
/// `ceil(f * n)` corrupted shards; values >= 1.0 are treated as a count,
/// clamped to `n - 1`.
pub fn estimate_p_fail_upper(
    population_size: u64,
    sample_count: u64,
    assumed_corrupt_fraction: Option<f64>,
    without_replacement: bool,
) -> f64 {
    let n = population_size;
    if n == 0 || sample_count == 0 {
        return 1.0;
    }
    let c = match assumed_corrupt_fraction {
        None => 1,
        Some(f) if f <= 0.0 => return 1.0,
        Some(f) if f < 1.0 => ((f * n as f64).ceil() as u64).max(1),
        Some(f) => (f as u64).min(n - 1),
    };
    if c == 0 {
        return 1.0;
    }
    if c >= n {
        return 0.0;
    }
    if without_replacement {
        hypergeom_miss_prob(n, c, sample_count)
    } else {
        replacement_miss_prob(n, c, sample_count)
    }
}

/// Smallest `s` with miss probability <= `target_p_fail` for corruption
/// fraction `f`. The hypergeometric form binary-searches; the
/// with-replacement bound has a closed form.
pub fn required_samples_for_target_pfail(
    population_size: u64,
    target_p_fail: f64,
    assumed_corrupt_fraction: f64,
    without_replacement: bool,
    max_cap: Option<u64>,
) -> u64 {
    let n = population_size;
    if n == 0 {
        return 0;
    }
    if target_p_fail <= 0.0 || target_p_fail >= 1.0 {
        return 0;
    }
    let f = assumed_corrupt_fraction;
    if f <= 0.0 || f >= 1.0 {
        // nothing to find, or sampling cannot help
        return 0;
    }
    let c = ((f * n as f64).ceil() as u64)
        .min(n.saturating_sub(1))
        .max(1);
    let cap = max_cap.map_or(n, |cap| cap.min(n));

    if without_replacement {
        let (mut lo, mut hi) = (0u64, cap);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if hypergeom_miss_prob(n, c, mid) <= target_p_fail {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    } else {
        let x = (1.0 - c as f64 / n as f64).clamp(1e-18, 1.0 - 1e-18);
        let s = (target_p_fail.ln() / x.ln()).ceil().max(0.0) as u64;
        s.min(cap)
    }
}

/// Miss probability when at least one shard is bad.
pub fn one_bad_share_bound(n: u64, s: u64, without_replacement: bool) -> f64 {
    if n == 0 {
        return 1.0;
    }
    if without_replacement {
        let s = s.min(n);
        (n - s) as f64 / n as f64
    } else {
        ((n - 1) as f64 / n as f64).powi(s as i32)
    }
}

/// One sampled leaf with its inclusion path. `index` is the leaf position
/// in tree order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub index: u64,
    pub namespace: u64,
    pub data: Vec<u8>,
    pub proof: InclusionProof,
}

/// Light-client check: every sampled leaf must verify against the root at
/// its claimed position. Rejects on the first failure.
pub fn verify_samples(root: &[u8; 32], samples: &[Sample]) -> bool {
    samples.iter().all(|sample| {
        sample.proof.index == sample.index
            && verify_inclusion(root, sample.namespace, &sample.data, &sample.proof)
    })
}

/// Draw `s` distinct indices from `0..n` under a seeded RNG.
pub fn draw_sample_indices(n: u64, s: u64, seed: u64) -> Vec<u64> {
    let mut indices: Vec<u64> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    indices.truncate(s.min(n) as usize);
    indices.sort_unstable();
    indices
}
