// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-provider SLA aggregates over a rolling window: success rate, trap and
//! QoS averages (EWMA fallback), latency percentiles from a fixed-edge
//! histogram, and heartbeat-derived availability.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Latency bucket edges in milliseconds; one overflow bucket sits past the
/// last edge.
pub const DEFAULT_LATENCY_BUCKETS_MS: [u64; 21] = [
    25, 50, 75, 100, 150, 200, 300, 400, 500, 750, 1_000, 1_500, 2_000, 3_000, 5_000, 7_500,
    10_000, 15_000, 20_000, 30_000, 60_000,
];

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

fn ewma(prev: Option<f64>, new: f64, alpha: f64) -> f64 {
    match prev {
        None => new,
        Some(prev) => (1.0 - alpha) * prev + alpha * new,
    }
}

/// One completed job's measured outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobMeasure {
    pub success: bool,
    /// Fraction of trap tests passed, if trap tests ran.
    pub traps_ratio: Option<f64>,
    /// Quality-of-service score in [0, 1], if reported.
    pub qos_score: Option<f64>,
    pub latency_ms: u64,
    pub timestamp_s: f64,
}

impl JobMeasure {
    fn normalized(mut self) -> Self {
        self.traps_ratio = self.traps_ratio.map(clamp01);
        self.qos_score = self.qos_score.map(clamp01);
        self
    }
}

/// Heartbeats → availability. Each heartbeat at `t` covers `[t, t + ttl]`;
/// availability over a window is the union length of covered intervals
/// intersected with the window, over the window length.
#[derive(Debug, Clone)]
pub struct AvailabilityTracker {
    ttl_s: f64,
    beats: VecDeque<f64>,
}

impl AvailabilityTracker {
    pub fn new(ttl_s: f64) -> Self {
        Self {
            ttl_s: ttl_s.max(f64::MIN_POSITIVE),
            beats: VecDeque::new(),
        }
    }

    /// Record a heartbeat. Slightly out-of-order beats are inserted sorted.
    pub fn heartbeat(&mut self, t_s: f64) {
        if self.beats.back().is_none_or(|last| t_s >= *last) {
            self.beats.push_back(t_s);
        } else {
            let pos = self.beats.partition_point(|beat| *beat < t_s);
            self.beats.insert(pos, t_s);
        }
    }

    fn prune_older_than(&mut self, cutoff_s: f64) {
        while let Some(first) = self.beats.front() {
            if *first + self.ttl_s <= cutoff_s {
                self.beats.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn availability(&mut self, now_s: f64, window_s: f64) -> f64 {
        if window_s <= 0.0 {
            return 0.0;
        }
        let window_start = now_s - window_s;
        self.prune_older_than(window_start - self.ttl_s);

        let mut intervals: Vec<(f64, f64)> = self
            .beats
            .iter()
            .filter_map(|t| {
                let a = window_start.max(*t);
                let b = now_s.min(*t + self.ttl_s);
                (b > a).then_some((a, b))
            })
            .collect();
        if intervals.is_empty() {
            return 0.0;
        }
        intervals.sort_by(|x, y| x.0.total_cmp(&y.0));

        let mut covered = 0.0;
        let (mut lo, mut hi) = intervals[0];
        for (a, b) in intervals.into_iter().skip(1) {
            if a <= hi {
                hi = hi.max(b);
            } else {
                covered += hi - lo;
                (lo, hi) = (a, b);
            }
        }
        covered += hi - lo;
        clamp01(covered / window_s)
    }
}

/// Point-in-time aggregates for SLA evaluation and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub window_s: f64,
    pub n_jobs: usize,
    pub success_rate: f64,
    pub traps_ratio_avg: Option<f64>,
    pub qos_avg: Option<f64>,
    pub latency_p50_ms: Option<u64>,
    pub latency_p95_ms: Option<u64>,
    pub latency_p99_ms: Option<u64>,
    pub availability: f64,
}

/// Rolling aggregates over the last `window_s` seconds. Jobs are pruned on
/// every snapshot; histograms and percentiles are recomputed from the live
/// window, with EWMAs carrying trap/QoS signal across empty windows.
#[derive(Debug, Clone)]
pub struct ProviderMetricsWindow {
    window_s: f64,
    ewma_alpha: f64,
    latency_edges: Vec<u64>,
    jobs: VecDeque<JobMeasure>,
    ewma_traps: Option<f64>,
    ewma_qos: Option<f64>,
    availability: AvailabilityTracker,
}

impl Default for ProviderMetricsWindow {
    fn default() -> Self {
        Self::new(900.0, 0.2, None, 60.0)
    }
}

impl ProviderMetricsWindow {
    pub fn new(
        window_s: f64,
        ewma_alpha: f64,
        latency_buckets_ms: Option<Vec<u64>>,
        availability_ttl_s: f64,
    ) -> Self {
        let mut latency_edges = latency_buckets_ms
            .filter(|edges| !edges.is_empty())
            .unwrap_or_else(|| DEFAULT_LATENCY_BUCKETS_MS.to_vec());
        latency_edges.sort_unstable();
        Self {
            window_s: window_s.max(f64::MIN_POSITIVE),
            ewma_alpha: ewma_alpha.clamp(f64::MIN_POSITIVE, 1.0),
            latency_edges,
            jobs: VecDeque::new(),
            ewma_traps: None,
            ewma_qos: None,
            availability: AvailabilityTracker::new(availability_ttl_s),
        }
    }

    pub fn record_job(&mut self, measure: JobMeasure) {
        let measure = measure.normalized();
        if let Some(traps) = measure.traps_ratio {
            self.ewma_traps = Some(ewma(self.ewma_traps, traps, self.ewma_alpha));
        }
        if let Some(qos) = measure.qos_score {
            self.ewma_qos = Some(ewma(self.ewma_qos, qos, self.ewma_alpha));
        }
        self.jobs.push_back(measure);
    }

    pub fn heartbeat(&mut self, t_s: f64) {
        self.availability.heartbeat(t_s);
    }

    fn prune(&mut self, now_s: f64) {
        let cutoff = now_s - self.window_s;
        while self
            .jobs
            .front()
            .is_some_and(|job| job.timestamp_s < cutoff)
        {
            self.jobs.pop_front();
        }
    }

    fn latency_histogram(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.latency_edges.len() + 1];
        for job in &self.jobs {
            let idx = self.latency_edges.partition_point(|edge| *edge <= job.latency_ms);
            counts[idx] += 1;
        }
        counts
    }

    fn percentile_from_hist(&self, hist: &[usize], p: f64) -> Option<u64> {
        let total: usize = hist.iter().sum();
        if total == 0 {
            return None;
        }
        let target = ((p / 100.0 * total as f64).ceil() as usize)
            .saturating_sub(1)
            .min(total - 1);
        let mut cumulative = 0usize;
        for (i, &count) in hist.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let prev = cumulative;
            cumulative += count;
            if cumulative > target {
                let (lo, hi) = if i == 0 {
                    (0, self.latency_edges[0])
                } else if i == hist.len() - 1 {
                    let lo = *self.latency_edges.last().expect("non-empty edges");
                    (lo, (lo * 2).max(lo + 1))
                } else {
                    (self.latency_edges[i - 1], self.latency_edges[i])
                };
                let frac = (target - prev) as f64 / count as f64;
                return Some((lo as f64 + (hi - lo) as f64 * frac).round() as u64);
            }
        }
        None
    }

    /// Aggregates over the window ending at `now_s`.
    pub fn snapshot(&mut self, now_s: f64) -> ProviderSnapshot {
        self.prune(now_s);
        let availability = self.availability.availability(now_s, self.window_s);
        let n = self.jobs.len();
        if n == 0 {
            return ProviderSnapshot {
                window_s: self.window_s,
                n_jobs: 0,
                success_rate: 0.0,
                traps_ratio_avg: self.ewma_traps,
                qos_avg: self.ewma_qos,
                latency_p50_ms: None,
                latency_p95_ms: None,
                latency_p99_ms: None,
                availability,
            };
        }

        let successes = self.jobs.iter().filter(|job| job.success).count();
        let traps: Vec<f64> = self.jobs.iter().filter_map(|job| job.traps_ratio).collect();
        let qos: Vec<f64> = self.jobs.iter().filter_map(|job| job.qos_score).collect();
        let mean = |values: &[f64]| clamp01(values.iter().sum::<f64>() / values.len() as f64);

        let hist = self.latency_histogram();
        ProviderSnapshot {
            window_s: self.window_s,
            n_jobs: n,
            success_rate: clamp01(successes as f64 / n as f64),
            traps_ratio_avg: if traps.is_empty() {
                self.ewma_traps
            } else {
                Some(mean(&traps))
            },
            qos_avg: if qos.is_empty() {
                self.ewma_qos
            } else {
                Some(mean(&qos))
            },
            latency_p50_ms: self.percentile_from_hist(&hist, 50.0),
            latency_p95_ms: self.percentile_from_hist(&hist, 95.0),
            latency_p99_ms: self.percentile_from_hist(&hist, 99.0),
            availability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_aggregates_with_uniform_latency_band() {
        let mut window = ProviderMetricsWindow::new(60.0, 0.2, None, 60.0);
        let t0 = 1_000_000.0;
        window.heartbeat(t0);
        for i in 0..50u64 {
            window.record_job(JobMeasure {
                success: true,
                traps_ratio: Some(0.9),
                qos_score: Some(0.85),
                latency_ms: 100 + i,
                timestamp_s: t0 + i as f64,
            });
        }
        let snap = window.snapshot(t0 + 59.0);
        assert_eq!(snap.n_jobs, 50);
        assert_eq!(snap.success_rate, 1.0);
        assert_eq!(snap.traps_ratio_avg, Some(0.9));
        assert_eq!(snap.qos_avg, Some(0.85));
        // all 50 samples fall into the [100, 150) bucket
        assert_eq!(snap.latency_p50_ms, Some(124));
        assert_eq!(snap.latency_p95_ms, Some(147));
        assert_eq!(snap.latency_p99_ms, Some(149));
        assert!((snap.availability - 59.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn jobs_leave_the_window() {
        let mut window = ProviderMetricsWindow::new(10.0, 0.2, None, 5.0);
        window.record_job(JobMeasure {
            success: false,
            traps_ratio: None,
            qos_score: None,
            latency_ms: 10,
            timestamp_s: 0.0,
        });
        window.record_job(JobMeasure {
            success: true,
            traps_ratio: None,
            qos_score: None,
            latency_ms: 10,
            timestamp_s: 8.0,
        });
        let snap = window.snapshot(15.0);
        assert_eq!(snap.n_jobs, 1);
        assert_eq!(snap.success_rate, 1.0);
    }

    #[test]
    fn empty_window_falls_back_to_ewma() {
        let mut window = ProviderMetricsWindow::new(10.0, 0.5, None, 5.0);
        window.record_job(JobMeasure {
            success: true,
            traps_ratio: Some(0.8),
            qos_score: Some(0.6),
            latency_ms: 50,
            timestamp_s: 0.0,
        });
        window.record_job(JobMeasure {
            success: true,
            traps_ratio: Some(0.4),
            qos_score: None,
            latency_ms: 50,
            timestamp_s: 1.0,
        });
        // both jobs age out
        let snap = window.snapshot(100.0);
        assert_eq!(snap.n_jobs, 0);
        // ewma(0.8 then 0.4, alpha 0.5) = 0.6
        assert_eq!(snap.traps_ratio_avg, Some(0.6));
        assert_eq!(snap.qos_avg, Some(0.6));
        assert_eq!(snap.latency_p50_ms, None);
    }

    #[test]
    fn ratios_are_clamped() {
        let mut window = ProviderMetricsWindow::new(10.0, 0.2, None, 5.0);
        window.record_job(JobMeasure {
            success: true,
            traps_ratio: Some(1.7),
            qos_score: Some(-0.3),
            latency_ms: 5,
            timestamp_s: 0.0,
        });
        let snap = window.snapshot(1.0);
        assert_eq!(snap.traps_ratio_avg, Some(1.0));
        assert_eq!(snap.qos_avg, Some(0.0));
    }

    #[test]
    fn overflow_bucket_extrapolates() {
        let mut window = ProviderMetricsWindow::new(10.0, 0.2, Some(vec![10, 100]), 5.0);
        window.record_job(JobMeasure {
            success: true,
            traps_ratio: None,
            qos_score: None,
            latency_ms: 5_000,
            timestamp_s: 0.0,
        });
        let snap = window.snapshot(1.0);
        // single sample past the last edge: lo=100, hi=200, frac 0
        assert_eq!(snap.latency_p99_ms, Some(100));
    }

    #[test]
    fn availability_merges_overlapping_coverage() {
        let mut tracker = AvailabilityTracker::new(10.0);
        tracker.heartbeat(0.0);
        tracker.heartbeat(5.0); // overlaps the first interval
        tracker.heartbeat(30.0);
        // window [0, 50]: covered [0,15] ∪ [30,40] = 25s
        assert!((tracker.availability(50.0, 50.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn availability_handles_out_of_order_beats() {
        let mut tracker = AvailabilityTracker::new(5.0);
        tracker.heartbeat(20.0);
        tracker.heartbeat(10.0);
        tracker.heartbeat(15.0);
        // window [10, 30]: covered [10,25]
        assert!((tracker.availability(30.0, 20.0) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn no_heartbeats_means_zero_availability() {
        let mut tracker = AvailabilityTracker::new(60.0);
        assert_eq!(tracker.availability(100.0, 50.0), 0.0);
    }
}
