//! Running statistics folded by the aggregator: counters, running
//! moments, an EWMA request rate, a streaming P² p95 estimator for
//! live snapshots, a bounded uniform reservoir for exact summary
//! percentiles, and the per-second timeline.

use crate::types::{ProgressSnapshot, ResultRecord, SecondBucket, Summary};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Reservoir bound: below this many samples the summary percentiles
/// are exact over the full set.
pub const RESERVOIR_CAPACITY: usize = 100_000;
/// Time constant for the live request-rate estimate.
pub const RATE_HORIZON: Duration = Duration::from_secs(2);

/// Exponentially weighted request rate. Each observation folds the
/// instantaneous rate (1/gap) in with a gap-scaled weight; reads decay
/// the estimate when the stream has gone quiet longer than the rate
/// itself predicts.
#[derive(Debug)]
pub struct EwmaRate {
    tau_secs: f64,
    rate: f64,
    last: Option<Instant>,
}

impl EwmaRate {
    pub fn new(tau: Duration) -> Self {
        Self {
            tau_secs: tau.as_secs_f64(),
            rate: 0.0,
            last: None,
        }
    }

    pub fn observe(&mut self, now: Instant) {
        match self.last {
            None => self.last = Some(now),
            Some(prev) => {
                let dt = now.saturating_duration_since(prev).as_secs_f64().max(1e-6);
                let instantaneous = 1.0 / dt;
                let alpha = 1.0 - (-dt / self.tau_secs).exp();
                self.rate += alpha * (instantaneous - self.rate);
                self.last = Some(now);
            }
        }
    }

    pub fn current(&self, now: Instant) -> f64 {
        let Some(prev) = self.last else { return 0.0 };
        let idle = now.saturating_duration_since(prev).as_secs_f64();
        let expected_gap = if self.rate > 0.0 { 1.0 / self.rate } else { 0.0 };
        let overdue = (idle - expected_gap).max(0.0);
        self.rate * (-overdue / self.tau_secs).exp()
    }
}

/// Streaming quantile estimate via the P² algorithm (five markers,
/// parabolic adjustment). Exact until five observations arrive.
#[derive(Debug)]
pub struct P2Quantile {
    p: f64,
    count: u64,
    initial: Vec<f64>,
    q: [f64; 5],
    n: [f64; 5],
    np: [f64; 5],
    dnp: [f64; 5],
}

impl P2Quantile {
    pub fn new(p: f64) -> Self {
        Self {
            p,
            count: 0,
            initial: Vec::with_capacity(5),
            q: [0.0; 5],
            n: [0.0; 5],
            np: [0.0; 5],
            dnp: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
        }
    }

    pub fn observe(&mut self, x: f64) {
        self.count += 1;
        if self.count <= 5 {
            self.initial.push(x);
            self.initial.sort_by(f64::total_cmp);
            if self.count == 5 {
                for i in 0..5 {
                    self.q[i] = self.initial[i];
                    self.n[i] = (i + 1) as f64;
                }
                self.np = [
                    1.0,
                    1.0 + 2.0 * self.p,
                    1.0 + 4.0 * self.p,
                    3.0 + 2.0 * self.p,
                    5.0,
                ];
            }
            return;
        }

        let k = if x < self.q[0] {
            self.q[0] = x;
            0
        } else if x < self.q[1] {
            0
        } else if x < self.q[2] {
            1
        } else if x < self.q[3] {
            2
        } else if x <= self.q[4] {
            3
        } else {
            self.q[4] = x;
            3
        };

        for i in (k + 1)..5 {
            self.n[i] += 1.0;
        }
        for i in 0..5 {
            self.np[i] += self.dnp[i];
        }

        for i in 1..4 {
            let d = self.np[i] - self.n[i];
            if (d >= 1.0 && self.n[i + 1] - self.n[i] > 1.0)
                || (d <= -1.0 && self.n[i - 1] - self.n[i] < -1.0)
            {
                let d = d.signum();
                let candidate = self.parabolic(i, d);
                self.q[i] = if self.q[i - 1] < candidate && candidate < self.q[i + 1] {
                    candidate
                } else {
                    self.linear(i, d)
                };
                self.n[i] += d;
            }
        }
    }

    fn parabolic(&self, i: usize, d: f64) -> f64 {
        let (q, n) = (&self.q, &self.n);
        q[i] + d / (n[i + 1] - n[i - 1])
            * ((n[i] - n[i - 1] + d) * (q[i + 1] - q[i]) / (n[i + 1] - n[i])
                + (n[i + 1] - n[i] - d) * (q[i] - q[i - 1]) / (n[i] - n[i - 1]))
    }

    fn linear(&self, i: usize, d: f64) -> f64 {
        let j = if d > 0.0 { i + 1 } else { i - 1 };
        self.q[i] + d * (self.q[j] - self.q[i]) / (self.n[j] - self.n[i])
    }

    pub fn estimate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else if self.count < 5 {
            let idx = ((self.p * self.initial.len() as f64).ceil() as usize)
                .saturating_sub(1)
                .min(self.initial.len() - 1);
            self.initial[idx]
        } else {
            self.q[2]
        }
    }
}

/// Uniform reservoir over latency samples. Every sample has equal
/// probability of surviving once the capacity is exceeded.
#[derive(Debug)]
pub struct Reservoir {
    capacity: usize,
    samples: Vec<u64>,
    seen: u64,
}

impl Reservoir {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Vec::new(),
            seen: 0,
        }
    }

    pub fn push(&mut self, sample: u64) {
        self.seen += 1;
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            use rand::Rng;
            let slot = rand::rng().random_range(0..self.seen);
            if (slot as usize) < self.capacity {
                self.samples[slot as usize] = sample;
            }
        }
    }

    /// Nearest-rank percentiles over the sampled set, one sort.
    pub fn percentiles(&self, ps: &[f64]) -> Vec<u64> {
        if self.samples.is_empty() {
            return vec![0; ps.len()];
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        ps.iter()
            .map(|p| {
                let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
                sorted[rank.clamp(1, sorted.len()) - 1]
            })
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
struct TimelineBucket {
    second: u64,
    requests: u64,
    errors: u64,
    sum_ms: f64,
    min_ms: u64,
    max_ms: u64,
}

impl TimelineBucket {
    fn to_public(&self) -> SecondBucket {
        SecondBucket {
            second: self.second,
            requests: self.requests,
            errors: self.errors,
            avg_ms: if self.requests > 0 {
                self.sum_ms / self.requests as f64
            } else {
                0.0
            },
            min_ms: self.min_ms,
            max_ms: self.max_ms,
        }
    }
}

pub struct RunningStats {
    started: Instant,
    total: u64,
    failed: u64,
    total_bytes: u64,
    min_ms: u64,
    max_ms: u64,
    sum_ms: f64,
    rate: EwmaRate,
    live_p95: P2Quantile,
    reservoir: Reservoir,
    timeline: Vec<TimelineBucket>,
    status_codes: HashMap<u16, u64>,
    error_kinds: HashMap<String, u64>,
}

impl RunningStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total: 0,
            failed: 0,
            total_bytes: 0,
            min_ms: u64::MAX,
            max_ms: 0,
            sum_ms: 0.0,
            rate: EwmaRate::new(RATE_HORIZON),
            live_p95: P2Quantile::new(0.95),
            reservoir: Reservoir::new(RESERVOIR_CAPACITY),
            timeline: Vec::new(),
            status_codes: HashMap::new(),
            error_kinds: HashMap::new(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn record(&mut self, result: &ResultRecord) {
        let now = Instant::now();
        self.total += 1;
        self.total_bytes += result.response_size;
        self.sum_ms += result.elapsed_ms as f64;
        self.min_ms = self.min_ms.min(result.elapsed_ms);
        self.max_ms = self.max_ms.max(result.elapsed_ms);
        self.rate.observe(now);
        self.live_p95.observe(result.elapsed_ms as f64);
        self.reservoir.push(result.elapsed_ms);

        if !result.is_success() {
            self.failed += 1;
        }
        if result.status > 0 {
            *self.status_codes.entry(result.status).or_insert(0) += 1;
        }
        if let Some(error) = &result.error {
            *self
                .error_kinds
                .entry(classify_error(error).to_string())
                .or_insert(0) += 1;
        }

        let second = now.saturating_duration_since(self.started).as_secs();
        let needs_new = self
            .timeline
            .last()
            .map(|b| b.second != second)
            .unwrap_or(true);
        if needs_new {
            self.timeline.push(TimelineBucket {
                second,
                min_ms: u64::MAX,
                ..Default::default()
            });
        }
        let bucket = self.timeline.last_mut().unwrap();
        bucket.requests += 1;
        if !result.is_success() {
            bucket.errors += 1;
        }
        bucket.sum_ms += result.elapsed_ms as f64;
        bucket.min_ms = bucket.min_ms.min(result.elapsed_ms);
        bucket.max_ms = bucket.max_ms.max(result.elapsed_ms);
    }

    pub fn mean_ms(&self) -> f64 {
        if self.total > 0 {
            self.sum_ms / self.total as f64
        } else {
            0.0
        }
    }

    pub fn snapshot(&self, active_vus: u32) -> ProgressSnapshot {
        let now = Instant::now();
        ProgressSnapshot {
            completed_requests: self.total,
            total_errors: self.failed,
            active_vus,
            elapsed_ms: now.saturating_duration_since(self.started).as_millis() as u64,
            current_rps: self.rate.current(now),
            mean_ms: self.mean_ms(),
            p95_ms: self.live_p95.estimate(),
            min_ms: if self.total > 0 { self.min_ms } else { 0 },
            max_ms: self.max_ms,
            timeline: self.timeline.iter().map(TimelineBucket::to_public).collect(),
        }
    }

    /// Terminal summary with exact percentiles over the reservoir
    /// (the full sample set when under capacity), clamped into the
    /// exact [min, max] envelope.
    pub fn summary(
        &self,
        plan_id: &str,
        plan_name: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Summary {
        let wall_secs = self.started.elapsed().as_secs_f64();
        let (min_ms, max_ms) = if self.total > 0 {
            (self.min_ms, self.max_ms)
        } else {
            (0, 0)
        };
        let ps = self.reservoir.percentiles(&[50.0, 95.0, 99.0]);
        let clamp = |v: u64| v.clamp(min_ms, max_ms);

        Summary {
            plan_id: plan_id.to_string(),
            plan_name: plan_name.to_string(),
            started_at,
            finished_at,
            total_requests: self.total,
            successful_requests: self.total - self.failed,
            failed_requests: self.failed,
            min_ms,
            mean_ms: self.mean_ms(),
            p50_ms: clamp(ps[0]),
            p95_ms: clamp(ps[1]),
            p99_ms: clamp(ps[2]),
            max_ms,
            avg_rps: if wall_secs > 0.0 {
                self.total as f64 / wall_secs
            } else {
                0.0
            },
            total_bytes: self.total_bytes,
            status_codes: self.status_codes.clone(),
            errors: self.error_kinds.clone(),
            timeline: self.timeline.iter().map(TimelineBucket::to_public).collect(),
        }
    }
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Coarse transport-error class for the summary breakdown.
fn classify_error(error: &str) -> &'static str {
    let lower = error.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        "timeout"
    } else if lower.contains("dns") || lower.contains("resolve") {
        "dns"
    } else if lower.contains("tls") || lower.contains("certificate") {
        "tls"
    } else if lower.contains("refused") || lower.contains("connect") {
        "connect"
    } else if lower.contains("body read") {
        "body"
    } else {
        "other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn result(elapsed_ms: u64, ok: bool) -> ResultRecord {
        ResultRecord {
            request_id: "r".into(),
            request_name: "r".into(),
            group_name: "g".into(),
            timestamp: Utc::now(),
            method: "GET".into(),
            url: "http://x/".into(),
            status: if ok { 200 } else { 0 },
            elapsed_ms,
            response_size: 10,
            headers: Map::new(),
            body: String::new(),
            assertions: Vec::new(),
            assertions_passed: ok,
            extractions: Vec::new(),
            error: if ok { None } else { Some("connection refused".into()) },
        }
    }

    #[test]
    fn p2_tracks_p95_of_a_uniform_stream() {
        let mut est = P2Quantile::new(0.95);
        // Deterministic shuffle of 1..=1000.
        for i in 0..1000u64 {
            est.observe(((i * 617) % 1000 + 1) as f64);
        }
        let p95 = est.estimate();
        assert!((900.0..=990.0).contains(&p95), "p95 estimate was {p95}");
    }

    #[test]
    fn p2_is_exact_under_five_samples() {
        let mut est = P2Quantile::new(0.95);
        assert_eq!(est.estimate(), 0.0);
        est.observe(10.0);
        est.observe(30.0);
        est.observe(20.0);
        assert_eq!(est.estimate(), 30.0);
    }

    #[test]
    fn reservoir_is_exact_under_capacity() {
        let mut reservoir = Reservoir::new(100);
        for v in 1..=100u64 {
            reservoir.push(v);
        }
        let ps = reservoir.percentiles(&[50.0, 95.0, 99.0]);
        assert_eq!(ps, vec![50, 95, 99]);
    }

    #[test]
    fn reservoir_stays_bounded() {
        let mut reservoir = Reservoir::new(64);
        for v in 0..10_000u64 {
            reservoir.push(v);
        }
        assert_eq!(reservoir.samples.len(), 64);
        assert_eq!(reservoir.seen, 10_000);
    }

    #[test]
    fn ewma_converges_to_steady_rate() {
        let mut rate = EwmaRate::new(Duration::from_secs(2));
        let t0 = Instant::now();
        // 100 events, 10 ms apart: 100 rps.
        for i in 0..400u64 {
            rate.observe(t0 + Duration::from_millis(10 * i));
        }
        let current = rate.current(t0 + Duration::from_millis(4000));
        assert!(
            (70.0..=130.0).contains(&current),
            "steady rate was {current}"
        );
    }

    #[test]
    fn counters_and_percentile_monotonicity() {
        let mut stats = RunningStats::new();
        for i in 0..500u64 {
            stats.record(&result((i * 389) % 200 + 1, i % 10 != 0));
        }
        let summary = stats.summary("p", "p", Utc::now(), Utc::now());
        assert_eq!(summary.total_requests, 500);
        assert_eq!(
            summary.successful_requests + summary.failed_requests,
            summary.total_requests
        );
        assert_eq!(summary.failed_requests, 50);
        assert!(summary.min_ms <= summary.p50_ms);
        assert!(summary.p50_ms as f64 <= summary.mean_ms + 1.0);
        assert!(summary.p50_ms <= summary.p95_ms);
        assert!(summary.p95_ms <= summary.p99_ms);
        assert!(summary.p99_ms <= summary.max_ms);
        assert_eq!(summary.errors.get("connect"), Some(&50));
        assert_eq!(summary.status_codes.get(&200), Some(&450));
    }

    #[test]
    fn timeline_buckets_accumulate() {
        let mut stats = RunningStats::new();
        stats.record(&result(10, true));
        stats.record(&result(20, false));
        let snap = stats.snapshot(3);
        assert_eq!(snap.completed_requests, 2);
        assert_eq!(snap.total_errors, 1);
        assert_eq!(snap.active_vus, 3);
        let bucket = &snap.timeline[0];
        assert_eq!(bucket.requests, 2);
        assert_eq!(bucket.errors, 1);
        assert!((bucket.avg_ms - 15.0).abs() < f64::EPSILON);
        assert_eq!(bucket.min_ms, 10);
        assert_eq!(bucket.max_ms, 20);
    }
}
