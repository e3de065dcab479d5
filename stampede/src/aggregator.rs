//! Streaming aggregation of request results.
//!
//! Workers call [`MetricsAggregator::record`] concurrently. Counters are atomics; each latency is
//! added to a DDSketch ([`Summary`]) behind a mutex held only for the insert, so every recorded
//! request is also in the sketch.
//!
//! Quantiles are approximate: the sketch is built with a relative accuracy of
//! [`LATENCY_RELATIVE_ERROR`], so a reported `p(N)` lies within ±0.1% of the sample at that
//! rank. `p(N)` uses the nearest-rank definition: the smallest sample with at least N% of all
//! samples at or below it. The bucket limit covers latencies from nanoseconds to hours at that
//! accuracy, and memory stays bounded regardless of run length. `min`, `max` and `avg` are exact.
use crate::scenario::RequestResult;
use metrics_util::Summary;
use stampede_core::{
    Aggregation, CheckSummary, LatencySummary, Metric, MetricSource, ReportSummary, Threshold,
    ThresholdOutcome,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Relative error of the latency sketch (DDSketch `alpha`).
pub const LATENCY_RELATIVE_ERROR: f64 = 0.001;
const SKETCH_MAX_BUCKETS: u32 = 32_768;
// Values are stored in milliseconds; anything under a picosecond collapses to zero.
const SKETCH_MIN_VALUE: f64 = 1e-9;

#[derive(Debug)]
struct CheckCounter {
    name: String,
    passes: AtomicU64,
    fails: AtomicU64,
}

pub struct MetricsAggregator {
    requests: AtomicU64,
    failed: AtomicU64,
    iterations: AtomicU64,
    latency_sum_ns: AtomicU64,
    latency_min_ns: AtomicU64,
    latency_max_ns: AtomicU64,
    sketch: Mutex<Summary>,
    checks: Vec<CheckCounter>,
}

impl MetricsAggregator {
    /// Create an aggregator tracking the given check names.
    pub fn new<'a>(check_names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut checks: Vec<CheckCounter> = vec![];
        for name in check_names {
            if checks.iter().any(|c| c.name == name) {
                continue;
            }
            checks.push(CheckCounter {
                name: name.to_string(),
                passes: AtomicU64::new(0),
                fails: AtomicU64::new(0),
            });
        }

        Self {
            requests: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            latency_sum_ns: AtomicU64::new(0),
            latency_min_ns: AtomicU64::new(u64::MAX),
            latency_max_ns: AtomicU64::new(0),
            sketch: Mutex::new(default_sketch()),
            checks,
        }
    }

    pub fn record(&self, result: RequestResult) {
        let nanos = u64::try_from(result.latency.as_nanos()).unwrap_or(u64::MAX);
        let failed = result.failed();

        self.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum_ns.fetch_add(nanos, Ordering::Relaxed);
        self.latency_min_ns.fetch_min(nanos, Ordering::Relaxed);
        self.latency_max_ns.fetch_max(nanos, Ordering::Relaxed);
        self.sketch().add(result.latency.as_secs_f64() * 1e3);

        for outcome in &result.checks {
            match self.checks.iter().find(|c| *c.name == *outcome.name) {
                Some(counter) if outcome.passed => {
                    counter.passes.fetch_add(1, Ordering::Relaxed);
                }
                Some(counter) => {
                    counter.fails.fetch_add(1, Ordering::Relaxed);
                }
                None => trace!("Ignoring unregistered check {:?}", outcome.name),
            }
        }

        #[cfg(feature = "metrics")]
        {
            metrics::histogram!("stampede_http_req_duration").record(result.latency.as_secs_f64());
            metrics::counter!("stampede_http_reqs").increment(1);
            if failed {
                metrics::counter!("stampede_http_req_failed").increment(1);
            }
        }
    }

    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    /// Freeze the aggregate state. Only meaningful once every worker has terminated.
    pub fn snapshot(&self, elapsed: Duration, vus_max: usize) -> MetricSnapshot {
        let sketch = self.sketch().clone();

        let requests = self.requests.load(Ordering::Relaxed);
        let min_ns = self.latency_min_ns.load(Ordering::Relaxed);

        MetricSnapshot {
            elapsed,
            requests,
            failed_requests: self.failed.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            vus_max,
            checks: self
                .checks
                .iter()
                .map(|c| CheckSummary {
                    name: c.name.clone(),
                    passes: c.passes.load(Ordering::Relaxed),
                    fails: c.fails.load(Ordering::Relaxed),
                })
                .collect(),
            latency: LatencyStats {
                sketch,
                count: requests,
                sum_ns: self.latency_sum_ns.load(Ordering::Relaxed),
                min_ns: (requests > 0).then_some(min_ns),
                max_ns: (requests > 0).then(|| self.latency_max_ns.load(Ordering::Relaxed)),
            },
        }
    }

    // Poisoning is ignored: the lock only ever guards one `add` or a clone.
    fn sketch(&self) -> MutexGuard<'_, Summary> {
        self.sketch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn default_sketch() -> Summary {
    Summary::new(LATENCY_RELATIVE_ERROR, SKETCH_MAX_BUCKETS, SKETCH_MIN_VALUE)
}

#[derive(Clone)]
struct LatencyStats {
    sketch: Summary,
    count: u64,
    sum_ns: u64,
    min_ns: Option<u64>,
    max_ns: Option<u64>,
}

/// Aggregate state of a finished run.
#[derive(Clone)]
pub struct MetricSnapshot {
    pub elapsed: Duration,
    pub requests: u64,
    pub failed_requests: u64,
    pub iterations: u64,
    pub vus_max: usize,
    pub checks: Vec<CheckSummary>,
    latency: LatencyStats,
}

impl MetricSnapshot {
    /// Approximate latency at quantile `q` (`0.95` for p95).
    pub fn latency(&self, quantile: f64) -> Option<Duration> {
        self.latency_millis(quantile).map(millis_to_duration)
    }

    pub fn latency_mean(&self) -> Option<Duration> {
        match self.latency.count {
            0 => None,
            count => Some(Duration::from_nanos(self.latency.sum_ns / count)),
        }
    }

    pub fn latency_min(&self) -> Option<Duration> {
        self.latency.min_ns.map(Duration::from_nanos)
    }

    pub fn latency_max(&self) -> Option<Duration> {
        self.latency.max_ns.map(Duration::from_nanos)
    }

    /// Evaluate thresholds against this snapshot. Pure: repeated calls give identical results.
    pub fn evaluate(&self, thresholds: &[Threshold]) -> Vec<ThresholdOutcome> {
        thresholds.iter().map(|t| t.evaluate(self)).collect()
    }

    pub fn report(&self, name: &str, thresholds: &[Threshold], aborted: bool) -> ReportSummary {
        ReportSummary {
            name: name.to_string(),
            elapsed: self.elapsed,
            requests: self.requests,
            failed_requests: self.failed_requests,
            iterations: self.iterations,
            vus_max: self.vus_max,
            latency: LatencySummary {
                avg: self.latency_mean(),
                min: self.latency_min(),
                p50: self.latency(0.5),
                p90: self.latency(0.9),
                p95: self.latency(0.95),
                p99: self.latency(0.99),
                max: self.latency_max(),
            },
            checks: self.checks.clone(),
            thresholds: self.evaluate(thresholds),
            aborted,
        }
    }

    fn latency_millis(&self, quantile: f64) -> Option<f64> {
        if self.latency.sketch.is_empty() {
            return None;
        }

        let millis = self
            .latency
            .sketch
            .quantile(nearest_rank(quantile, self.latency.sketch.count()))?;
        if millis.is_finite() {
            Some(millis.max(0.))
        } else {
            error!("Non-finite latency quantile {quantile} ignored.");
            None
        }
    }

    fn per_second(&self, count: u64) -> Option<f64> {
        (!self.elapsed.is_zero()).then(|| count as f64 / self.elapsed.as_secs_f64())
    }

    fn check_rate(&self) -> Option<f64> {
        let (passes, total) = self
            .checks
            .iter()
            .fold((0, 0), |(p, t), c| (p + c.passes, t + c.total()));
        (total > 0).then(|| passes as f64 / total as f64)
    }
}

impl MetricSource for MetricSnapshot {
    fn observe(&self, metric: Metric, aggregation: Aggregation) -> Option<f64> {
        let nanos_to_millis = |ns: u64| ns as f64 / 1e6;

        match (metric, aggregation) {
            (Metric::HttpReqDuration, Aggregation::Percentile(q)) => self.latency_millis(q),
            (Metric::HttpReqDuration, Aggregation::Med) => self.latency_millis(0.5),
            (Metric::HttpReqDuration, Aggregation::Avg) => self
                .latency_mean()
                .map(|d| nanos_to_millis(d.as_nanos() as u64)),
            (Metric::HttpReqDuration, Aggregation::Min) => self.latency.min_ns.map(nanos_to_millis),
            (Metric::HttpReqDuration, Aggregation::Max) => self.latency.max_ns.map(nanos_to_millis),
            (Metric::HttpReqFailed, Aggregation::Rate) => (self.requests > 0)
                .then(|| self.failed_requests as f64 / self.requests as f64),
            (Metric::HttpReqs, Aggregation::Count) => Some(self.requests as f64),
            (Metric::HttpReqs, Aggregation::Rate) => self.per_second(self.requests),
            (Metric::Checks, Aggregation::Rate) => self.check_rate(),
            (Metric::Iterations, Aggregation::Count) => Some(self.iterations as f64),
            (Metric::Iterations, Aggregation::Rate) => self.per_second(self.iterations),
            (Metric::VusMax, Aggregation::Value) => Some(self.vus_max as f64),
            _ => None,
        }
    }
}

/// Map `q` to the quantile the sketch needs to return the nearest-rank sample.
///
/// The sketch answers with the sample at rank `floor(q * (n - 1))`; nearest rank is
/// `ceil(q * n)` counted from one.
fn nearest_rank(quantile: f64, count: usize) -> f64 {
    if count <= 1 {
        return 0.;
    }
    let rank = (quantile.clamp(0., 1.) * count as f64).ceil().max(1.);
    // Aim at the middle of the rank so flooring cannot slip to the one below.
    ((rank - 0.5) / (count - 1) as f64).min(1.)
}

fn millis_to_duration(millis: f64) -> Duration {
    Duration::from_secs_f64(millis / 1e3)
}
