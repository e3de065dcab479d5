use crate::{ThresholdOutcome, EXIT_EXTERNAL_ABORT, EXIT_THRESHOLDS_FAILED};
use std::fmt;
use std::time::Duration;

/// Pass/fail totals for a single named check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    pub fn pass_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.passes as f64 / total as f64),
        }
    }
}

/// Latency quantiles observed over the whole run. `None` when no request completed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LatencySummary {
    pub avg: Option<Duration>,
    pub min: Option<Duration>,
    pub p50: Option<Duration>,
    pub p90: Option<Duration>,
    pub p95: Option<Duration>,
    pub p99: Option<Duration>,
    pub max: Option<Duration>,
}

/// Statistics and threshold results for a completed run.
#[derive(Clone, Debug)]
pub struct ReportSummary {
    pub name: String,
    pub elapsed: Duration,
    pub requests: u64,
    pub failed_requests: u64,
    pub iterations: u64,
    pub vus_max: usize,
    pub latency: LatencySummary,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub aborted: bool,
}

impl ReportSummary {
    /// True when every threshold passed and the run was not aborted.
    pub fn passed(&self) -> bool {
        !self.aborted && self.violations().next().is_none()
    }

    pub fn violations(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    /// Process exit code: `0` on success, [`EXIT_THRESHOLDS_FAILED`] when a threshold failed,
    /// [`EXIT_EXTERNAL_ABORT`] when the run was cut short from the outside.
    pub fn exit_code(&self) -> i32 {
        if self.violations().next().is_some() {
            EXIT_THRESHOLDS_FAILED
        } else if self.aborted {
            EXIT_EXTERNAL_ABORT
        } else {
            0
        }
    }

    pub fn request_rate(&self) -> f64 {
        if self.elapsed.is_zero() {
            0.
        } else {
            self.requests as f64 / self.elapsed.as_secs_f64()
        }
    }

    pub fn failure_rate(&self) -> Option<f64> {
        match self.requests {
            0 => None,
            n => Some(self.failed_requests as f64 / n as f64),
        }
    }

    pub fn check(&self, name: &str) -> Option<&CheckSummary> {
        self.checks.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "scenario {} ran for {:?}{}",
            self.name,
            self.elapsed,
            if self.aborted { " (aborted)" } else { "" }
        )?;

        for check in &self.checks {
            let mark = if check.fails == 0 { "✓" } else { "✗" };
            writeln!(
                f,
                "  {mark} {} ({} passed, {} failed)",
                check.name, check.passes, check.fails
            )?;
        }

        let LatencySummary {
            avg,
            min,
            p50,
            p90,
            p95,
            p99,
            max,
        } = self.latency;
        writeln!(
            f,
            "  http_req_duration: avg={avg:?} min={min:?} med={p50:?} p90={p90:?} p95={p95:?} p99={p99:?} max={max:?}"
        )?;
        writeln!(
            f,
            "  http_req_failed: {:.2}% of {}",
            self.failure_rate().unwrap_or(0.) * 100.,
            self.requests
        )?;
        writeln!(
            f,
            "  http_reqs: {} ({:.2}/s), iterations: {}, vus_max: {}",
            self.requests,
            self.request_rate(),
            self.iterations,
            self.vus_max
        )?;

        for threshold in &self.thresholds {
            writeln!(f, "  {threshold}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Metric;

    fn summary(thresholds: Vec<ThresholdOutcome>, aborted: bool) -> ReportSummary {
        ReportSummary {
            name: "canary".to_string(),
            elapsed: Duration::from_secs(10),
            requests: 100,
            failed_requests: 5,
            iterations: 100,
            vus_max: 10,
            latency: LatencySummary::default(),
            checks: vec![CheckSummary {
                name: "status is 200".to_string(),
                passes: 95,
                fails: 5,
            }],
            thresholds,
            aborted,
        }
    }

    fn outcome(passed: bool) -> ThresholdOutcome {
        ThresholdOutcome {
            metric: Metric::HttpReqDuration,
            expression: "p(95)<500".to_string(),
            observed: Some(if passed { 100. } else { 900. }),
            limit: 500.,
            passed,
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(summary(vec![outcome(true)], false).exit_code(), 0);
        assert_eq!(
            summary(vec![outcome(true), outcome(false)], false).exit_code(),
            EXIT_THRESHOLDS_FAILED
        );
        assert_eq!(summary(vec![], true).exit_code(), EXIT_EXTERNAL_ABORT);
        assert_eq!(
            summary(vec![outcome(false)], true).exit_code(),
            EXIT_THRESHOLDS_FAILED
        );
    }

    #[test]
    fn rates() {
        let s = summary(vec![], false);
        assert_eq!(s.request_rate(), 10.);
        assert_eq!(s.failure_rate(), Some(0.05));
        assert_eq!(s.check("status is 200").unwrap().pass_rate(), Some(0.95));
        assert!(s.check("missing").is_none());
    }

    #[test]
    fn display_lists_violations() {
        let text = summary(vec![outcome(false)], false).to_string();
        assert!(text.contains("✗ http_req_duration: p(95)<500"), "{text}");
        assert!(text.contains("missed by 400.000"), "{text}");
    }
}
