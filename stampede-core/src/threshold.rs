//! Threshold expressions and their evaluation.
//!
//! A threshold is keyed by a metric name and written as `aggregation <op> value[unit]`, for
//! example `http_req_duration: "p(95) < 500ms"` or `checks: "rate > 0.99"`. Durations are compared
//! in milliseconds; a unitless value on a duration metric is read as milliseconds.
use crate::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Built-in metrics a threshold may refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    /// Request latency (trend, milliseconds).
    HttpReqDuration,
    /// Share of requests that errored or returned a non-2xx status.
    HttpReqFailed,
    /// Number of requests issued.
    HttpReqs,
    /// Share of checks that passed.
    Checks,
    /// Number of completed scenario iterations.
    Iterations,
    /// Largest number of concurrently running virtual users.
    VusMax,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Trend,
    Rate,
    Counter,
    Gauge,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::HttpReqDuration => "http_req_duration",
            Metric::HttpReqFailed => "http_req_failed",
            Metric::HttpReqs => "http_reqs",
            Metric::Checks => "checks",
            Metric::Iterations => "iterations",
            Metric::VusMax => "vus_max",
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::HttpReqDuration => MetricKind::Trend,
            Metric::HttpReqFailed | Metric::Checks => MetricKind::Rate,
            Metric::HttpReqs | Metric::Iterations => MetricKind::Counter,
            Metric::VusMax => MetricKind::Gauge,
        }
    }
}

impl FromStr for Metric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "http_req_duration" => Ok(Metric::HttpReqDuration),
            "http_req_failed" => Ok(Metric::HttpReqFailed),
            "http_reqs" => Ok(Metric::HttpReqs),
            "checks" => Ok(Metric::Checks),
            "iterations" => Ok(Metric::Iterations),
            "vus_max" => Ok(Metric::VusMax),
            other => Err(ConfigError::UnknownMetric(other.to_string())),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a metric is reduced to a single number.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Aggregation {
    /// Quantile in `[0, 1]`, written `p(95)` for `0.95`.
    Percentile(f64),
    Avg,
    Min,
    Med,
    Max,
    Rate,
    Count,
    Value,
}

impl Aggregation {
    fn supported_by(&self, kind: MetricKind) -> bool {
        use Aggregation::*;
        match kind {
            MetricKind::Trend => matches!(self, Percentile(_) | Avg | Min | Med | Max),
            MetricKind::Rate => matches!(self, Rate),
            MetricKind::Counter => matches!(self, Count | Rate),
            MetricKind::Gauge => matches!(self, Value),
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let agg = match s {
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "med" => Aggregation::Med,
            "max" => Aggregation::Max,
            "rate" => Aggregation::Rate,
            "count" => Aggregation::Count,
            "value" => Aggregation::Value,
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown aggregation `{s}`"))?;
                let pct: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile `{inner}`"))?;
                if !(0. ..=100.).contains(&pct) {
                    return Err(format!("percentile {pct} is outside 0..=100"));
                }
                Aggregation::Percentile(pct / 100.)
            }
        };
        Ok(agg)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => observed < limit,
            Comparison::Le => observed <= limit,
            Comparison::Gt => observed > limit,
            Comparison::Ge => observed >= limit,
            Comparison::Eq => observed == limit,
            Comparison::Ne => observed != limit,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

/// A parsed pass/fail condition on an aggregate metric.
#[derive(Clone, Debug, PartialEq)]
pub struct Threshold {
    metric: Metric,
    aggregation: Aggregation,
    comparison: Comparison,
    limit: f64,
    expression: String,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let metric: Metric = metric.parse()?;
        let invalid = |reason: String| ConfigError::InvalidThreshold {
            metric: metric.to_string(),
            expression: expression.to_string(),
            reason,
        };

        let (lhs, comparison, rhs) = split_comparison(expression).ok_or_else(|| {
            invalid("expected one of <, <=, >, >=, ==, != between aggregation and value".into())
        })?;

        let aggregation: Aggregation = lhs.parse().map_err(invalid)?;
        if !aggregation.supported_by(metric.kind()) {
            return Err(invalid(format!(
                "aggregation `{}` is not available for {metric}",
                lhs.trim()
            )));
        }

        let limit = parse_limit(metric, rhs).map_err(invalid)?;

        Ok(Self {
            metric,
            aggregation,
            comparison,
            limit,
            expression: expression.trim().to_string(),
        })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    /// Limit in the metric's base unit (milliseconds for durations).
    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn evaluate<S: MetricSource + ?Sized>(&self, source: &S) -> ThresholdOutcome {
        let observed = source.observe(self.metric, self.aggregation);
        let passed = observed.is_some_and(|value| self.comparison.holds(value, self.limit));

        ThresholdOutcome {
            metric: self.metric,
            expression: self.expression.clone(),
            observed,
            limit: self.limit,
            passed,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

/// Anything that can reduce a metric to a single observed value.
///
/// Returns `None` when the metric has no samples.
pub trait MetricSource {
    fn observe(&self, metric: Metric, aggregation: Aggregation) -> Option<f64>;
}

/// Result of evaluating one [`Threshold`].
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdOutcome {
    pub metric: Metric,
    pub expression: String,
    pub observed: Option<f64>,
    pub limit: f64,
    pub passed: bool,
}

impl ThresholdOutcome {
    /// Distance between the observed value and the limit for failed thresholds.
    pub fn miss(&self) -> Option<f64> {
        if self.passed {
            None
        } else {
            self.observed.map(|observed| (observed - self.limit).abs())
        }
    }
}

impl fmt::Display for ThresholdOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "✓" } else { "✗" };
        write!(f, "{mark} {}: {}", self.metric, self.expression)?;
        match (self.observed, self.miss()) {
            (None, _) => write!(f, " (no samples)"),
            (Some(observed), Some(miss)) => {
                write!(f, " (observed {observed:.3}, missed by {miss:.3})")
            }
            (Some(observed), None) => write!(f, " (observed {observed:.3})"),
        }
    }
}

fn split_comparison(expression: &str) -> Option<(&str, Comparison, &str)> {
    let pos = expression.find(['<', '>', '=', '!'])?;
    let (lhs, rest) = expression.split_at(pos);

    let (comparison, len) = if rest.starts_with("<=") {
        (Comparison::Le, 2)
    } else if rest.starts_with(">=") {
        (Comparison::Ge, 2)
    } else if rest.starts_with("==") {
        (Comparison::Eq, 2)
    } else if rest.starts_with("!=") {
        (Comparison::Ne, 2)
    } else if rest.starts_with('<') {
        (Comparison::Lt, 1)
    } else if rest.starts_with('>') {
        (Comparison::Gt, 1)
    } else {
        return None;
    };

    Some((lhs, comparison, &rest[len..]))
}

fn parse_limit(metric: Metric, rhs: &str) -> Result<f64, String> {
    let rhs = rhs.trim();
    let split = rhs
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(rhs.len());
    let (number, unit) = rhs.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid value `{rhs}`"))?;
    if !value.is_finite() {
        return Err(format!("invalid value `{rhs}`"));
    }

    let unit = unit.trim();
    if metric.kind() != MetricKind::Trend {
        return if unit.is_empty() {
            Ok(value)
        } else {
            Err(format!("unit `{unit}` is only allowed on duration metrics"))
        };
    }

    let scale = match unit {
        "" | "ms" => 1.,
        "us" | "µs" => 1e-3,
        "s" => 1e3,
        "m" => 60e3,
        other => return Err(format!("unknown unit `{other}`")),
    };
    Ok(value * scale)
}
