use crate::{ConfigError, Threshold, DEFAULT_TICK};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

/// A time-bounded segment of a load profile.
///
/// Over `duration` the desired concurrency moves linearly from the previous stage's target to
/// `target`. A zero `duration` is an instantaneous jump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// Validated, immutable description of a load run.
///
/// Only constructed through [`RunProfile::builder`] or deserialization, both of which validate
/// every stage and threshold before a run can begin.
///
/// # Example
/// ```
/// use stampede_core::RunProfile;
/// use std::time::Duration;
///
/// let profile = RunProfile::builder()
///     .stage(Duration::from_secs(30), 10)
///     .stage(Duration::from_secs(60), 10)
///     .stage(Duration::from_secs(10), 0)
///     .threshold("http_req_duration", "p(95) < 500ms")
///     .build()
///     .unwrap();
///
/// assert_eq!(profile.total_duration(), Duration::from_secs(100));
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "RawProfile")]
pub struct RunProfile {
    stages: Vec<Stage>,
    thresholds: Vec<Threshold>,
    start_target: usize,
    tick: Duration,
    max_vus: Option<usize>,
    max_rps: Option<NonZeroU32>,
    graceful_stop: Option<Duration>,
}

impl RunProfile {
    pub fn builder() -> RunProfileBuilder {
        RunProfileBuilder::default()
    }

    /// Parse a profile from its JSON form.
    ///
    /// ```json
    /// {
    ///   "stages": [{ "duration": "30s", "target": 10 }, { "duration": "10s", "target": 0 }],
    ///   "thresholds": { "http_req_duration": ["p(95)<500"] }
    /// }
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    /// Concurrency before the first stage starts ramping.
    pub fn start_target(&self) -> usize {
        self.start_target
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn max_vus(&self) -> Option<usize> {
        self.max_vus
    }

    pub fn max_rps(&self) -> Option<NonZeroU32> {
        self.max_rps
    }

    /// Upper bound on the final drain. `None` means "one request timeout".
    pub fn graceful_stop(&self) -> Option<Duration> {
        self.graceful_stop
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn peak_target(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .chain(std::iter::once(self.start_target))
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub struct RunProfileBuilder {
    stages: Vec<Stage>,
    thresholds: Vec<(String, String)>,
    start_target: usize,
    tick: Duration,
    max_vus: Option<usize>,
    max_rps: Option<NonZeroU32>,
    graceful_stop: Option<Duration>,
}

impl Default for RunProfileBuilder {
    fn default() -> Self {
        Self {
            stages: vec![],
            thresholds: vec![],
            start_target: 0,
            tick: DEFAULT_TICK,
            max_vus: None,
            max_rps: None,
            graceful_stop: None,
        }
    }
}

impl RunProfileBuilder {
    pub fn stage(mut self, duration: Duration, target: usize) -> Self {
        self.stages.push(Stage::new(duration, target));
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Add a threshold expression (e.g. `"p(95) < 500ms"`) for the named metric.
    pub fn threshold(mut self, metric: &str, expression: &str) -> Self {
        self.thresholds
            .push((metric.to_string(), expression.to_string()));
        self
    }

    pub fn start_target(mut self, start_target: usize) -> Self {
        self.start_target = start_target;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn max_vus(mut self, max_vus: usize) -> Self {
        self.max_vus = Some(max_vus);
        self
    }

    pub fn max_rps(mut self, max_rps: NonZeroU32) -> Self {
        self.max_rps = Some(max_rps);
        self
    }

    pub fn graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = Some(graceful_stop);
        self
    }

    pub fn build(self) -> Result<RunProfile, ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }

        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }

        let thresholds = self
            .thresholds
            .iter()
            .map(|(metric, expression)| Threshold::parse(metric, expression))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RunProfile {
            stages: self.stages,
            thresholds,
            start_target: self.start_target,
            tick: self.tick,
            max_vus: self.max_vus,
            max_rps: self.max_rps,
            graceful_stop: self.graceful_stop,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProfile {
    stages: Vec<RawStage>,
    #[serde(default)]
    thresholds: BTreeMap<String, RawExpressions>,
    #[serde(default, rename = "startVUs")]
    start_vus: i64,
    #[serde(default)]
    tick: Option<String>,
    #[serde(default, rename = "maxVUs")]
    max_vus: Option<i64>,
    #[serde(default)]
    rps: Option<NonZeroU32>,
    #[serde(default, rename = "gracefulStop")]
    graceful_stop: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStage {
    duration: String,
    target: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawExpressions {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<RawProfile> for RunProfile {
    type Error = ConfigError;

    fn try_from(raw: RawProfile) -> Result<Self, Self::Error> {
        let mut builder = RunProfile::builder();

        for (index, stage) in raw.stages.iter().enumerate() {
            let duration = parse_duration(&format!("stages[{index}].duration"), &stage.duration)?;
            let target = non_negative(index, stage.target)?;
            builder = builder.stage(duration, target);
        }

        for (metric, expressions) in &raw.thresholds {
            let expressions = match expressions {
                RawExpressions::One(expr) => std::slice::from_ref(expr),
                RawExpressions::Many(exprs) => exprs.as_slice(),
            };
            for expr in expressions {
                builder = builder.threshold(metric, expr);
            }
        }

        let start_vus =
            usize::try_from(raw.start_vus).map_err(|_| ConfigError::NegativeSetting {
                field: "startVUs",
                value: raw.start_vus,
            })?;
        builder = builder.start_target(start_vus);

        if let Some(tick) = &raw.tick {
            builder = builder.tick(parse_duration("tick", tick)?);
        }

        if let Some(max_vus) = raw.max_vus {
            builder = builder.max_vus(usize::try_from(max_vus).map_err(|_| {
                ConfigError::NegativeSetting {
                    field: "maxVUs",
                    value: max_vus,
                }
            })?);
        }

        if let Some(rps) = raw.rps {
            builder = builder.max_rps(rps);
        }

        if let Some(graceful_stop) = &raw.graceful_stop {
            builder = builder.graceful_stop(parse_duration("gracefulStop", graceful_stop)?);
        }

        builder.build()
    }
}

fn non_negative(index: usize, target: i64) -> Result<usize, ConfigError> {
    usize::try_from(target).map_err(|_| ConfigError::NegativeTarget { index, target })
}

/// Parse a humantime duration (`"30s"`, `"1m"`, `"1m 30s"`); a bare `"0"` is accepted.
pub(crate) fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    let invalid = |reason: String| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
        reason,
    };

    if trimmed.starts_with('-') {
        return Err(invalid("duration must not be negative".to_string()));
    }

    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    humantime::parse_duration(trimmed).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANARY: &str = r#"{
        "stages": [
            { "duration": "30s", "target": 10 },
            { "duration": "1m", "target": 10 },
            { "duration": "10s", "target": 0 }
        ],
        "thresholds": {
            "http_req_duration": ["p(95)<500"]
        }
    }"#;

    #[test]
    fn parses_canary_profile() {
        let profile = RunProfile::from_json(CANARY).unwrap();

        assert_eq!(
            profile.stages(),
            &[
                Stage::new(Duration::from_secs(30), 10),
                Stage::new(Duration::from_secs(60), 10),
                Stage::new(Duration::from_secs(10), 0),
            ]
        );
        assert_eq!(profile.thresholds().len(), 1);
        assert_eq!(profile.total_duration(), Duration::from_secs(100));
        assert_eq!(profile.peak_target(), 10);
        assert_eq!(profile.start_target(), 0);
        assert_eq!(profile.tick(), DEFAULT_TICK);
        assert!(profile.graceful_stop().is_none());
    }

    #[test]
    fn single_expression_is_accepted() {
        let profile = RunProfile::from_json(
            r#"{
                "stages": [{ "duration": "1s", "target": 1 }],
                "thresholds": { "checks": "rate>0.99", "http_req_failed": ["rate<0.01", "rate<0.5"] },
                "startVUs": 2,
                "maxVUs": 5,
                "rps": 20,
                "tick": "100ms",
                "gracefulStop": "5s"
            }"#,
        )
        .unwrap();

        assert_eq!(profile.thresholds().len(), 3);
        assert_eq!(profile.start_target(), 2);
        assert_eq!(profile.max_vus(), Some(5));
        assert_eq!(profile.max_rps(), NonZeroU32::new(20));
        assert_eq!(profile.tick(), Duration::from_millis(100));
        assert_eq!(profile.graceful_stop(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_duration_stage_is_valid() {
        let profile = RunProfile::from_json(
            r#"{ "stages": [{ "duration": "0s", "target": 5 }, { "duration": "0", "target": 0 }] }"#,
        )
        .unwrap();
        assert_eq!(profile.total_duration(), Duration::ZERO);
    }

    #[test]
    fn rejects_negative_target() {
        let err = RunProfile::from_json(r#"{ "stages": [{ "duration": "1s", "target": -1 }] }"#)
            .unwrap_err();
        assert!(err.to_string().contains("negative target"), "{err}");
    }

    #[test]
    fn rejects_negative_settings_by_name() {
        for key in ["startVUs", "maxVUs"] {
            let json = format!(
                r#"{{ "stages": [{{ "duration": "1s", "target": 1 }}], "{key}": -3 }}"#
            );
            let err = RunProfile::from_json(&json).unwrap_err().to_string();
            assert!(err.contains(&format!("{key} must not be negative (-3)")), "{err}");
            assert!(!err.contains("Stage"), "{err}");
        }
    }

    #[test]
    fn rejects_negative_duration() {
        let err = RunProfile::from_json(r#"{ "stages": [{ "duration": "-5s", "target": 1 }] }"#)
            .unwrap_err();
        assert!(err.to_string().contains("must not be negative"), "{err}");
    }

    #[test]
    fn rejects_garbage_duration() {
        assert!(
            RunProfile::from_json(r#"{ "stages": [{ "duration": "soon", "target": 1 }] }"#)
                .is_err()
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(RunProfile::from_json(
            r#"{ "stages": [{ "duration": "1s", "target": 1 }], "vus": 10 }"#
        )
        .is_err());
    }

    #[test]
    fn rejects_bad_threshold() {
        let err = RunProfile::from_json(
            r#"{ "stages": [{ "duration": "1s", "target": 1 }], "thresholds": { "http_req_duration": "p(95) ~ 5" } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("p(95) ~ 5"), "{err}");
    }

    #[test]
    fn builder_requires_stages() {
        assert!(matches!(
            RunProfile::builder().build(),
            Err(ConfigError::NoStages)
        ));
    }

    #[test]
    fn builder_rejects_zero_tick() {
        let res = RunProfile::builder()
            .stage(Duration::from_secs(1), 1)
            .tick(Duration::ZERO)
            .build();
        assert!(matches!(res, Err(ConfigError::ZeroTick)));
    }

    #[test]
    fn builder_rejects_unknown_metric() {
        let res = RunProfile::builder()
            .stage(Duration::from_secs(1), 1)
            .threshold("http_req_blocked", "avg<10")
            .build();
        assert!(matches!(res, Err(ConfigError::UnknownMetric(m)) if m == "http_req_blocked"));
    }
}
