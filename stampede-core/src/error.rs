use thiserror::Error;

/// Errors raised while building or loading a [`RunProfile`](crate::RunProfile).
///
/// All of these are fatal and surface before a run begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Profile has no stages.")]
    NoStages,

    #[error("Stage {index} has a negative target ({target}).")]
    NegativeTarget { index: usize, target: i64 },

    #[error("{field} must not be negative ({value}).")]
    NegativeSetting { field: &'static str, value: i64 },

    #[error("Invalid duration `{value}` for {field}: {reason}")]
    InvalidDuration {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Tick interval must be greater than zero.")]
    ZeroTick,

    #[error("Unknown metric `{0}`.")]
    UnknownMetric(String),

    #[error("Invalid threshold `{expression}` on {metric}: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("Failed to parse profile: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read profile: {0}")]
    Io(#[from] std::io::Error),
}
