use std::time::Duration;

/// Default period of the stage scheduler tick.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default per-request timeout, matching the usual HTTP client default for load scripts.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit code used when one or more thresholds failed.
pub const EXIT_THRESHOLDS_FAILED: i32 = 99;

/// Exit code used when the profile could not be loaded.
pub const EXIT_INVALID_CONFIG: i32 = 104;

/// Exit code used when the run was aborted from the outside.
pub const EXIT_EXTERNAL_ABORT: i32 = 105;
