//! Scenario definition
//!
//! A [`Scenario`] is the unit of work a virtual user repeats: one request, a set of named checks
//! evaluated against its response, and a pacing delay before the next iteration.
use stampede_core::DEFAULT_REQUEST_TIMEOUT;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;

type RequestFuture<R> = Pin<Box<dyn Future<Output = Result<R, String>> + Send>>;
type RequestFn<R> = dyn Fn() -> RequestFuture<R> + Send + Sync;
type Predicate<R> = dyn Fn(&R) -> bool + Send + Sync;

/// Load test scenario
///
/// Usually created with the [`#[scenario]`](stampede_macros::scenario) macro, which wraps an
/// `async fn` returning `Result<R, E>`.
///
/// # Example
/// ```no_run
/// use stampede::prelude::*;
/// use std::time::Duration;
///
/// #[scenario]
/// async fn canary() -> Result<reqwest::Response, reqwest::Error> {
///     reqwest::get("http://127.0.0.1:65508").await
/// }
///
/// # fn build() -> Scenario<reqwest::Response> {
/// canary()
///     .check("status is 200", |r| r.status() == 200)
///     .pacing(Duration::from_secs(1))
/// # }
/// ```
pub struct Scenario<R> {
    name: String,
    request: Arc<RequestFn<R>>,
    checks: Vec<Check<R>>,
    pacing: Duration,
    timeout: Duration,
}

impl<R> Clone for Scenario<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            request: self.request.clone(),
            checks: self.checks.clone(),
            pacing: self.pacing,
            timeout: self.timeout,
        }
    }
}

impl<R> fmt::Debug for Scenario<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("checks", &self.check_names().collect::<Vec<_>>())
            .field("pacing", &self.pacing)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<R> Scenario<R>
where
    R: Status + Send + 'static,
{
    pub fn new<T, F, E>(name: &str, func: T) -> Self
    where
        T: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = Result<R, E>> + Send + 'static,
        E: fmt::Display,
    {
        let request = move || -> RequestFuture<R> {
            let fut = func();
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
        };

        Self {
            name: name.to_string(),
            request: Arc::new(request),
            checks: vec![],
            pacing: Duration::ZERO,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Register a named predicate evaluated against every response.
    pub fn check<P>(mut self, name: &str, predicate: P) -> Self
    where
        P: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.checks.push(Check {
            name: Arc::from(name),
            predicate: Arc::new(predicate),
        });
        self
    }

    /// Delay between the end of one iteration and the start of the next.
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Upper bound on a single request. Also bounds how long a stopping worker can take.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Issue one request and run every check against the response.
    pub(crate) async fn iterate(&self) -> RequestResult {
        let timestamp = Instant::now();
        let res = tokio::time::timeout(self.timeout, (self.request)()).await;
        let latency = timestamp.elapsed();

        let (outcome, checks) = match res {
            Ok(Ok(response)) => {
                let checks = self
                    .checks
                    .iter()
                    .map(|check| CheckOutcome {
                        name: check.name.clone(),
                        passed: (check.predicate)(&response),
                    })
                    .collect();

                let outcome = match response.status_code() {
                    Some(code) if !(200..300).contains(&code) => Err(RequestError::Status(code)),
                    code => Ok(code),
                };
                (outcome, checks)
            }
            Ok(Err(err)) => (Err(RequestError::Transport(err)), self.failed_checks()),
            Err(_) => (Err(RequestError::Timeout(self.timeout)), self.failed_checks()),
        };

        RequestResult {
            timestamp,
            latency,
            outcome,
            checks,
        }
    }

    // Without a response there is nothing to assert on, so every check counts as failed.
    fn failed_checks(&self) -> Vec<CheckOutcome> {
        self.checks
            .iter()
            .map(|check| CheckOutcome {
                name: check.name.clone(),
                passed: false,
            })
            .collect()
    }
}

impl<R> Scenario<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check_names(&self) -> impl Iterator<Item = &str> {
        self.checks.iter().map(|c| &*c.name)
    }

    pub fn pacing_delay(&self) -> Duration {
        self.pacing
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }
}

struct Check<R> {
    name: Arc<str>,
    predicate: Arc<Predicate<R>>,
}

impl<R> Clone for Check<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

/// Outcome of a single scenario request.
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub timestamp: Instant,
    pub latency: Duration,
    /// Status code (when the response carries one) or the reason the request failed.
    pub outcome: Result<Option<u16>, RequestError>,
    pub checks: Vec<CheckOutcome>,
}

impl RequestResult {
    pub fn failed(&self) -> bool {
        self.outcome.is_err()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: Arc<str>,
    pub passed: bool,
}

/// Per-request failures. Recorded against the run, never fatal to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status code {0}")]
    Status(u16),
}

/// Responses which carry a status code. Anything outside `2xx` is recorded as a failed request.
pub trait Status {
    fn status_code(&self) -> Option<u16>;
}

impl Status for reqwest::Response {
    fn status_code(&self) -> Option<u16> {
        Some(self.status().as_u16())
    }
}

impl Status for reqwest::StatusCode {
    fn status_code(&self) -> Option<u16> {
        Some(self.as_u16())
    }
}

impl Status for u16 {
    fn status_code(&self) -> Option<u16> {
        Some(*self)
    }
}

impl Status for () {
    fn status_code(&self) -> Option<u16> {
        None
    }
}

/// Used by the `#[scenario]` macro to name the response type of a `Result`-returning fn.
#[doc(hidden)]
pub trait ScenarioOutput {
    type Response;
}

impl<R, E> ScenarioOutput for Result<R, E> {
    type Response = R;
}
