//! Run orchestration
//!
//! A [`Runner`] owns the scheduler tick: on every tick it asks the [`StageScheduler`] for the
//! current target and resizes the [`VirtualUserPool`]. Once the last stage has elapsed (or the run
//! is aborted) the pool is drained and the thresholds are evaluated against a snapshot of the
//! [`MetricsAggregator`].
use crate::aggregator::MetricsAggregator;
use crate::pool::{stopped, VirtualUserPool};
use crate::scenario::{Scenario, Status};
use crate::scheduler::{StageScheduler, Target};
use crate::timer::Timer;
use stampede_core::{ReportSummary, RunProfile};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Run `scenario` against `profile` to completion.
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
/// #[tokio::main]
/// async fn main() {
///     let profile = RunProfile::builder()
///         .stage(Duration::from_secs(30), 10)
///         .stage(Duration::from_secs(60), 10)
///         .stage(Duration::from_secs(10), 0)
///         .threshold("http_req_duration", "p(95)<500")
///         .build()
///         .unwrap();
///
///     let scenario = canary()
///         .check("status is 200", |r| r.status() == 200)
///         .pacing(Duration::from_secs(1));
///
///     let summary = run(profile, scenario).await;
///     std::process::exit(summary.exit_code());
/// }
/// ```
pub async fn run<R>(profile: RunProfile, scenario: Scenario<R>) -> ReportSummary
where
    R: Status + Send + 'static,
{
    Runner::new(profile, scenario).run().await
}

/// Stops a run from outside. The run drains its workers and reports as aborted.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct Runner<R> {
    profile: RunProfile,
    scenario: Scenario<R>,
    abort: Arc<watch::Sender<bool>>,
}

impl<R> Runner<R>
where
    R: Status + Send + 'static,
{
    pub fn new(profile: RunProfile, scenario: Scenario<R>) -> Self {
        let (abort, _) = watch::channel(false);
        Self {
            profile,
            scenario,
            abort: Arc::new(abort),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.abort.clone(),
        }
    }

    #[instrument(name = "scenario", skip_all, fields(name = self.scenario.name()))]
    pub async fn run(self) -> ReportSummary {
        let Runner {
            profile,
            scenario,
            abort,
        } = self;

        info!(
            "Running {} with profile {:?}",
            scenario.name(),
            &profile
        );

        let scheduler = StageScheduler::new(&profile);
        let aggregator = Arc::new(MetricsAggregator::new(scenario.check_names()));
        let mut pool = VirtualUserPool::new(
            scenario.clone(),
            aggregator.clone(),
            profile.max_vus(),
            profile.max_rps(),
        );
        let mut abort_rx = abort.subscribe();

        let start = Instant::now();
        let end = start + scheduler.total_duration();
        let mut timer = Timer::new(profile.tick()).await;
        debug!("Scheduler ticking every {timer}");

        let mut stage = None;
        let mut aborted = false;

        // NOTE: This loop is time-sensitive. Any long awaits or blocking will throw off the ramp.
        loop {
            let elapsed = start.elapsed();
            let target = match scheduler.target_at(elapsed) {
                Target::Level(target) => target,
                Target::Finished => break,
            };

            let index = scheduler.stage_index(elapsed);
            if index != stage {
                if let Some(i) = index {
                    let next = &scheduler.stages()[i];
                    info!(
                        "Stage {}/{}: {} virtual users over {}",
                        i + 1,
                        scheduler.stages().len(),
                        next.target,
                        humantime::format_duration(next.duration)
                    );
                }
                stage = index;
            }

            if let Err(err) = pool.scale_to(target) {
                error!("{err} Retrying on next tick.");
            }

            tokio::select! {
                _ = timer.tick() => {}
                _ = tokio::time::sleep_until(end) => {}
                _ = stopped(&mut abort_rx) => {
                    warn!("Run aborted after {:?}", start.elapsed());
                    aborted = true;
                    break;
                }
            }
        }

        let graceful_stop = profile
            .graceful_stop()
            .unwrap_or(scenario.request_timeout() + profile.tick());
        let vus_max = pool.vus_max();

        debug!("Draining {} virtual users.", pool.len());
        let killed = pool.shutdown(graceful_stop).await;
        if killed > 0 {
            warn!("{killed} virtual users did not finish within {graceful_stop:?}.");
        }

        let snapshot = aggregator.snapshot(start.elapsed(), vus_max);
        let summary = snapshot.report(scenario.name(), profile.thresholds(), aborted);

        for violation in summary.violations() {
            warn!("Threshold failed: {violation}");
        }
        info!("Scenario complete");

        summary
    }
}
