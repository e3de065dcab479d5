//! Virtual user pool
//!
//! Each virtual user is a tokio task looping over the scenario. The pool grows by spawning tasks
//! and shrinks by marking the newest ones as stopping; a stopping worker always completes its
//! in-flight iteration before it exits.
use crate::aggregator::MetricsAggregator;
use crate::scenario::{Scenario, Status};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a virtual user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    Spawned = 0,
    Running = 1,
    Stopping = 2,
    Terminated = 3,
}

impl VuState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => VuState::Spawned,
            1 => VuState::Running,
            2 => VuState::Stopping,
            _ => VuState::Terminated,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Unable to spawn virtual user {0}: no tokio runtime available.")]
    NoRuntime(u64),
}

struct VirtualUser {
    id: u64,
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl VirtualUser {
    fn state(&self) -> VuState {
        VuState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask the worker to stop after its current iteration.
    fn retire(&self) {
        for from in [VuState::Spawned, VuState::Running] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    VuState::Stopping as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return;
            }
        }
    }
}

struct WorkerContext<R> {
    scenario: Scenario<R>,
    aggregator: Arc<MetricsAggregator>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    stop: watch::Receiver<bool>,
}

impl<R> Clone for WorkerContext<R> {
    fn clone(&self) -> Self {
        Self {
            scenario: self.scenario.clone(),
            aggregator: self.aggregator.clone(),
            limiter: self.limiter.clone(),
            stop: self.stop.clone(),
        }
    }
}

pub struct VirtualUserPool<R> {
    ctx: WorkerContext<R>,
    stop: watch::Sender<bool>,
    active: Vec<VirtualUser>,
    retiring: Vec<VirtualUser>,
    next_id: u64,
    max_vus: Option<usize>,
    vus_max: usize,
    clamp_warned: bool,
}

impl<R> VirtualUserPool<R>
where
    R: Status + Send + 'static,
{
    pub fn new(
        scenario: Scenario<R>,
        aggregator: Arc<MetricsAggregator>,
        max_vus: Option<usize>,
        max_rps: Option<NonZeroU32>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        Self {
            ctx: WorkerContext {
                scenario,
                aggregator,
                limiter: max_rps.map(|rps| Arc::new(rate_limiter(rps))),
                stop: stop_rx,
            },
            stop,
            active: vec![],
            retiring: vec![],
            next_id: 0,
            max_vus,
            vus_max: 0,
            clamp_warned: false,
        }
    }

    /// Spawn or retire workers until `target` are active.
    ///
    /// On error the workers spawned so far are kept; the caller retries on its next tick.
    pub fn scale_to(&mut self, target: usize) -> Result<(), PoolError> {
        self.reap();

        let target = match self.max_vus {
            Some(max) if target > max => {
                if !self.clamp_warned {
                    warn!("Target of {target} virtual users exceeds the cap of {max}.");
                    self.clamp_warned = true;
                }
                max
            }
            _ => target,
        };

        if self.active.len() > target {
            trace!("Retiring {} virtual users.", self.active.len() - target);
            for vu in self.active.drain(target..) {
                vu.retire();
                self.retiring.push(vu);
            }
        }

        let res = loop {
            if self.active.len() >= target {
                break Ok(());
            }
            match self.spawn() {
                Ok(vu) => self.active.push(vu),
                Err(err) => break Err(err),
            }
        };

        self.vus_max = self.vus_max.max(self.len());

        #[cfg(feature = "metrics")]
        metrics::gauge!("stampede_vus").set(self.len() as f64);

        res
    }

    /// Raise the global stop flag and wait for every worker to finish.
    ///
    /// In-flight requests are allowed to complete; pacing delays are cut short. Workers still
    /// running after `graceful_stop` are aborted. Returns how many had to be aborted.
    pub async fn shutdown(mut self, graceful_stop: Duration) -> usize {
        self.stop.send_replace(true);

        let workers: Vec<_> = self
            .active
            .drain(..)
            .chain(self.retiring.drain(..))
            .collect();
        for vu in &workers {
            vu.retire();
        }

        debug!("Waiting on {} virtual users.", workers.len());
        let deadline = tokio::time::Instant::now() + graceful_stop;
        let mut aborted = 0;
        for vu in workers {
            let VirtualUser { id, mut handle, .. } = vu;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("Virtual user {id} failed: {err}"),
                Err(_) => {
                    warn!("Virtual user {id} still running after {graceful_stop:?}; aborting.");
                    handle.abort();
                    aborted += 1;
                }
            }
        }

        #[cfg(feature = "metrics")]
        metrics::gauge!("stampede_vus").set(0.);

        aborted
    }

    fn spawn(&mut self) -> Result<VirtualUser, PoolError> {
        let id = self.next_id;
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime(id))?;
        self.next_id += 1;

        let state = Arc::new(AtomicU8::new(VuState::Spawned as u8));
        trace!("Spawning virtual user {id}.");
        let handle = runtime.spawn(virtual_user(id, self.ctx.clone(), state.clone()));

        Ok(VirtualUser { id, state, handle })
    }

    fn reap(&mut self) {
        self.retiring.retain(|vu| !vu.handle.is_finished());

        // An active worker only exits on stop, so a finished one has panicked. Dropping it lets
        // the caller respawn a replacement.
        self.active.retain(|vu| {
            let alive = !vu.handle.is_finished();
            if !alive {
                error!("Virtual user {} exited unexpectedly; replacing it.", vu.id);
            }
            alive
        });
    }
}

impl<R> VirtualUserPool<R> {
    /// Workers counted towards the target.
    pub fn active(&self) -> usize {
        self.active.len()
    }

    /// Workers finishing their last iteration.
    pub fn retiring(&self) -> usize {
        self.retiring.len()
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.retiring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest pool size seen so far.
    pub fn vus_max(&self) -> usize {
        self.vus_max
    }

    pub fn count(&self, state: VuState) -> usize {
        self.active
            .iter()
            .chain(&self.retiring)
            .filter(|vu| vu.state() == state)
            .count()
    }
}

impl<R> Drop for VirtualUserPool<R> {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

async fn virtual_user<R>(id: u64, ctx: WorkerContext<R>, state: Arc<AtomicU8>)
where
    R: Status + Send + 'static,
{
    let WorkerContext {
        scenario,
        aggregator,
        limiter,
        mut stop,
    } = ctx;

    // Fails only if the pool already retired this worker.
    let _ = state.compare_exchange(
        VuState::Spawned as u8,
        VuState::Running as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );

    loop {
        if state.load(Ordering::Acquire) != VuState::Running as u8 || *stop.borrow() {
            break;
        }

        if let Some(limiter) = &limiter {
            tokio::select! {
                _ = limiter.until_ready() => {}
                _ = stopped(&mut stop) => break,
            }
        }

        let result = scenario.iterate().await;
        if let Err(err) = &result.outcome {
            trace!("Virtual user {id}: {err}");
        }
        aggregator.record(result);

        let pacing = scenario.pacing_delay();
        if !pacing.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(pacing) => {}
                _ = stopped(&mut stop) => {}
            }
        }

        aggregator.record_iteration();
    }

    state.store(VuState::Stopping as u8, Ordering::Release);
    trace!("Virtual user {id} stopping.");
    state.store(VuState::Terminated as u8, Ordering::Release);
}

/// Resolves once the flag is raised, or once its sender is gone.
pub(crate) async fn stopped(flag: &mut watch::Receiver<bool>) {
    while !*flag.borrow_and_update() {
        if flag.changed().await.is_err() {
            return;
        }
    }
}

fn rate_limiter(max_rps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(max_rps).allow_burst(NonZeroU32::MIN))
}
