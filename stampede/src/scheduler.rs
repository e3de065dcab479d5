//! Stage scheduler
//!
//! Turns the declarative ramp profile into a time-indexed target concurrency.
use stampede_core::{RunProfile, Stage};
use std::time::Duration;

/// Desired pool size at some elapsed time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Level(usize),
    /// Every stage has elapsed; the run should drain and stop.
    Finished,
}

#[derive(Clone, Debug)]
pub struct StageScheduler {
    start_target: usize,
    stages: Vec<Stage>,
    total: Duration,
}

impl StageScheduler {
    pub fn new(profile: &RunProfile) -> Self {
        Self::from_stages(profile.start_target(), profile.stages())
    }

    pub fn from_stages(start_target: usize, stages: &[Stage]) -> Self {
        let mut stages = stages.to_vec();

        // Runs always end drained: ramp to zero instantly if the profile does not.
        if stages.last().is_some_and(|s| s.target != 0) {
            stages.push(Stage::new(Duration::ZERO, 0));
        }

        let total = stages.iter().map(|s| s.duration).sum();
        Self {
            start_target,
            stages,
            total,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Index of the stage active at `elapsed`, or `None` once the run is over.
    pub fn stage_index(&self, elapsed: Duration) -> Option<usize> {
        let mut end = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            end += stage.duration;
            if elapsed < end {
                return Some(index);
            }
        }
        None
    }

    /// Unrounded concurrency at `elapsed`, linearly interpolated within the active stage.
    pub fn level_at(&self, elapsed: Duration) -> f64 {
        let mut from = self.start_target as f64;
        let mut begin = Duration::ZERO;

        for stage in &self.stages {
            let end = begin + stage.duration;
            let to = stage.target as f64;

            if elapsed < end {
                let progress = (elapsed - begin).as_secs_f64() / stage.duration.as_secs_f64();
                return from + (to - from) * progress;
            }

            from = to;
            begin = end;
        }

        from
    }

    pub fn target_at(&self, elapsed: Duration) -> Target {
        if elapsed >= self.total {
            Target::Finished
        } else {
            Target::Level(self.level_at(elapsed).round().max(0.) as usize)
        }
    }
}
