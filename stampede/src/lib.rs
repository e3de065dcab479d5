#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod aggregator;
pub mod pool;
pub mod runner;
pub mod scenario;
pub mod scheduler;

pub(crate) mod timer;

pub use runner::{run, AbortHandle, Runner};
pub use scenario::{CheckOutcome, RequestError, RequestResult, Scenario, Status};
pub use stampede_core::*;
pub use stampede_macros::scenario;

pub mod prelude {
    pub use crate::runner::{run, Runner};
    pub use crate::scenario::Scenario;
    pub use stampede_core::{ReportSummary, RunProfile, Stage};
    pub use stampede_macros::scenario;
}
