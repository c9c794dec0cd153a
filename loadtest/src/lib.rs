//! A load generator for the agreement generation endpoint.
//!
//! The [`Driver`] ramps simulated virtual users through a piecewise-linear [`RampProfile`]. Every
//! virtual user repeatedly posts a freshly generated agreement request to
//! `{target}/agreement/generate`, checks for `200 OK` and pauses before its next iteration.
//!
//! All response latencies are collected for the whole run. Once the run has completed, latency
//! [`Threshold`]s such as `p(95)<1000` decide whether the run passed. Failed checks are recorded
//! and reported, but never stop the run.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod payload;
pub mod ramp;
pub mod report;
pub mod threshold;
pub mod transport;

pub use crate::driver::{Driver, RunPhase, RunStatus};
pub use crate::ramp::{RampProfile, Stage};
pub use crate::report::RunReport;
pub use crate::threshold::Threshold;
