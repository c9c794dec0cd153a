//! Test utilities for the load test driver.
//!
//! This crate provides a stand-in for the agreement generation service and logging setup for
//! integration tests. See the modules for all available utilities.

pub mod server;
pub mod tracing;
