//! The end-of-run report and its console rendering.

use std::collections::BTreeMap;
use std::time::Duration;

use yansi::Paint;

use crate::ramp::Stage;
use crate::threshold::ThresholdResult;

/// Average, percentiles and maximum of request latencies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencySummary {
    /// Arithmetic mean.
    pub avg: Duration,
    /// Median.
    pub p50: Duration,
    /// 90th percentile.
    pub p90: Duration,
    /// 95th percentile.
    pub p95: Duration,
    /// 99th percentile.
    pub p99: Duration,
    /// Slowest request.
    pub max: Duration,
}

/// Request counts and latencies of iterations that started during one stage.
#[derive(Clone, Debug)]
pub struct StageSummary {
    /// Position of the stage in the profile.
    pub index: usize,
    /// The stage as configured.
    pub stage: Stage,
    /// Iterations that started during this stage.
    pub requests: u64,
    /// Iterations without a `200 OK` response.
    pub checks_failed: u64,
    /// Iterations that received no response at all.
    pub transport_errors: u64,
    /// Approximate latencies, or `None` if no response arrived during this stage.
    pub latency: Option<LatencySummary>,
}

/// Aggregate result of a run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Wall time from start until the last virtual user stopped.
    pub elapsed: Duration,
    /// Whether the run was interrupted before the profile completed.
    pub aborted: bool,
    /// The number of completed iterations, equal to the number of requests.
    pub iterations: u64,
    /// Iterations answered with `200 OK`.
    pub checks_passed: u64,
    /// Iterations with any other status or without a response.
    pub checks_failed: u64,
    /// Iterations cut off when the graceful stop window expired.
    pub interrupted: u64,
    /// Exact request durations over all iterations that sent a request.
    pub latency: Option<LatencySummary>,
    /// Breakdown by ramp stage, in profile order.
    pub stages: Vec<StageSummary>,
    /// Response counts by status code.
    pub status_codes: BTreeMap<u16, u64>,
    /// Requests without a response, grouped by failure kind.
    pub errors: BTreeMap<&'static str, u64>,
    /// Every configured threshold with its observed value.
    pub thresholds: Vec<ThresholdResult>,
}

impl RunReport {
    /// Whether every threshold held.
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|result| result.passed)
    }

    /// Prints the report to stdout.
    pub fn print(&self) {
        println!();
        print!("{}", "## RUN".bold());
        if self.aborted {
            print!(" {}", "(aborted)".bold().yellow());
        }
        println!();

        print!(
            "  {} iterations in {:.2?}",
            self.iterations.bold(),
            self.elapsed
        );
        print_ops(self.iterations, self.elapsed);
        if self.interrupted > 0 {
            print!(", {} interrupted", self.interrupted.bold().yellow());
        }
        println!();

        print!("  {} ", "checks `200 OK`:".bold());
        print!("{} passed", self.checks_passed.green());
        if self.checks_failed > 0 {
            print!(
                ", {}",
                format!("{} FAILED", self.checks_failed).bold().red()
            );
        }
        println!();

        if let Some(latency) = &self.latency {
            print_latency(latency);
        }

        if !self.status_codes.is_empty() || !self.errors.is_empty() {
            print!("  {}", "responses:".bold());
            for (status, count) in &self.status_codes {
                if *status == 200 {
                    print!(" {}×{}", status.green(), count);
                } else {
                    print!(" {}×{}", status.red(), count);
                }
            }
            for (kind, count) in &self.errors {
                print!(" {}×{}", kind.red(), count);
            }
            println!();
        }

        println!();
        println!("{}", "## STAGES".bold());
        for summary in &self.stages {
            print!(
                "{} → {} VUs over {}: {} requests",
                format!("#{}", summary.index).bold().blue(),
                summary.stage.target.bold(),
                humantime::format_duration(summary.stage.duration),
                summary.requests.bold()
            );
            if summary.checks_failed > 0 {
                print!(
                    ", {}",
                    format!("{} FAILED", summary.checks_failed).bold().red()
                );
            }
            if summary.transport_errors > 0 {
                print!(", {} without response", summary.transport_errors);
            }
            println!();
            if let Some(latency) = &summary.latency {
                print_latency(latency);
            }
        }

        println!();
        println!("{}", "## THRESHOLDS".bold());
        for result in &self.thresholds {
            let verdict = if result.passed {
                "✓".bold().green()
            } else {
                "✗".bold().red()
            };
            match result.observed {
                Some(observed) => println!(
                    "  {verdict} http_req_duration {} (observed {:.2?})",
                    result.threshold.bold(),
                    observed
                ),
                None => println!(
                    "  {verdict} http_req_duration {} (no samples)",
                    result.threshold.bold()
                ),
            }
        }

        println!();
        if self.passed() {
            println!("{}", "PASSED".bold().green());
        } else {
            println!("{}", "FAILED".bold().red());
        }
    }
}

fn print_latency(latency: &LatencySummary) {
    let LatencySummary {
        avg,
        p50,
        p90,
        p95,
        p99,
        max,
    } = latency;
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p95: {p95:.2?}; p99: {p99:.2?}; max: {max:.2?}",
        avg.bold()
    );
}

fn print_ops(ops: u64, elapsed: Duration) {
    if elapsed.is_zero() {
        return;
    }
    let ops_ps = ops as f64 / elapsed.as_secs_f64();
    print!(" ({:.2} requests/s)", ops_ps.bold());
}
