//! Run-scoped collection of request outcomes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use sketches_ddsketch::DDSketch;

use crate::ramp::RampProfile;
use crate::report::{LatencySummary, RunReport, StageSummary};
use crate::threshold::{Aggregate, Threshold};

/// The result of a single iteration's request.
#[derive(Debug)]
pub enum Outcome {
    /// The target responded, with any status.
    Response {
        /// The response status.
        status: StatusCode,
        /// Time from sending the request until the response body was read.
        latency: Duration,
    },
    /// No response was received.
    Failed {
        /// Groups errors in the report.
        kind: &'static str,
        /// Time spent on the request until it failed, including timeouts.
        ///
        /// `None` if the request was never sent, such as when no token was available.
        latency: Option<Duration>,
    },
}

impl Outcome {
    /// The request duration, if a request went out.
    pub fn latency(&self) -> Option<Duration> {
        match *self {
            Outcome::Response { latency, .. } => Some(latency),
            Outcome::Failed { latency, .. } => latency,
        }
    }

    /// Whether this outcome passes the `200 OK` check.
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Response { status, .. } if *status == StatusCode::OK)
    }
}

/// Counters and latency sketch for one ramp stage.
#[derive(Default)]
pub struct StageMetrics {
    /// Iterations that started during this stage.
    pub requests: u64,
    /// Iterations answered with `200 OK`.
    pub checks_passed: u64,
    /// Iterations with any other status or without a response.
    pub checks_failed: u64,
    /// Iterations without a response.
    pub transport_errors: u64,
    timing: DDSketch,
}

impl StageMetrics {
    fn summary(&self) -> Option<LatencySummary> {
        let sketch = &self.timing;
        if sketch.count() == 0 {
            return None;
        }

        let quantile = |q| {
            let seconds = sketch.quantile(q).ok().flatten()?;
            Some(Duration::from_secs_f64(seconds.max(0.0)))
        };
        let avg = sketch.sum()? / sketch.count() as f64;

        Some(LatencySummary {
            avg: Duration::from_secs_f64(avg.max(0.0)),
            p50: quantile(0.5)?,
            p90: quantile(0.9)?,
            p95: quantile(0.95)?,
            p99: quantile(0.99)?,
            max: Duration::from_secs_f64(sketch.max()?.max(0.0)),
        })
    }
}

impl fmt::Debug for StageMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageMetrics")
            .field("requests", &self.requests)
            .field("checks_passed", &self.checks_passed)
            .field("checks_failed", &self.checks_failed)
            .field("transport_errors", &self.transport_errors)
            .field("samples", &self.timing.count())
            .finish()
    }
}

/// All outcomes recorded during a run.
///
/// Virtual users share one instance behind a mutex, so every record lands exactly once.
#[derive(Debug)]
pub struct RunMetrics {
    stages: Vec<StageMetrics>,
    /// Every request duration in milliseconds, for exact threshold evaluation.
    latencies_ms: Vec<f64>,
    status_codes: BTreeMap<u16, u64>,
    errors: BTreeMap<&'static str, u64>,
    interrupted: u64,
}

impl RunMetrics {
    /// Creates empty metrics for a profile with `stages` stages.
    pub fn new(stages: usize) -> Self {
        Self {
            stages: (0..stages).map(|_| StageMetrics::default()).collect(),
            latencies_ms: Vec::new(),
            status_codes: BTreeMap::new(),
            errors: BTreeMap::new(),
            interrupted: 0,
        }
    }

    /// Records the outcome of an iteration that started during `stage`.
    pub fn record(&mut self, stage: usize, outcome: &Outcome) {
        let last = self.stages.len().saturating_sub(1);
        let Some(metrics) = self.stages.get_mut(stage.min(last)) else {
            return;
        };

        metrics.requests += 1;
        if outcome.is_ok() {
            metrics.checks_passed += 1;
        } else {
            metrics.checks_failed += 1;
        }

        if let Some(latency) = outcome.latency() {
            metrics.timing.add(latency.as_secs_f64());
            self.latencies_ms.push(latency.as_secs_f64() * 1000.0);
        }

        match *outcome {
            Outcome::Response { status, .. } => {
                *self.status_codes.entry(status.as_u16()).or_default() += 1;
            }
            Outcome::Failed { kind, .. } => {
                metrics.transport_errors += 1;
                *self.errors.entry(kind).or_default() += 1;
            }
        }
    }

    /// Records iterations that were cut off when the graceful stop window expired.
    pub fn record_interrupted(&mut self, count: u64) {
        self.interrupted += count;
    }

    /// Metrics for the stage at `index`.
    pub fn stage(&self, index: usize) -> Option<&StageMetrics> {
        self.stages.get(index)
    }

    /// The total number of recorded requests.
    pub fn requests(&self) -> u64 {
        self.stages.iter().map(|stage| stage.requests).sum()
    }

    /// Evaluates `thresholds` and builds the end-of-run report.
    pub fn into_report(
        mut self,
        profile: &RampProfile,
        thresholds: &[Threshold],
        elapsed: Duration,
        aborted: bool,
    ) -> RunReport {
        self.latencies_ms.sort_unstable_by(f64::total_cmp);
        let sorted = &self.latencies_ms;

        let thresholds = thresholds
            .iter()
            .map(|threshold| threshold.evaluate(sorted))
            .collect();

        let latency = exact_summary(sorted);

        let stages = profile
            .stages()
            .iter()
            .zip(&self.stages)
            .enumerate()
            .map(|(index, (stage, metrics))| StageSummary {
                index,
                stage: *stage,
                requests: metrics.requests,
                checks_failed: metrics.checks_failed,
                transport_errors: metrics.transport_errors,
                latency: metrics.summary(),
            })
            .collect::<Vec<_>>();

        RunReport {
            elapsed,
            aborted,
            iterations: self.requests(),
            checks_passed: self.stages.iter().map(|s| s.checks_passed).sum(),
            checks_failed: self.stages.iter().map(|s| s.checks_failed).sum(),
            interrupted: self.interrupted,
            latency,
            stages,
            status_codes: self.status_codes,
            errors: self.errors,
            thresholds,
        }
    }
}

/// Latency summary computed exactly over sorted millisecond samples.
fn exact_summary(sorted: &[f64]) -> Option<LatencySummary> {
    let exact = |aggregate: Aggregate| {
        let millis = aggregate.compute(sorted)?;
        Some(Duration::from_secs_f64(millis.max(0.0) / 1000.0))
    };

    Some(LatencySummary {
        avg: exact(Aggregate::Avg)?,
        p50: exact(Aggregate::Med)?,
        p90: exact(Aggregate::Percentile(90.0))?,
        p95: exact(Aggregate::Percentile(95.0))?,
        p99: exact(Aggregate::Percentile(99.0))?,
        max: exact(Aggregate::Max)?,
    })
}
