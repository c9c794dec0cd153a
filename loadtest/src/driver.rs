//! Runs a [`RampProfile`] of virtual users against a [`Transport`].
//!
//! The driver wakes up every ramp interval, compares the number of running virtual users with
//! what the profile asks for at that instant, and starts or retires users accordingly. Each
//! virtual user is a task looping over iterations:
//!
//! 1. generate a fresh [`AgreementRequest`](crate::payload::AgreementRequest)
//! 2. obtain the bearer token
//! 3. send the request and wait for the response
//! 4. record the status and the request duration
//! 5. sleep for the pacing interval
//!
//! Once the profile ends, all users are asked to stop and in-flight iterations may finish within
//! the graceful stop window. Thresholds are evaluated over everything recorded.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::auth::{BoxedTokenProvider, StaticToken, TokenProvider};
use crate::config::{Config, DEFAULT_TOKEN};
use crate::error::ConfigError;
use crate::metrics::{Outcome, RunMetrics};
use crate::payload::{AgreementRequest, PayloadGenerator};
use crate::ramp::RampProfile;
use crate::report::RunReport;
use crate::threshold::Threshold;
use crate::transport::{BoxedTransport, HttpTransport, Transport};

/// The smallest supported ramp interval.
const MIN_RAMP_INTERVAL: Duration = Duration::from_millis(1);

/// The lifecycle of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    /// The run has not started yet.
    Idle,
    /// The profile is executing the stage at the given index.
    Ramping {
        /// Index into the profile's stages.
        stage: usize,
    },
    /// The profile has ended and in-flight iterations are finishing.
    Draining,
    /// All virtual users have stopped and the report is available.
    Completed,
}

/// A snapshot of the run, published while it executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunStatus {
    /// The current lifecycle phase.
    pub phase: RunPhase,
    /// While ramping, the virtual users scheduled to run iterations. Once the profile has ended,
    /// the virtual users that have not stopped yet.
    pub active_vus: usize,
}

/// A builder for creating a [`Driver`].
#[derive(Debug)]
pub struct DriverBuilder {
    profile: RampProfile,
    transport: BoxedTransport,
    credentials: BoxedTokenProvider,
    thresholds: Vec<Threshold>,
    pacing: Duration,
    graceful_stop: Duration,
    ramp_interval: Duration,
    seed: Option<u64>,
}

impl DriverBuilder {
    /// Source of the bearer token, asked once per iteration.
    pub fn credentials(mut self, credentials: BoxedTokenProvider) -> Self {
        self.credentials = credentials;
        self
    }


    /// Thresholds evaluated at the end of the run.
    pub fn thresholds(mut self, thresholds: Vec<Threshold>) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Pause of each virtual user between two iterations.
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// How long in-flight iterations may take to finish after the profile ends.
    pub fn graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    /// How often the number of virtual users is adjusted to the profile.
    pub fn ramp_interval(mut self, ramp_interval: Duration) -> Self {
        self.ramp_interval = ramp_interval.max(MIN_RAMP_INTERVAL);
        self
    }

    /// Seed from which every virtual user derives its payload sequence.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Creates the driver.
    pub fn build(self) -> Driver {
        let (status, _) = watch::channel(RunStatus {
            phase: RunPhase::Idle,
            active_vus: 0,
        });

        Driver {
            profile: self.profile,
            transport: Arc::from(self.transport),
            credentials: Arc::from(self.credentials),
            thresholds: self.thresholds,
            pacing: self.pacing,
            graceful_stop: self.graceful_stop,
            ramp_interval: self.ramp_interval,
            seed: self.seed.unwrap_or_else(rand::random),
            status,
            stop: CancellationToken::new(),
        }
    }
}

/// Executes a ramp profile and evaluates thresholds over the results.
#[derive(Debug)]
pub struct Driver {
    profile: RampProfile,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn TokenProvider>,
    thresholds: Vec<Threshold>,
    pacing: Duration,
    graceful_stop: Duration,
    ramp_interval: Duration,
    seed: u64,
    status: watch::Sender<RunStatus>,
    stop: CancellationToken,
}

impl Driver {
    /// Constructs a new driver builder for the given profile and transport.
    ///
    /// Defaults to the placeholder token, the `p(95)<1000` threshold, one second of pacing, a 30
    /// second graceful stop and a ramp interval of 100ms.
    pub fn builder(profile: RampProfile, transport: BoxedTransport) -> DriverBuilder {
        let defaults = Config::default();
        DriverBuilder {
            profile,
            transport,
            credentials: Box::new(StaticToken::new(DEFAULT_TOKEN)),
            thresholds: defaults.thresholds,
            pacing: defaults.pacing,
            graceful_stop: defaults.graceful_stop,
            ramp_interval: defaults.ramp_interval,
            seed: None,
        }
    }

    /// Creates a driver posting over HTTP as described by `config`.
    ///
    /// All configuration errors surface here, before any request is sent.
    pub async fn configure(config: &Config) -> Result<Self, ConfigError> {
        let profile = config.profile()?;
        let credentials = config.credentials().await?;
        let transport = HttpTransport::new(&config.target, config.request_timeout)?;
        tracing::debug!(endpoint = %transport.endpoint(), "configured transport");

        let mut builder = Driver::builder(profile, Box::new(transport))
            .credentials(credentials)
            .thresholds(config.thresholds.clone())
            .pacing(config.pacing)
            .graceful_stop(config.graceful_stop)
            .ramp_interval(config.ramp_interval);
        if let Some(seed) = config.seed {
            builder = builder.seed(seed);
        }

        Ok(builder.build())
    }

    /// The profile this driver executes.
    pub fn profile(&self) -> &RampProfile {
        &self.profile
    }

    /// The seed payload sequences are derived from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Subscribes to status updates published while the run executes.
    pub fn status(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    /// Returns a token that ends the ramp early when cancelled.
    ///
    /// In-flight iterations still drain and the report is marked as aborted.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Executes the full profile and returns the report.
    pub async fn run(self) -> RunReport {
        let start = Instant::now();
        let total = self.profile.duration();
        let shared = Arc::new(Shared {
            transport: Arc::clone(&self.transport),
            credentials: Arc::clone(&self.credentials),
            profile: self.profile.clone(),
            metrics: Mutex::new(RunMetrics::new(self.profile.stages().len())),
            pacing: self.pacing,
            start,
        });

        tracing::info!(
            duration = ?total,
            stages = self.profile.stages().len(),
            peak_vus = self.profile.peak(),
            seed = self.seed,
            "starting run"
        );

        let mut tasks = JoinSet::new();
        // Stop tokens of running virtual users, in start order.
        let mut active: Vec<CancellationToken> = Vec::new();
        let mut next_id = 0u64;
        let mut current_stage = None;

        let mut ticker = tokio::time::interval(self.ramp_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
        let deadline = tokio::time::sleep_until(start + total);
        tokio::pin!(deadline);

        let aborted = loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut deadline => break false,
                _ = self.stop.cancelled() => break true,
            }

            let elapsed = start.elapsed();
            if elapsed >= total {
                break false;
            }

            let stage = self.profile.stage_at(elapsed);
            if current_stage != Some(stage) {
                tracing::info!(
                    stage,
                    target_vus = self.profile.stages()[stage].target,
                    "entering stage"
                );
                current_stage = Some(stage);
            }

            let desired = self.profile.vus_at(elapsed) as usize;
            while active.len() < desired {
                let token = CancellationToken::new();
                let seed = self.seed.wrapping_add(next_id);
                tasks.spawn(run_virtual_user(Arc::clone(&shared), seed, token.clone()));
                active.push(token);
                next_id += 1;
            }
            // Retire the most recently started users first.
            while active.len() > desired {
                if let Some(token) = active.pop() {
                    token.cancel();
                }
            }

            while let Some(result) = tasks.try_join_next() {
                check_joined(result);
            }

            self.status.send_replace(RunStatus {
                phase: RunPhase::Ramping { stage },
                active_vus: active.len(),
            });
        };

        if aborted {
            tracing::warn!(elapsed = ?start.elapsed(), "run stopped before the profile completed");
        }

        for token in active.drain(..) {
            token.cancel();
        }
        self.status.send_replace(RunStatus {
            phase: RunPhase::Draining,
            active_vus: tasks.len(),
        });
        tracing::info!(in_flight = tasks.len(), "draining virtual users");

        let grace = tokio::time::sleep(self.graceful_stop);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                result = tasks.join_next() => match result {
                    Some(result) => check_joined(result),
                    None => break,
                },
                _ = &mut grace => {
                    // Users that stopped but were not joined yet are not interrupted.
                    while let Some(result) = tasks.try_join_next() {
                        check_joined(result);
                    }
                    let interrupted = tasks.len();
                    tracing::warn!(
                        interrupted,
                        graceful_stop = ?self.graceful_stop,
                        "graceful stop expired, aborting in-flight iterations"
                    );
                    tasks.shutdown().await;
                    shared
                        .metrics
                        .lock()
                        .unwrap()
                        .record_interrupted(interrupted as u64);
                    break;
                }
            }
        }

        let elapsed = start.elapsed();
        let metrics = {
            let mut metrics = shared.metrics.lock().unwrap();
            std::mem::replace(&mut *metrics, RunMetrics::new(0))
        };
        let report = metrics.into_report(&self.profile, &self.thresholds, elapsed, aborted);

        self.status.send_replace(RunStatus {
            phase: RunPhase::Completed,
            active_vus: tasks.len(),
        });
        tracing::info!(
            iterations = report.iterations,
            checks_failed = report.checks_failed,
            passed = report.passed(),
            "run completed"
        );

        report
    }
}

/// State shared by all virtual users of a run.
#[derive(Debug)]
struct Shared {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn TokenProvider>,
    profile: RampProfile,
    metrics: Mutex<RunMetrics>,
    pacing: Duration,
    start: Instant,
}

async fn run_virtual_user(shared: Arc<Shared>, seed: u64, stop: CancellationToken) {
    let mut payloads = PayloadGenerator::new(seed);

    while !stop.is_cancelled() {
        let stage = shared.profile.stage_at(shared.start.elapsed());
        let request = payloads.next_request();
        let outcome = iterate(&shared, &request).await;
        shared.metrics.lock().unwrap().record(stage, &outcome);

        tokio::select! {
            _ = tokio::time::sleep(shared.pacing) => {}
            _ = stop.cancelled() => break,
        }
    }
}

/// Sends one request and times it, excluding token retrieval.
async fn iterate(shared: &Shared, request: &AgreementRequest) -> Outcome {
    let token = match shared.credentials.token().await {
        Ok(token) => token,
        Err(error) => {
            tracing::warn!(error = &error as &dyn std::error::Error, "no bearer token");
            return Outcome::Failed {
                kind: "credentials",
                latency: None,
            };
        }
    };

    let start = Instant::now();
    match shared.transport.send(request, &token).await {
        Ok(status) => {
            if status != StatusCode::OK {
                tracing::debug!(%status, landlord = %request.landlord_id, "unexpected status");
            }
            Outcome::Response {
                status,
                latency: start.elapsed(),
            }
        }
        Err(error) => {
            tracing::debug!(
                error = &error as &dyn std::error::Error,
                landlord = %request.landlord_id,
                "request failed"
            );
            Outcome::Failed {
                kind: error.kind(),
                latency: Some(start.elapsed()),
            }
        }
    }
}

fn check_joined(result: Result<(), tokio::task::JoinError>) {
    match result {
        Err(error) if error.is_panic() => {
            tracing::error!(error = &error as &dyn std::error::Error, "virtual user panicked");
        }
        _ => {}
    }
}
