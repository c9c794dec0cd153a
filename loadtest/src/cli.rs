//! The `loadtest` command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretBox;
use yansi::Paint;

use crate::config::{Config, ConfigSecret};
use crate::driver::{Driver, RunPhase, RunStatus};
use crate::observability;
use crate::ramp::{RampProfile, Stage};
use crate::threshold::Threshold;

/// Exit code reported when the run completed but a threshold failed.
pub const THRESHOLD_FAILED: u8 = 99;

/// Ramping load test for the agreement generation endpoint.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// base URL of the system under test
    #[argh(option)]
    target: Option<String>,

    /// static bearer token sent with every request
    #[argh(option)]
    token: Option<String>,

    /// file to read the bearer token from before every request
    #[argh(option)]
    token_file: Option<PathBuf>,

    /// ramp stage as DURATION:TARGET, such as `30s:25`; repeat to replace the configured stages
    #[argh(option)]
    stage: Vec<Stage>,

    /// latency threshold in milliseconds, such as `p(95)<1000`; repeat to replace the configured
    /// thresholds
    #[argh(option)]
    threshold: Vec<Threshold>,

    /// seed for payload generation
    #[argh(option)]
    seed: Option<u64>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Plan(PlanCommand),
    Version(VersionCommand),
}

/// run the load test and exit with 99 if a threshold failed
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// print the ramp profile without sending any requests
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "plan")]
struct PlanCommand {}

/// print the version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

impl Args {
    /// Applies command line overrides on top of the loaded configuration and returns the command.
    fn apply(self, config: &mut Config) -> Command {
        let token_given = self.token.is_some();
        if let Some(target) = self.target {
            config.target = target;
        }
        if let Some(token) = self.token {
            config.token = Some(SecretBox::new(Box::new(ConfigSecret::from(token.as_str()))));
            config.token_file = None;
        }
        if let Some(token_file) = self.token_file {
            // Both on the command line is ambiguous and rejected later.
            if !token_given {
                config.token = None;
            }
            config.token_file = Some(token_file);
        }
        if !self.stage.is_empty() {
            config.stages = self.stage;
        }
        if !self.threshold.is_empty() {
            config.thresholds = self.threshold;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        self.command
    }
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<ExitCode> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if matches!(args.command, Command::Version(_)) {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let mut config =
        Config::load(args.config.as_deref()).context("failed to load configuration")?;
    let command = args.apply(&mut config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("loadtest-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing();
    tracing::debug!(?config);

    match command {
        Command::Run(RunCommand {}) => runtime.block_on(run(config)),
        Command::Plan(PlanCommand {}) => {
            let profile = config.profile().context("invalid ramp profile")?;
            print_plan(&profile, &config);
            Ok(ExitCode::SUCCESS)
        }
        Command::Version(VersionCommand {}) => Ok(ExitCode::SUCCESS),
    }
}

async fn run(config: Config) -> Result<ExitCode> {
    let driver = Driver::configure(&config)
        .await
        .context("invalid configuration")?;
    tracing::info!(base_url = %config.target, seed = driver.seed(), "configured run");

    let stop = driver.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, draining virtual users");
            stop.cancel();
        }
    });

    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message("Starting load test:");
    bar.enable_steady_tick(Duration::from_millis(100));

    let stages = driver.profile().stages().len();
    let mut status = driver.status();
    let progress = tokio::spawn({
        let bar = bar.clone();
        async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                bar.set_message(describe(current, stages));
            }
        }
    });

    let report = driver.run().await;
    progress.await.ok();
    bar.finish_and_clear();

    report.print();

    if report.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(THRESHOLD_FAILED))
    }
}

fn describe(status: RunStatus, stages: usize) -> String {
    match status.phase {
        RunPhase::Idle => "Starting load test:".to_owned(),
        RunPhase::Ramping { stage } => format!(
            "Stage {}/{stages}, {} VUs:",
            stage + 1,
            status.active_vus
        ),
        RunPhase::Draining => "Draining in-flight iterations:".to_owned(),
        RunPhase::Completed => "Completed:".to_owned(),
    }
}

fn print_plan(profile: &RampProfile, config: &Config) {
    println!("{}", "## PLAN".bold());
    println!(
        "  POST {}/{} every {} per VU",
        config.target.trim_end_matches('/'),
        crate::transport::GENERATE_PATH,
        humantime::format_duration(config.pacing)
    );

    let mut from = profile.start();
    let mut offset = Duration::ZERO;
    for (index, stage) in profile.stages().iter().enumerate() {
        let end = offset + stage.duration;
        println!(
            "  {} {} → {}: {from} → {} VUs",
            format!("#{index}").bold().blue(),
            humantime::format_duration(offset),
            humantime::format_duration(end),
            stage.target.bold()
        );
        from = stage.target;
        offset = end;
    }

    println!(
        "  total {}, peak {} VUs",
        humantime::format_duration(profile.duration()).bold(),
        profile.peak().bold()
    );
    for threshold in &config.thresholds {
        println!("  threshold http_req_duration {}", threshold.bold());
    }
}
