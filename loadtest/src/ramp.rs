//! Piecewise-linear virtual user profiles.
//!
//! A [`RampProfile`] is an ordered list of [`Stage`]s. Each stage moves the number of active
//! virtual users linearly from the previous stage's target (or the profile's start value) to its
//! own target over its duration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One segment of a [`RampProfile`].
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Stage {
    /// How long this stage lasts.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// The number of virtual users reached at the end of this stage.
    pub target: u32,
}

impl Stage {
    /// Creates a new stage.
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            humantime::format_duration(self.duration),
            self.target
        )
    }
}

/// Parses stages written as `DURATION:TARGET`, for example `30s:25` or `1m 30s:150`.
impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidStage {
            stage: s.to_owned(),
            reason,
        };

        let (duration, target) = s
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected `DURATION:TARGET`".into()))?;
        let duration = humantime::parse_duration(duration.trim())
            .map_err(|err| invalid(format!("bad duration: {err}")))?;
        let target = target
            .trim()
            .parse()
            .map_err(|err| invalid(format!("bad target: {err}")))?;

        Ok(Self { duration, target })
    }
}

/// An ordered sequence of [`Stage`]s describing concurrency over time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RampProfile {
    start: u32,
    stages: Vec<Stage>,
}

impl RampProfile {
    /// Creates a profile starting from zero active virtual users.
    ///
    /// Fails if there are no stages or if all stages have zero duration.
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        Self::starting_at(0, stages)
    }

    /// Creates a profile starting from `start` active virtual users.
    pub fn starting_at(start: u32, stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        if stages.iter().all(|stage| stage.duration.is_zero()) {
            return Err(ConfigError::ZeroDuration);
        }
        Ok(Self { start, stages })
    }

    /// The stages of this profile, in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The number of active virtual users before the first stage begins.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// The sum of all stage durations.
    pub fn duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    /// The highest number of virtual users this profile ever asks for.
    pub fn peak(&self) -> u32 {
        self.stages
            .iter()
            .map(|stage| stage.target)
            .fold(self.start, u32::max)
    }

    /// Returns the index of the stage that is active at `elapsed`.
    ///
    /// Stage boundaries belong to the later stage. Past the end of the profile, this returns the
    /// last stage.
    pub fn stage_at(&self, elapsed: Duration) -> usize {
        let mut end = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            end += stage.duration;
            if elapsed < end {
                return index;
            }
        }
        self.stages.len() - 1
    }

    /// Returns the exact, fractional concurrency level at `elapsed`.
    pub fn level_at(&self, elapsed: Duration) -> f64 {
        let mut from = self.start;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let fraction = ((elapsed.saturating_sub(stage_start)).as_secs_f64()
                    / stage.duration.as_secs_f64())
                .clamp(0.0, 1.0);
                let from = f64::from(from);
                return from + (f64::from(stage.target) - from) * fraction;
            }
            from = stage.target;
            stage_start = stage_end;
        }

        f64::from(from)
    }

    /// Returns the number of virtual users that should be active at `elapsed`.
    pub fn vus_at(&self, elapsed: Duration) -> u32 {
        self.level_at(elapsed).round() as u32
    }
}
