//! Errors raised while setting up a run.

use std::path::PathBuf;

use thiserror::Error;

use crate::auth::AuthError;
use crate::threshold::ThresholdParseError;

/// Errors detected while configuring a run, before any request is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The ramp profile has no stages.
    #[error("at least one ramp stage is required")]
    NoStages,

    /// All ramp stages have zero duration, so the run would end immediately.
    #[error("the ramp profile has a total duration of zero")]
    ZeroDuration,

    /// A stage given as `DURATION:TARGET` could not be parsed.
    #[error("invalid stage `{stage}`: {reason}")]
    InvalidStage {
        /// The stage as written.
        stage: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A threshold expression could not be parsed.
    #[error(transparent)]
    InvalidThreshold(#[from] ThresholdParseError),

    /// The target base URL is not a valid absolute URL.
    #[error("invalid target URL `{url}`: {reason}")]
    InvalidTarget {
        /// The configured base URL.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Both a static token and a token file were configured.
    #[error("`token` and `token_file` are mutually exclusive")]
    AmbiguousCredentials,

    /// The configured token file cannot be used.
    #[error("token file {path:?} is unusable")]
    TokenFile {
        /// The configured token file.
        path: PathBuf,
        /// Why reading the token failed.
        #[source]
        cause: AuthError,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),
}
