//! Configuration for a load test run.
//!
//! Configuration is merged from the following sources, later sources overriding earlier ones:
//!
//! 1. Defaults, which reproduce the classic agreement-generation profile
//! 2. YAML configuration file (specified via `-c` or `--config`)
//! 3. Environment variables (prefixed with `LOADTEST__`)
//! 4. Command line overrides
//!
//! # Environment Variables
//!
//! Environment variables use `LOADTEST__` as a prefix and double underscores (`__`) to denote
//! nested structures, for example:
//!
//! - `LOADTEST__TARGET=http://localhost:3000`
//! - `LOADTEST__TOKEN_FILE=/run/secrets/jwt`
//! - `LOADTEST__THRESHOLDS='["p(95)<1000", "max<5000"]'`
//!
//! # YAML Configuration File
//!
//! ```yaml
//! target: https://www.kazeapi.uk
//! token: dummy_token
//! stages:
//!   - { duration: 30s, target: 25 }
//!   - { duration: 1m, target: 150 }
//!   - { duration: 1m, target: 300 }
//!   - { duration: 1m, target: 100 }
//!   - { duration: 30s, target: 0 }
//! thresholds:
//!   - p(95)<1000
//! pacing: 1s
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};

use crate::auth::{BoxedTokenProvider, FileToken, StaticToken, TokenProvider};
use crate::error::ConfigError;
use crate::ramp::{RampProfile, Stage};
use crate::threshold::Threshold;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "LOADTEST__";

/// The bearer token sent when no credentials are configured.
pub const DEFAULT_TOKEN: &str = "dummy_token";

/// Newtype around `String` that protects against accidental logging of the bearer token. Use
/// with [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret value.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Run configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the system under test.
    ///
    /// Requests are posted to `{target}/agreement/generate`.
    ///
    /// # Default
    ///
    /// `https://www.kazeapi.uk`
    ///
    /// # Environment Variable
    ///
    /// `LOADTEST__TARGET`
    pub target: String,

    /// Static bearer token sent with every request.
    ///
    /// Mutually exclusive with [`token_file`](Self::token_file). If neither is set,
    /// [`DEFAULT_TOKEN`] is sent.
    ///
    /// # Environment Variable
    ///
    /// `LOADTEST__TOKEN`
    pub token: Option<SecretBox<ConfigSecret>>,

    /// File containing the bearer token, re-read before every request.
    ///
    /// # Environment Variable
    ///
    /// `LOADTEST__TOKEN_FILE`
    pub token_file: Option<PathBuf>,

    /// Number of virtual users active before the first stage.
    ///
    /// # Default
    ///
    /// `0`
    pub start_vus: u32,

    /// The ramp profile, as a list of `{duration, target}` stages.
    ///
    /// # Default
    ///
    /// `30s → 25`, `1m → 150`, `1m → 300`, `1m → 100`, `30s → 0`
    pub stages: Vec<Stage>,

    /// Latency thresholds evaluated at the end of the run, such as `p(95)<1000`.
    ///
    /// Values are in milliseconds. The run fails if any threshold fails.
    ///
    /// # Default
    ///
    /// `["p(95)<1000"]`
    pub thresholds: Vec<Threshold>,

    /// Pause of each virtual user between two iterations.
    ///
    /// # Default
    ///
    /// `1s`
    #[serde(with = "humantime_serde")]
    pub pacing: Duration,

    /// Upper bound for a single request, including connecting and reading the response.
    ///
    /// Timed out requests count as failed checks.
    ///
    /// # Default
    ///
    /// `60s`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How long in-flight iterations may take to finish after the profile ends.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(with = "humantime_serde")]
    pub graceful_stop: Duration,

    /// How often the number of active virtual users is adjusted to the profile.
    ///
    /// # Default
    ///
    /// `100ms`
    #[serde(with = "humantime_serde")]
    pub ramp_interval: Duration,

    /// Seed for payload generation. A random seed is chosen and logged if unset.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        Self {
            target: "https://www.kazeapi.uk".into(),
            token: None,
            token_file: None,
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(30), 25),
                Stage::new(minutes(1), 150),
                Stage::new(minutes(1), 300),
                Stage::new(minutes(1), 100),
                Stage::new(Duration::from_secs(30), 0),
            ],
            thresholds: vec![Threshold::default_slo()],
            pacing: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            graceful_stop: Duration::from_secs(30),
            ramp_interval: Duration::from_millis(100),
            seed: None,
        }
    }
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values, such as malformed durations, negative
    ///   targets or unparsable thresholds
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Builds the ramp profile from `start_vus` and `stages`.
    pub fn profile(&self) -> Result<RampProfile, ConfigError> {
        RampProfile::starting_at(self.start_vus, self.stages.clone())
    }

    /// Builds the credential provider.
    ///
    /// A configured token file is read once to verify that it is usable before the run starts.
    pub async fn credentials(&self) -> Result<BoxedTokenProvider, ConfigError> {
        match (&self.token, &self.token_file) {
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousCredentials),
            (Some(token), None) => Ok(Box::new(StaticToken::new(
                token.expose_secret().as_str(),
            ))),
            (None, Some(path)) => {
                let provider = FileToken::new(path);
                if let Err(cause) = provider.token().await {
                    return Err(ConfigError::TokenFile {
                        path: path.clone(),
                        cause,
                    });
                }
                Ok(Box::new(provider))
            }
            (None, None) => Ok(Box::new(StaticToken::new(DEFAULT_TOKEN))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::auth::AuthError;

    #[test]
    fn defaults_match_classic_profile() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.target, "https://www.kazeapi.uk");
            assert!(config.token.is_none());
            assert_eq!(config.stages.len(), 5);
            assert_eq!(config.profile().unwrap().duration(), Duration::from_secs(240));
            assert_eq!(config.profile().unwrap().peak(), 300);
            assert_eq!(config.thresholds[0].to_string(), "p(95)<1000");
            assert_eq!(config.pacing, Duration::from_secs(1));
            assert_eq!(config.request_timeout, Duration::from_secs(60));

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LOADTEST__TARGET", "http://localhost:3000");
            jail.set_env("LOADTEST__TOKEN", "abcde");
            jail.set_env("LOADTEST__PACING", "250ms");
            jail.set_env("LOADTEST__SEED", "42");
            jail.set_env("LOADTEST__THRESHOLDS", r#"["p(99)<2000", "avg<300"]"#);

            let config = Config::load(None).unwrap();

            assert_eq!(config.target, "http://localhost:3000");
            assert_eq!(
                config.token.as_ref().unwrap().expose_secret().as_str(),
                "abcde"
            );
            assert!(!format!("{config:?}").contains("abcde"));
            assert_eq!(config.pacing, Duration::from_millis(250));
            assert_eq!(config.seed, Some(42));
            assert_eq!(config.thresholds.len(), 2);
            assert_eq!(config.thresholds[1].to_string(), "avg<300");

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            target: http://localhost:3000
            start_vus: 5
            stages:
              - duration: 10s
                target: 20
              - duration: 1m 30s
                target: 0
            thresholds:
              - p(90)<500
            graceful_stop: 5s
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(
                config.stages,
                vec![
                    Stage::new(Duration::from_secs(10), 20),
                    Stage::new(Duration::from_secs(90), 0),
                ]
            );
            let profile = config.profile().unwrap();
            assert_eq!(profile.start(), 5);
            assert_eq!(profile.duration(), Duration::from_secs(100));
            assert_eq!(config.thresholds[0].to_string(), "p(90)<500");
            assert_eq!(config.graceful_stop, Duration::from_secs(5));
            // untouched values keep their defaults
            assert_eq!(config.pacing, Duration::from_secs(1));

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(b"target: http://localhost:3000\n")
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("LOADTEST__TARGET", "http://localhost:9001");

            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.target, "http://localhost:9001");

            Ok(())
        });
    }

    #[test]
    fn rejects_malformed_values() {
        for (key, value) in [
            ("LOADTEST__PACING", "soon"),
            ("LOADTEST__START_VUS", "-1"),
            ("LOADTEST__THRESHOLDS", r#"["p(95)"]"#),
        ] {
            figment::Jail::expect_with(|jail| {
                jail.set_env(key, value);
                assert!(Config::load(None).is_err(), "{key}={value} should be rejected");
                Ok(())
            });
        }

        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(b"stages:\n  - duration: 10s\n    target: -3\n")
            .unwrap();
        figment::Jail::expect_with(|_jail| {
            assert!(Config::load(Some(tempfile.path())).is_err());
            Ok(())
        });
    }

    #[test]
    fn rejects_empty_profiles() {
        let config = Config {
            stages: vec![],
            ..Default::default()
        };
        assert!(matches!(config.profile(), Err(ConfigError::NoStages)));
    }

    #[tokio::test]
    async fn credential_sources() {
        let config = Config::default();
        assert!(config.credentials().await.is_ok());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "jwt").unwrap();
        let config = Config {
            token_file: Some(file.path().into()),
            ..Default::default()
        };
        assert!(config.credentials().await.is_ok());

        let config = Config {
            token: Some(SecretBox::new(Box::new(ConfigSecret::from("abc")))),
            token_file: Some(file.path().into()),
            ..Default::default()
        };
        assert!(matches!(
            config.credentials().await,
            Err(ConfigError::AmbiguousCredentials)
        ));

        let config = Config {
            token_file: Some("/nonexistent/token".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.credentials().await,
            Err(ConfigError::TokenFile { .. })
        ));

        let empty = tempfile::NamedTempFile::new().unwrap();
        let config = Config {
            token_file: Some(empty.path().into()),
            ..Default::default()
        };
        assert!(matches!(
            config.credentials().await,
            Err(ConfigError::TokenFile {
                cause: AuthError::Empty,
                ..
            })
        ));
    }
}
