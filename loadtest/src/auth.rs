//! Bearer credentials attached to every request.
//!
//! The driver does not know how tokens are obtained. It asks a [`TokenProvider`] for the current
//! token before each request, which keeps token acquisition an external concern.

use std::fmt;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// A type-erased [`TokenProvider`] instance.
pub type BoxedTokenProvider = Box<dyn TokenProvider>;

/// Supplies the bearer token for outgoing requests.
#[async_trait::async_trait]
pub trait TokenProvider: fmt::Debug + Send + Sync + 'static {
    /// Returns the token to send with the next request.
    async fn token(&self) -> Result<SecretString, AuthError>;
}

/// Errors obtaining a bearer token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token file could not be read.
    #[error("failed to read token from {path:?}")]
    Io {
        /// The token file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        cause: std::io::Error,
    },

    /// The token source yielded no token.
    #[error("token is empty")]
    Empty,
}

/// A fixed token, such as a placeholder for targets that do not verify credentials.
pub struct StaticToken(SecretString);

impl StaticToken {
    /// Creates a provider that always returns `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticToken").field(&"[redacted]").finish()
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<SecretString, AuthError> {
        if self.0.expose_secret().is_empty() {
            return Err(AuthError::Empty);
        }
        Ok(SecretString::from(self.0.expose_secret().to_owned()))
    }
}

/// Reads the token from a file on every request.
///
/// This lets an external process refresh the token during long runs. Surrounding whitespace is
/// ignored.
#[derive(Debug)]
pub struct FileToken {
    path: PathBuf,
}

impl FileToken {
    /// Creates a provider reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this provider reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl TokenProvider for FileToken {
    async fn token(&self) -> Result<SecretString, AuthError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|cause| AuthError::Io {
                    path: self.path.clone(),
                    cause,
                })?;

        let token = contents.trim();
        if token.is_empty() {
            return Err(AuthError::Empty);
        }
        Ok(SecretString::from(token.to_owned()))
    }
}
