//! Dispatch of agreement requests to the system under test.
//!
//! The driver only talks to a [`Transport`], so payload generation and pacing can be exercised
//! without a network. [`HttpTransport`] is the implementation used for real runs.

use std::fmt::Debug;

use reqwest::StatusCode;
use secrecy::SecretString;
use thiserror::Error;

use crate::payload::AgreementRequest;

mod http;
#[cfg(test)]
pub(crate) mod in_memory;

pub use self::http::{GENERATE_PATH, HttpTransport};

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("loadtest/", env!("CARGO_PKG_VERSION"));

/// A type-erased [`Transport`] instance.
pub type BoxedTransport = Box<dyn Transport>;

/// Sends one agreement request and reports the response status.
#[async_trait::async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// Submits `request` with `token` as bearer credentials and waits for the response status.
    ///
    /// Any status is returned as `Ok`. Only failures to obtain a response at all are errors.
    async fn send(
        &self,
        request: &AgreementRequest,
        token: &SecretString,
    ) -> Result<StatusCode, TransportError>;
}

/// Failures to obtain a response from the target.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request body could not be serialized.
    #[error("failed to serialize request body")]
    Serialize(#[from] serde_json::Error),

    /// The request failed on the network level or timed out.
    #[error("request failed: {context}")]
    Request {
        /// The failure class: `timeout`, `connect`, `body` or `request`.
        context: &'static str,
        /// The client error.
        #[source]
        cause: reqwest::Error,
    },

    /// Any other failure specific to a transport implementation.
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// A short, stable label for grouping errors in the report.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Serialize(_) => "serialize",
            TransportError::Request { context, .. } => *context,
            TransportError::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(cause: reqwest::Error) -> Self {
        let context = if cause.is_timeout() {
            "timeout"
        } else if cause.is_connect() {
            "connect"
        } else if cause.is_body() || cause.is_decode() {
            "body"
        } else {
            "request"
        };
        TransportError::Request { context, cause }
    }
}
