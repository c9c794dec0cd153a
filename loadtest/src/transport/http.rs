//! A [`Transport`] sending requests over HTTP.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};

use super::{Transport, TransportError, USER_AGENT};
use crate::error::ConfigError;
use crate::payload::AgreementRequest;

/// Path of the agreement generation endpoint, relative to the target base URL.
pub const GENERATE_PATH: &str = "agreement/generate";

/// Posts JSON agreement requests to `{target}/agreement/generate`.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Creates a transport for the given base URL.
    ///
    /// Every request is bounded by `timeout`, including connecting and reading the response.
    pub fn new(target: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let endpoint = endpoint_url(target)?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(ConfigError::Client)?;

        Ok(Self { client, endpoint })
    }

    /// The full URL requests are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn endpoint_url(target: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidTarget {
        url: target.to_owned(),
        reason,
    };

    let base = Url::parse(target).map_err(|err| invalid(err.to_string()))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https".into()));
    }

    let endpoint = format!("{}/{GENERATE_PATH}", base.as_str().trim_end_matches('/'));
    Url::parse(&endpoint).map_err(|err| invalid(err.to_string()))
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &AgreementRequest,
        token: &SecretString,
    ) -> Result<StatusCode, TransportError> {
        let mut authorization = HeaderValue::try_from(format!("Bearer {}", token.expose_secret()))
            .map_err(|_| TransportError::Other("token is not a valid header value".into()))?;
        authorization.set_sensitive(true);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, "application/json")
            .body(request.to_json()?)
            .send()
            .await?;

        let status = response.status();
        // Drain the body so the connection can be reused.
        response.bytes().await?;

        Ok(status)
    }
}
