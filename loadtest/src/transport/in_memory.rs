//! In-memory transport for tests.
//!
//! Responses are produced locally after a configurable delay, which pairs with tokio's paused
//! clock to run long profiles instantly. The transport is [`Clone`] so tests can keep a handle for
//! inspection while the driver owns a boxed copy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use secrecy::SecretString;

use super::{Transport, TransportError};
use crate::payload::AgreementRequest;

type Responder = dyn Fn(usize) -> (Duration, Result<StatusCode, TransportError>) + Send + Sync;

#[derive(Clone)]
pub(crate) struct InMemoryTransport {
    responder: Arc<Responder>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<AgreementRequest>>>,
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

impl InMemoryTransport {
    /// Responds `200 OK` to every request after `latency`.
    pub fn ok(latency: Duration) -> Self {
        Self::with_responder(latency, |_| Ok(StatusCode::OK))
    }

    /// Responds with the result of `responder`, which receives the zero-based call index.
    pub fn with_responder(
        latency: Duration,
        responder: impl Fn(usize) -> Result<StatusCode, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self::scripted(move |call| (latency, responder(call)))
    }

    /// Waits for the delay returned by `script` before answering with its result.
    pub fn scripted(
        script: impl Fn(usize) -> (Duration, Result<StatusCode, TransportError>)
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(script),
            calls: Default::default(),
            requests: Default::default(),
        }
    }

    /// The number of requests sent so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// All requests sent so far.
    pub fn requests(&self) -> Vec<AgreementRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    async fn send(
        &self,
        request: &AgreementRequest,
        _token: &SecretString,
    ) -> Result<StatusCode, TransportError> {
        let index = self.calls.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().unwrap().push(request.clone());
        let (delay, result) = (self.responder)(index);
        tokio::time::sleep(delay).await;
        result
    }
}
