//! An in-process stand-in for the agreement generation service.
//!
//! ```
//! use loadtest_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/");
//!    // point the driver at the URL...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

/// The route the driver posts to.
pub const GENERATE_ROUTE: &str = "/agreement/generate";

/// A request received on [`GENERATE_ROUTE`].
#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    /// The parsed JSON body, or `Value::Null` if the body was not valid JSON.
    pub body: Value,
}

/// Builder for a [`TestServer`] with non-default behavior.
#[derive(Debug)]
pub struct TestServerBuilder {
    fail_first: usize,
    failure_status: StatusCode,
    delay: Duration,
}

impl TestServerBuilder {
    /// Responds to the first `count` requests with the failure status.
    pub fn fail_first(mut self, count: usize) -> Self {
        self.fail_first = count;
        self
    }

    /// The status used for failing responses, `500` by default.
    pub fn failure_status(mut self, status: u16) -> Self {
        self.failure_status = StatusCode::from_u16(status).unwrap();
        self
    }

    /// Delays every response by `delay`.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Binds to a random port on localhost and starts serving.
    pub async fn start(self) -> TestServer {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let shared = Arc::new(Shared {
            behavior: self,
            requests: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route(GENERATE_ROUTE, post(generate))
            .with_state(Arc::clone(&shared));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        TestServer {
            handle,
            socket,
            shared,
        }
    }
}

#[derive(Debug)]
struct Shared {
    behavior: TestServerBuilder,
    requests: Mutex<Vec<ReceivedRequest>>,
}

async fn generate(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let header = |name| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };

    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let valid = body.is_object();

    let index = {
        let mut requests = shared.requests.lock().unwrap();
        requests.push(ReceivedRequest {
            authorization: header(header::AUTHORIZATION),
            content_type: header(header::CONTENT_TYPE),
            body,
        });
        requests.len() - 1
    };

    let behavior = &shared.behavior;
    if !behavior.delay.is_zero() {
        tokio::time::sleep(behavior.delay).await;
    }

    if !valid {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid body"})));
    }
    if index < behavior.fail_first {
        return (behavior.failure_status, Json(json!({"error": "injected failure"})));
    }
    (StatusCode::OK, Json(json!({"agreement_id": index})))
}

/// An in-process test server for use in integration tests.
///
/// Accepts `POST /agreement/generate` and records every request it receives. The server listens
/// on a random available port on localhost and stops when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    shared: Arc<Shared>,
}

impl TestServer {
    /// Starts a server answering every request with `200 OK`.
    pub async fn new() -> Self {
        Self::builder().start().await
    }

    /// Returns a builder for a server that delays or fails requests.
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder {
            fail_first: 0,
            failure_status: StatusCode::INTERNAL_SERVER_ERROR,
            delay: Duration::ZERO,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.shared.requests.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Returns a URL on localhost where nothing is listening.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/")
}
