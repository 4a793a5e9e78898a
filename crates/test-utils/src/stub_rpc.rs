//! A scripted stand-in for a node's JSON-RPC endpoint.
//!
//! Every request, whatever its path, is recorded and answered with the next scripted response.
use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    io,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::{net::TcpListener, task::JoinHandle, time};
use tracing::{debug, trace};

/// A response the stub sends back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubResponse {
    /// HTTP status code.
    pub status: u16,

    /// Raw response body.
    pub body: String,

    /// How long to wait before answering.
    pub delay: Option<Duration>,

    /// When set, the body is streamed with chunked transfer encoding in pieces of this size.
    pub chunk_size: Option<usize>,
}

impl StubResponse {
    /// A `200 OK` response with the given raw body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::status(200, body)
    }

    /// A `200 OK` response with a successful JSON-RPC envelope around `result`.
    pub fn result(result: Value) -> Self {
        Self::ok(json!({ "result": result, "id": 1, "error": null }).to_string())
    }

    /// A JSON-RPC error envelope sent with the given HTTP status, the way nodes report RPC errors.
    pub fn rpc_error(status: u16, code: i64, message: &str) -> Self {
        let body = json!({
            "result": null,
            "id": 1,
            "error": { "code": code, "message": message },
        });
        Self::status(status, body.to_string())
    }

    /// A response with an arbitrary status and raw body.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: None,
            chunk_size: None,
        }
    }

    /// Delays the response by `delay`.
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Streams the body in pieces of `chunk_size` bytes.
    pub const fn chunked(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

impl IntoResponse for StubResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = match self.chunk_size {
            Some(size) => {
                let chunks = self
                    .body
                    .as_bytes()
                    .chunks(size.max(1))
                    .map(|chunk| Ok::<_, Infallible>(Bytes::copy_from_slice(chunk)))
                    .collect::<Vec<_>>();
                Body::from_stream(futures::stream::iter(chunks))
            }
            None => Body::from(self.body),
        };

        (status, [(CONTENT_TYPE, "application/json")], body).into_response()
    }
}

/// A request received by the stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// HTTP method, e.g. `POST`.
    pub method: String,

    /// Request target.
    pub path: String,

    /// Headers with lower-cased names.
    pub headers: HashMap<String, String>,

    /// Raw request body.
    pub body: String,
}

impl RecordedRequest {
    /// Returns the value of the header called `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Parses the body as JSON, yielding [`Value::Null`] if it is not valid JSON.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    /// Returns the JSON-RPC method named in the body.
    pub fn rpc_method(&self) -> Option<String> {
        self.json()
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}

#[derive(Debug, Default)]
struct Script {
    routes: HashMap<String, StubResponse>,
    queue: VecDeque<StubResponse>,
    fallback: Option<StubResponse>,
    requests: Vec<RecordedRequest>,
}

impl Script {
    fn answer(&mut self, request: RecordedRequest) -> StubResponse {
        let routed = request
            .rpc_method()
            .and_then(|method| self.routes.get(&method).cloned());
        self.requests.push(request);

        routed
            .or_else(|| self.queue.pop_front())
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| StubResponse::status(404, ""))
    }
}

/// A stub JSON-RPC server bound to an ephemeral local port.
///
/// Responses are chosen in this order: a response registered for the request's RPC method with
/// [`StubRpcServer::respond_to`], the next queued one from [`StubRpcServer::enqueue`], the one set
/// with [`StubRpcServer::respond_always`], and finally an empty `404`.
#[derive(Debug)]
pub struct StubRpcServer {
    addr: SocketAddr,
    script: Arc<Mutex<Script>>,
    task: JoinHandle<()>,
}

impl StubRpcServer {
    /// Binds to `127.0.0.1` on a random port and starts serving.
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let script = Arc::new(Mutex::new(Script::default()));

        let app = Router::new().fallback(answer).with_state(script.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                debug!(%e, %addr, "stub rpc server stopped");
            }
        });

        Ok(Self { addr, script, task })
    }

    /// The address the server listens on.
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The host the server listens on.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// The port the server listens on.
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Queues `response` for the next request that has no method-specific response.
    pub fn enqueue(&self, response: StubResponse) {
        self.script.lock().queue.push_back(response);
    }

    /// Answers every request for the RPC `method` with `response`.
    pub fn respond_to(&self, method: &str, response: StubResponse) {
        self.script.lock().routes.insert(method.to_owned(), response);
    }

    /// Answers with `response` whenever nothing more specific is scripted.
    pub fn respond_always(&self, response: StubResponse) {
        self.script.lock().fallback = Some(response);
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script.lock().requests.clone()
    }

    /// The number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.script.lock().requests.len()
    }
}

impl Drop for StubRpcServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(
    State(script): State<Arc<Mutex<Script>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_owned(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_owned())))
            .collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    trace!(method = ?request.rpc_method(), "stub rpc server received request");

    let response = script.lock().answer(request);
    if let Some(delay) = response.delay {
        time::sleep(delay).await;
    }

    response.into_response()
}
