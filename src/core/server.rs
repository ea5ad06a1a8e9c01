//! MCP Transport Server
//!
//! Streamable HTTP transport on a single endpoint path:
//! - `GET` opens the session's SSE stream
//! - `POST` submits a JSON-RPC message or batch
//! - `DELETE` ends a session
//! - `OPTIONS` answers CORS preflight
//!
//! Every request is first checked for a loopback peer and an acceptable
//! `Origin`. A keep-alive loop pings every open stream and prunes the
//! sessions whose peer went away.

use actix_web::{
    App, HttpRequest, HttpResponse, HttpResponseBuilder, HttpServer,
    dev::ServerHandle,
    http::{Method, StatusCode, header},
    middleware::{DefaultHeaders, Logger},
    web,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

use crate::core::dispatcher::{Dispatcher, RequestContext};
use crate::core::error::{Result, TransportError};
use crate::core::jsonrpc::{
    Incoming, Notification, Response, RpcError, names_method, parse_body, validate,
};
use crate::core::session::SessionRegistry;
use crate::core::sse::SseStream;
use crate::core::utils::{ServerConfig, normalize_path};

pub const HEADER_SESSION_ID: &str = "Mcp-Session-Id";
pub const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";
pub const JSON_MIME_TYPE: &str = "application/json";
const SESSION_QUERY_PARAM: &str = "sessionId";

/// Bounded wait for each piece of the transport during `stop()`.
const STOP_WAIT: Duration = Duration::from_secs(1);

/// State shared by every worker and the keep-alive loop.
pub struct TransportState {
    endpoint_path: String,
    endpoint_url: String,
    sessions: Arc<SessionRegistry>,
    /// session id -> open SSE stream
    streams: RwLock<HashMap<String, Arc<SseStream>>>,
    dispatcher: Dispatcher,
}

impl TransportState {
    pub fn new(
        endpoint_path: &str,
        endpoint_url: String,
        sessions: Arc<SessionRegistry>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            endpoint_path: normalize_path(endpoint_path),
            endpoint_url,
            sessions,
            streams: RwLock::new(HashMap::new()),
            dispatcher,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn stream(&self, session_id: &str) -> Option<Arc<SseStream>> {
        self.streams.read().get(session_id).cloned()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Bind `stream` to its session, disposing whatever stream it replaces.
    fn attach_stream(&self, stream: Arc<SseStream>) {
        let previous = self
            .streams
            .write()
            .insert(stream.session_id().to_string(), stream);
        if let Some(previous) = previous {
            tracing::info!(session_id = %previous.session_id(), "sse stream replaced");
            previous.dispose();
        }
    }

    /// Dispose the session's stream and invalidate the session. Returns
    /// whether the session existed.
    fn close_session(&self, session_id: &str) -> bool {
        if let Some(stream) = self.streams.write().remove(session_id) {
            stream.dispose();
        }
        self.sessions.invalidate(session_id)
    }

    /// Remove `stream` only if it is still the one bound to `session_id`, so a
    /// dead stream that was already replaced does not take the session down.
    fn prune(&self, session_id: &str, stream: &Arc<SseStream>) -> bool {
        let mut streams = self.streams.write();
        let current = streams
            .get(session_id)
            .is_some_and(|bound| Arc::ptr_eq(bound, stream));
        if !current {
            return false;
        }
        streams.remove(session_id);
        drop(streams);
        stream.dispose();
        self.sessions.invalidate(session_id);
        true
    }

    /// Writes go to a snapshot so the map lock is never held during I/O.
    fn snapshot(&self) -> Vec<(String, Arc<SseStream>)> {
        self.streams
            .read()
            .iter()
            .map(|(id, stream)| (id.clone(), Arc::clone(stream)))
            .collect()
    }

    /// One keep-alive pass. Returns how many sessions were pruned.
    pub fn keep_alive_tick(&self) -> usize {
        let mut pruned = 0;
        for (session_id, stream) in self.snapshot() {
            if stream.is_alive() && stream.send_keep_alive() {
                continue;
            }
            if self.prune(&session_id, &stream) {
                tracing::info!(session_id = %session_id, "sse peer gone, session invalidated");
                pruned += 1;
            }
        }
        pruned
    }

    /// Push a notification as a `message` event to every live stream.
    /// Returns how many streams accepted it.
    pub fn broadcast(&self, notification: &Notification) -> usize {
        let Ok(data) = serde_json::to_string(notification) else {
            return 0;
        };
        self.snapshot()
            .into_iter()
            .filter(|(_, stream)| stream.is_alive() && stream.send_event("message", &data))
            .count()
    }

    /// Push a notification to one session's stream.
    pub fn notify(&self, session_id: &str, notification: &Notification) -> bool {
        let Some(stream) = self.stream(session_id) else {
            return false;
        };
        match serde_json::to_string(notification) {
            Ok(data) => stream.send_event("message", &data),
            Err(_) => false,
        }
    }

    pub fn dispose_all(&self) {
        let streams: Vec<_> = self.streams.write().drain().map(|(_, s)| s).collect();
        for stream in streams {
            stream.dispose();
        }
    }
}

/// Result of validating the `Origin` header.
enum OriginCheck {
    Absent,
    Allowed(String),
    Rejected,
}

/// Accept `localhost`, loopback IPs, or the request's own host.
fn check_origin(req: &HttpRequest) -> OriginCheck {
    let Some(raw) = req.headers().get(header::ORIGIN) else {
        return OriginCheck::Absent;
    };
    let Ok(raw) = raw.to_str() else {
        return OriginCheck::Rejected;
    };
    let Ok(origin) = Url::parse(raw) else {
        return OriginCheck::Rejected;
    };

    let loopback = match origin.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };
    let same_host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| Url::parse(&format!("http://{h}")).ok())
        .is_some_and(|host| origin.host().is_some() && host.host() == origin.host());

    if loopback || same_host {
        OriginCheck::Allowed(raw.to_string())
    } else {
        OriginCheck::Rejected
    }
}

/// Whether the `Accept` header admits one of `wanted`. A missing header or a
/// wildcard counts as accepting.
fn accepts(req: &HttpRequest, wanted: &[&str]) -> bool {
    let Some(accept) = req.headers().get(header::ACCEPT).and_then(|h| h.to_str().ok()) else {
        return true;
    };
    accept
        .split(',')
        .map(|part| part.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .any(|media| {
            media == "*/*"
                || wanted.contains(&media.as_str())
                || media
                    .strip_suffix("/*")
                    .is_some_and(|kind| wanted.iter().any(|w| w.split('/').next() == Some(kind)))
        })
}

fn has_json_content_type(req: &HttpRequest) -> bool {
    match req.headers().get(header::CONTENT_TYPE) {
        None => true,
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.split(';').next())
            .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(JSON_MIME_TYPE)),
    }
}

/// Session id from the `Mcp-Session-Id` header, falling back to the
/// `sessionId` query parameter advertised in the `endpoint` event.
fn session_from(req: &HttpRequest) -> Option<String> {
    let from_header = req
        .headers()
        .get(HEADER_SESSION_ID)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    from_header.or_else(|| {
        url::form_urlencoded::parse(req.query_string().as_bytes())
            .find(|(key, value)| key == SESSION_QUERY_PARAM && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    })
}

/// Response builder carrying the CORS headers for a validated origin.
fn respond(status: StatusCode, origin: Option<&str>) -> HttpResponseBuilder {
    let mut builder = HttpResponse::build(status);
    if let Some(origin) = origin {
        builder
            .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, origin))
            .insert_header((header::VARY, "Origin"))
            .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, DELETE, OPTIONS"))
            .insert_header((
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                "Content-Type, Accept, Mcp-Session-Id",
            ))
            .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, HEADER_SESSION_ID));
    }
    builder
}

fn json_response<T: Serialize>(
    status: StatusCode,
    origin: Option<&str>,
    session_id: Option<&str>,
    body: &T,
) -> HttpResponse {
    let bytes = match serde_json::to_vec(body) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response");
            return respond(StatusCode::INTERNAL_SERVER_ERROR, origin).finish();
        }
    };
    let mut builder = respond(status, origin);
    if let Some(id) = session_id {
        builder.insert_header((HEADER_SESSION_ID, id));
    }
    builder.content_type(JSON_MIME_TYPE).body(bytes)
}

/// Entry point for every HTTP request reaching the server.
pub async fn handle_request(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<TransportState>,
) -> HttpResponse {
    let peer_is_loopback = req
        .peer_addr()
        .is_some_and(|addr| addr.ip().to_canonical().is_loopback());
    if !peer_is_loopback {
        tracing::warn!(peer = ?req.peer_addr(), "rejected non-loopback peer");
        return respond(StatusCode::FORBIDDEN, None).body("Forbidden - Localhost only");
    }

    let origin = match check_origin(&req) {
        OriginCheck::Absent => None,
        OriginCheck::Allowed(origin) => Some(origin),
        OriginCheck::Rejected => {
            tracing::warn!(origin = ?req.headers().get(header::ORIGIN), "rejected origin");
            return respond(StatusCode::FORBIDDEN, None).body("Forbidden - Origin not allowed");
        }
    };
    let origin = origin.as_deref();

    if req.method() == Method::OPTIONS {
        return respond(StatusCode::OK, origin).finish();
    }

    if normalize_path(req.path()) != state.endpoint_path {
        return respond(StatusCode::NOT_FOUND, origin).body("Not Found");
    }

    match *req.method() {
        Method::GET => handle_get(&req, &state, origin),
        Method::POST => handle_post(&req, &body, &state, origin).await,
        Method::DELETE => handle_delete(&req, &state, origin),
        _ => respond(StatusCode::METHOD_NOT_ALLOWED, origin)
            .insert_header((header::ALLOW, "GET, POST, DELETE, OPTIONS"))
            .body("Method Not Allowed"),
    }
}

/// Open (or reopen) the session's SSE stream. The response body stays open
/// for the lifetime of the stream.
fn handle_get(req: &HttpRequest, state: &TransportState, origin: Option<&str>) -> HttpResponse {
    if !accepts(req, &[EVENT_STREAM_MIME_TYPE]) {
        return respond(StatusCode::NOT_ACCEPTABLE, origin)
            .body("Not Acceptable - client must accept text/event-stream");
    }

    let session_id = match session_from(req) {
        Some(id) if state.sessions.is_valid(&id) => id,
        Some(id) => {
            tracing::debug!(session_id = %id, "sse requested for unknown session");
            return respond(StatusCode::NOT_FOUND, origin).body("Session not found");
        }
        None => state.sessions.create(),
    };

    let (stream, body) = SseStream::new(session_id.clone());
    let stream = Arc::new(stream);
    state.attach_stream(Arc::clone(&stream));

    stream.send_event(
        "endpoint",
        &format!("{}?{SESSION_QUERY_PARAM}={session_id}", state.endpoint_url),
    );
    stream.send_event(
        "info",
        &json!({ "status": "connected", "sessionId": session_id }).to_string(),
    );
    tracing::info!(session_id = %session_id, "sse stream opened");

    respond(StatusCode::OK, origin)
        .content_type(EVENT_STREAM_MIME_TYPE)
        // Disable caching to ensure clients always get fresh data
        .insert_header(header::CacheControl(vec![
            header::CacheDirective::NoCache,
            header::CacheDirective::NoStore,
        ]))
        // Disable nginx buffering for real-time streaming
        .insert_header(("x-accel-buffering", "no"))
        .insert_header((HEADER_SESSION_ID, session_id))
        .streaming(body)
}

/// Submit a JSON-RPC message or batch.
async fn handle_post(
    req: &HttpRequest,
    body: &[u8],
    state: &TransportState,
    origin: Option<&str>,
) -> HttpResponse {
    if !accepts(req, &[JSON_MIME_TYPE, EVENT_STREAM_MIME_TYPE]) {
        return respond(StatusCode::NOT_ACCEPTABLE, origin)
            .body("Not Acceptable - client must accept application/json or text/event-stream");
    }
    if !has_json_content_type(req) {
        return respond(StatusCode::UNSUPPORTED_MEDIA_TYPE, origin)
            .body("Unsupported Media Type - expected application/json");
    }

    let incoming = match parse_body(body) {
        Ok(incoming) => incoming,
        Err(parse_error) => {
            tracing::debug!("rejected malformed JSON body");
            return json_response(StatusCode::BAD_REQUEST, origin, None, &parse_error);
        }
    };

    let session_id = match session_from(req) {
        Some(id) if state.sessions.is_valid(&id) => Some(id),
        Some(id) => {
            let reply_id = match &incoming {
                Incoming::Single(value) => value.get("id").cloned().unwrap_or(Value::Null),
                Incoming::Batch(_) => Value::Null,
            };
            tracing::debug!(session_id = %id, "rejected post for invalid session");
            let error = Response::error(reply_id, RpcError::invalid_session(&id));
            return json_response(StatusCode::BAD_REQUEST, origin, None, &error);
        }
        None if wants_initialize(&incoming) => {
            let id = state.sessions.create();
            tracing::info!(session_id = %id, "session created by initialize");
            Some(id)
        }
        None => None,
    };
    let ctx = RequestContext {
        session_id: session_id.clone(),
    };
    let session_header = session_id.as_deref();

    match incoming {
        Incoming::Single(value) => match validate(value) {
            Ok(request) => match state.dispatcher.dispatch(request, &ctx).await {
                Some(response) => json_response(StatusCode::OK, origin, session_header, &response),
                None => no_content(origin, session_header),
            },
            Err((_, true)) => no_content(origin, session_header),
            Err((invalid, false)) => {
                json_response(StatusCode::BAD_REQUEST, origin, session_header, &invalid)
            }
        },
        Incoming::Batch(items) if items.is_empty() => {
            let error = Response::error(Value::Null, RpcError::invalid_request("Empty batch"));
            json_response(StatusCode::BAD_REQUEST, origin, session_header, &error)
        }
        Incoming::Batch(items) => {
            let replies = state.dispatcher.dispatch_batch(items, &ctx).await;
            if replies.is_empty() {
                no_content(origin, session_header)
            } else {
                json_response(StatusCode::OK, origin, session_header, &replies)
            }
        }
    }
}

/// Whether the body carries a well-formed `initialize` request. Messages that
/// fail validation never mint a session.
fn wants_initialize(incoming: &Incoming) -> bool {
    let is_initialize = |value: &Value| {
        names_method(value, "initialize") && validate(value.clone()).is_ok()
    };
    match incoming {
        Incoming::Single(value) => is_initialize(value),
        Incoming::Batch(items) => items.iter().any(is_initialize),
    }
}

fn no_content(origin: Option<&str>, session_id: Option<&str>) -> HttpResponse {
    let mut builder = respond(StatusCode::NO_CONTENT, origin);
    if let Some(id) = session_id {
        builder.insert_header((HEADER_SESSION_ID, id));
    }
    builder.finish()
}

/// End a session. Always 204, whether or not the session existed.
fn handle_delete(req: &HttpRequest, state: &TransportState, origin: Option<&str>) -> HttpResponse {
    let Some(session_id) = session_from(req) else {
        return respond(StatusCode::BAD_REQUEST, origin).body("Missing Mcp-Session-Id");
    };
    let existed = state.close_session(&session_id);
    tracing::info!(session_id = %session_id, existed, "session deleted");
    respond(StatusCode::NO_CONTENT, origin).finish()
}

async fn keep_alive_loop(state: Arc<TransportState>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let pruned = state.keep_alive_tick();
        if pruned > 0 {
            tracing::debug!(pruned, "keep-alive pruned dead streams");
        }
    }
}

struct Running {
    state: Arc<TransportState>,
    handle: ServerHandle,
    server_task: JoinHandle<std::io::Result<()>>,
    keep_alive_task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// The MCP HTTP+SSE transport.
///
/// `start` binds the listener and spawns the accept loop and the keep-alive
/// loop; `stop` tears both down with a bounded wait. Both must be called from
/// within a tokio runtime.
pub struct McpServer {
    config: ServerConfig,
    dispatcher: Dispatcher,
    sessions: Arc<SessionRegistry>,
    running: Mutex<Option<Running>>,
}

impl McpServer {
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher,
            sessions: Arc::new(SessionRegistry::new()),
            running: Mutex::new(None),
        }
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }

    /// Bind the listener and start serving. Returns the bound address, which
    /// differs from the configured one when port 0 was requested.
    ///
    /// # Configuration
    /// - Worker threads: from config (defaults to CPU count, max 16)
    /// - Max connections: 10,000 concurrent connections
    /// - Keep-alive: 30 seconds
    /// - Request timeout: 30 seconds
    /// - Disconnect timeout: 2 seconds
    pub fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(TransportError::AlreadyRunning);
        }

        let bind_addr = self.config.bind_addr();
        let listener =
            std::net::TcpListener::bind(bind_addr).map_err(|source| TransportError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let endpoint_url = format!("http://{local_addr}{}", self.config.endpoint_path);

        let state = Arc::new(TransportState::new(
            &self.config.endpoint_path,
            endpoint_url.clone(),
            Arc::clone(&self.sessions),
            self.dispatcher.clone(),
        ));
        let app_state = web::Data::from(Arc::clone(&state));

        let server = HttpServer::new(move || {
            App::new()
                .app_data(app_state.clone())
                // Add security headers to all responses
                .wrap(
                    DefaultHeaders::new()
                        .add(("X-Content-Type-Options", "nosniff"))
                        .add(("X-Frame-Options", "DENY"))
                        .add(("X-XSS-Protection", "1; mode=block")),
                )
                // Format: %r = request line, %s = status, %Dms = duration in milliseconds
                .wrap(Logger::new("%r %s %Dms"))
                .default_service(web::to(handle_request))
        })
        .workers(self.config.workers)
        .max_connections(10000)
        .max_connection_rate(1000)
        .keep_alive(Duration::from_secs(30))
        .client_request_timeout(Duration::from_secs(30))
        .client_disconnect_timeout(Duration::from_secs(2))
        .shutdown_timeout(STOP_WAIT.as_secs())
        .disable_signals()
        .listen(listener)?
        .run();

        let handle = server.handle();
        let server_task = tokio::spawn(server);
        let keep_alive_task = tokio::spawn(keep_alive_loop(
            Arc::clone(&state),
            self.config.keep_alive_interval,
        ));

        tracing::info!(
            endpoint = %endpoint_url,
            workers = self.config.workers,
            keep_alive_secs = self.config.keep_alive_interval.as_secs(),
            "transport started"
        );

        *running = Some(Running {
            state,
            handle,
            server_task,
            keep_alive_task,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Dispose every stream, stop the listener, join both loops, and drop all
    /// sessions. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        running.state.dispose_all();
        running.keep_alive_task.abort();

        if tokio::time::timeout(STOP_WAIT, running.handle.stop(true))
            .await
            .is_err()
        {
            tracing::warn!("listener did not stop within the wait window");
        }
        match tokio::time::timeout(STOP_WAIT, running.server_task).await {
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "accept loop exited with error"),
            Ok(Err(e)) if !e.is_cancelled() => tracing::error!(error = %e, "accept loop panicked"),
            Err(_) => tracing::warn!("accept loop did not finish within the wait window"),
            _ => {}
        }
        let _ = tokio::time::timeout(STOP_WAIT, running.keep_alive_task).await;

        self.sessions.clear_all();
        tracing::info!(addr = %running.local_addr, "transport stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// URL clients POST to, as advertised in the `endpoint` event.
    pub fn endpoint_url(&self) -> Option<String> {
        self.running
            .lock()
            .as_ref()
            .map(|r| r.state.endpoint_url.clone())
    }

    /// Push a JSON-RPC notification to every open stream.
    pub fn broadcast_notification(&self, method: &str, params: Option<Value>) -> usize {
        let Some(state) = self.running.lock().as_ref().map(|r| Arc::clone(&r.state)) else {
            return 0;
        };
        state.broadcast(&Notification::new(method, params))
    }

    /// Push a JSON-RPC notification to one session's stream.
    pub fn notify_session(&self, session_id: &str, method: &str, params: Option<Value>) -> bool {
        let Some(state) = self.running.lock().as_ref().map(|r| Arc::clone(&r.state)) else {
            return false;
        };
        state.notify(session_id, &Notification::new(method, params))
    }
}
