//! Streamable HTTP JSON-RPC transport for UI clients.
//!
//! One endpoint, four methods: `ui.hello`, `ui.snapshot`, `ui.poll`,
//! `ui.response`. Session identity is a server-assigned id carried in the
//! `Mcp-Session-Id` header; hello binds `(session → ns, clientId, notifier)`.
//! A GET with the session header opens the session's event stream, which
//! turns the notifier live: commands are pushed as `ui.command` notifications
//! instead of waiting for the next poll. DELETE closes the session and
//! unregisters the client, unless a reconnected session already re-bound it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use uideck_protocol::jsonrpc::{self, ErrorObject, Notification};
use uideck_protocol::{new_id, RpcResponse};

use crate::hub::{CommandNotifier, Hub};
use crate::namespace::{namespace_from_token, DEFAULT_NAMESPACE};
use crate::websocket::is_local_request;
use crate::AppState;

pub const SESSION_HEADER: &str = "mcp-session-id";

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(20);
const NOTIFIER_BUFFER: usize = 32;

pub struct HttpBridge {
    hub: Arc<Hub>,
    sessions: Mutex<HashMap<String, HttpSession>>,
}

struct HttpSession {
    ns: String,
    client_id: String,
    notifier: CommandNotifier,
    /// Parked until a GET attaches the event stream
    stream: Option<mpsc::Receiver<Notification>>,
}

#[derive(Debug, Clone)]
struct SessionInfo {
    ns: String,
    client_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HelloParams {
    client_id: String,
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SnapshotParams {
    client_id: String,
    data: Option<Box<RawValue>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PollParams {
    client_id: String,
    timeout_ms: u64,
}

impl HttpBridge {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one JSON-RPC call. Returns the result (or error) plus the
    /// session id the response should advertise.
    pub async fn dispatch(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Option<&Value>,
    ) -> (Result<Value, ErrorObject>, Option<String>) {
        match method {
            "ui.hello" => self.handle_hello(session_id, params),
            "ui.snapshot" => (
                self.handle_snapshot(session_id, params),
                session_id.map(str::to_string),
            ),
            "ui.poll" => (
                self.handle_poll(session_id, params).await,
                session_id.map(str::to_string),
            ),
            "ui.response" => (
                self.handle_response(params),
                session_id.map(str::to_string),
            ),
            _ => (
                Err(ErrorObject::method_not_found("method not found")),
                session_id.map(str::to_string),
            ),
        }
    }

    fn handle_hello(
        &self,
        session_id: Option<&str>,
        params: Option<&Value>,
    ) -> (Result<Value, ErrorObject>, Option<String>) {
        let parsed: Result<HelloParams, ErrorObject> = parse_params(params);
        let p = match parsed {
            Ok(p) => p,
            Err(e) => return (Err(e), session_id.map(str::to_string)),
        };
        if p.client_id.is_empty() {
            return (
                Err(ErrorObject::invalid_params("clientId required")),
                session_id.map(str::to_string),
            );
        }
        if self.hub.require_token() && (p.token.is_empty() || p.token != self.hub.token()) {
            return (
                Err(ErrorObject::invalid_params("invalid token")),
                session_id.map(str::to_string),
            );
        }
        // The hello token carries the namespace here; there is no
        // Authorization header on the UI side of this transport.
        let ns = if p.token.is_empty() {
            DEFAULT_NAMESPACE.to_string()
        } else {
            namespace_from_token(&p.token)
        };

        let (sid, notifier) = {
            let mut sessions = self.sessions.lock().expect("session map poisoned");
            let sid = match session_id {
                Some(existing) if sessions.contains_key(existing) => existing.to_string(),
                _ => new_id(),
            };
            let session = sessions.entry(sid.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::channel(NOTIFIER_BUFFER);
                HttpSession {
                    ns: String::new(),
                    client_id: String::new(),
                    notifier: CommandNotifier::new(tx),
                    stream: Some(rx),
                }
            });
            session.ns = ns.clone();
            session.client_id = p.client_id.clone();
            (sid, session.notifier.clone())
        };

        self.hub.register_http_client(&ns, &p.client_id);
        self.hub.register_http_notifier(&ns, &p.client_id, notifier);
        info!(
            component = "http_rpc",
            event = "http.client.registered",
            namespace = %ns,
            client_id = %p.client_id,
            session_id = %sid,
            "UI client registered over HTTP"
        );
        (
            Ok(json!({"ok": true, "clientId": p.client_id})),
            Some(sid),
        )
    }

    fn handle_snapshot(
        &self,
        session_id: Option<&str>,
        params: Option<&Value>,
    ) -> Result<Value, ErrorObject> {
        let p: SnapshotParams = parse_params(params)?;
        let (ns, client_id) = self.resolve_target(session_id, &p.client_id);
        if client_id.is_empty() {
            return Err(ErrorObject::invalid_params("clientId required"));
        }
        let Some(data) = p.data.filter(|d| !d.get().is_empty() && d.get() != "null") else {
            return Err(ErrorObject::invalid_params("data required"));
        };
        self.hub.set_snapshot(&ns, &client_id, data);
        Ok(json!({"ok": true}))
    }

    async fn handle_poll(
        &self,
        session_id: Option<&str>,
        params: Option<&Value>,
    ) -> Result<Value, ErrorObject> {
        let p: PollParams = parse_params(params)?;
        let (ns, client_id) = self.resolve_target(session_id, &p.client_id);
        if client_id.is_empty() {
            return Err(ErrorObject::invalid_params("clientId required"));
        }
        let timeout = if p.timeout_ms > 0 {
            Duration::from_millis(p.timeout_ms)
        } else {
            DEFAULT_POLL_TIMEOUT
        };
        match self.hub.dequeue_command(&ns, &client_id, timeout).await {
            Some(req) => serde_json::to_value(&req)
                .map_err(|e| ErrorObject::internal(format!("encode command: {e}"))),
            // A drained timeout is an empty result, not an error.
            None => Ok(Value::Null),
        }
    }

    fn handle_response(&self, params: Option<&Value>) -> Result<Value, ErrorObject> {
        let resp: RpcResponse = parse_params(params)?;
        if resp.id.is_empty() {
            return Err(ErrorObject::invalid_params("id required"));
        }
        self.hub.deliver_response(resp);
        Ok(json!({"ok": true}))
    }

    /// Fall back to the session's binding for namespace and client id.
    fn resolve_target(&self, session_id: Option<&str>, client_id: &str) -> (String, String) {
        let info = self.session_info(session_id);
        let ns = info
            .as_ref()
            .map(|i| i.ns.clone())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let client_id = if client_id.is_empty() {
            info.map(|i| i.client_id).unwrap_or_default()
        } else {
            client_id.to_string()
        };
        (ns, client_id)
    }

    fn session_info(&self, session_id: Option<&str>) -> Option<SessionInfo> {
        let session_id = session_id?;
        let sessions = self.sessions.lock().expect("session map poisoned");
        sessions.get(session_id).map(|s| SessionInfo {
            ns: s.ns.clone(),
            client_id: s.client_id.clone(),
        })
    }

    /// Attach (or re-attach) the session's event stream, turning its
    /// notifier live. A fresh channel replaces a previously consumed one.
    fn attach_stream(&self, session_id: &str) -> Option<mpsc::Receiver<Notification>> {
        let (rx, rebind) = {
            let mut sessions = self.sessions.lock().expect("session map poisoned");
            let session = sessions.get_mut(session_id)?;
            match session.stream.take() {
                Some(rx) => {
                    session.notifier.attach();
                    (rx, None)
                }
                None => {
                    let (tx, rx) = mpsc::channel(NOTIFIER_BUFFER);
                    let notifier = CommandNotifier::new(tx);
                    notifier.attach();
                    session.notifier = notifier.clone();
                    (rx, Some((session.ns.clone(), session.client_id.clone(), notifier)))
                }
            }
        };
        if let Some((ns, client_id, notifier)) = rebind {
            self.hub.register_http_notifier(&ns, &client_id, notifier);
        }
        Some(rx)
    }

    /// Close a session: drop its binding and unregister the HTTP client if
    /// this session still owns it.
    pub fn close_session(&self, session_id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock().expect("session map poisoned");
            sessions.remove(session_id)
        };
        let Some(session) = removed else {
            return false;
        };
        self.hub
            .unregister_http_client(&session.ns, &session.client_id, session.notifier.id());
        info!(
            component = "http_rpc",
            event = "http.session.closed",
            session_id = %session_id,
            client_id = %session.client_id,
            "HTTP session closed"
        );
        true
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.sessions.lock().expect("session map poisoned").len()
    }
}

/// POST: one JSON-RPC request or notification per body.
pub async fn post_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(forbidden) = check_local(&state, remote, &headers) {
        return forbidden;
    }

    let request: jsonrpc::Request = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            let response = jsonrpc::Response::failure(
                Value::Null,
                ErrorObject::parse_error(format!("invalid request: {e}")),
            );
            return json_response(StatusCode::BAD_REQUEST, &response, None);
        }
    };

    let session_header = header_value(&headers, SESSION_HEADER);
    let (result, session_id) = state
        .http
        .dispatch(
            session_header.as_deref(),
            &request.method,
            request.params.as_ref(),
        )
        .await;

    if request.is_notification() {
        return StatusCode::ACCEPTED.into_response();
    }
    let id = request.id.unwrap_or(Value::Null);
    let response = match result {
        Ok(value) => jsonrpc::Response::success(id, value),
        Err(error) => jsonrpc::Response::failure(id, error),
    };
    json_response(StatusCode::OK, &response, session_id.as_deref())
}

/// GET: the session's server→client event stream.
pub async fn sse_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    if let Err(forbidden) = check_local(&state, remote, &headers) {
        return Err(forbidden);
    }
    let Some(session_id) = header_value(&headers, SESSION_HEADER) else {
        return Err((StatusCode::BAD_REQUEST, "session required").into_response());
    };
    let Some(rx) = state.http.attach_stream(&session_id) else {
        return Err((StatusCode::NOT_FOUND, "unknown session").into_response());
    };
    debug!(
        component = "http_rpc",
        event = "http.stream.attached",
        session_id = %session_id,
        "Event stream attached"
    );

    let stream = ReceiverStream::new(rx).filter_map(|note| {
        serde_json::to_string(&note)
            .ok()
            .map(|payload| Ok(Event::default().data(payload)))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// DELETE: close the session.
pub async fn close_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(forbidden) = check_local(&state, remote, &headers) {
        return forbidden;
    }
    let Some(session_id) = header_value(&headers, SESSION_HEADER) else {
        return (StatusCode::BAD_REQUEST, "session required").into_response();
    };
    if state.http.close_session(&session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, "unknown session").into_response()
    }
}

fn check_local(state: &AppState, remote: SocketAddr, headers: &HeaderMap) -> Result<(), Response> {
    let hub = state.service.hub();
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok());
    if hub.local_only() && !is_local_request(remote, host) {
        return Err(
            (StatusCode::FORBIDDEN, "forbidden: local connections only").into_response(),
        );
    }
    Ok(())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn json_response(
    status: StatusCode,
    response: &jsonrpc::Response,
    session_id: Option<&str>,
) -> Response {
    let mut http_response = (status, axum::Json(response)).into_response();
    if let Some(session_id) = session_id {
        if let Ok(value) = header::HeaderValue::from_str(session_id) {
            http_response
                .headers_mut()
                .insert(HeaderName::from_static(SESSION_HEADER), value);
        }
    }
    http_response
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<&Value>) -> Result<T, ErrorObject> {
    let params = params.cloned().unwrap_or_else(|| json!({}));
    serde_json::from_value(params).map_err(|_| ErrorObject::invalid_params("invalid params"))
}
