//! WebSocket transport for UI clients.
//!
//! One connection per UI instance: it introduces itself with `ui.hello`,
//! streams `ui.snapshot` frames, and answers server-issued commands with
//! id-correlated response frames. The namespace is fixed at upgrade time from
//! the request's `Authorization` header — the in-hello token only gates
//! admission.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use uideck_protocol::{
    RpcRequest, RpcResponse, UiHello, UiSnapshotFrame, FRAME_HELLO, FRAME_SNAPSHOT,
};

use crate::hub::{Hub, SocketHandle};
use crate::namespace::namespace_from_header;
use crate::AppState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Frames queued for the connection's single writer task.
enum OutboundFrame {
    /// A server-issued command awaiting an id-correlated response
    Request(RpcRequest),
    /// Raw pong reply
    Pong(Bytes),
    /// Policy-violation close with reason
    Close(&'static str),
}

/// What the read loop should do after a frame is processed.
enum FrameOutcome {
    Continue,
    Close(&'static str),
}

/// Per-connection state accumulated across frames.
struct ConnState {
    conn_id: u64,
    ns: String,
    /// Set once hello succeeds, along with the hub-side handle id
    registered: Option<(String, u64)>,
    rpc_tx: mpsc::Sender<RpcRequest>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let hub = state.service.hub().clone();
    if hub.local_only() && !is_local_request(remote, header_str(&headers, header::HOST)) {
        return (StatusCode::FORBIDDEN, "forbidden: local connections only").into_response();
    }
    if !origin_allowed(hub.allowed_origins(), header_str(&headers, header::ORIGIN)) {
        return (StatusCode::FORBIDDEN, "forbidden: origin not allowed").into_response();
    }
    let ns = namespace_from_header(header_str(&headers, header::AUTHORIZATION));
    ws.on_upgrade(move |socket| handle_socket(socket, hub, ns))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, ns: String) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        namespace = %ns,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(64);
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let result = match frame {
                OutboundFrame::Request(req) => match serde_json::to_string(&req) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        warn!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize command frame"
                        );
                        continue;
                    }
                },
                OutboundFrame::Pong(data) => ws_tx.send(Message::Pong(data)).await,
                OutboundFrame::Close(reason) => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    // Commands from the hub share the connection's writer with pongs and
    // closes, so per-client frame ordering falls out of the single writer.
    let (rpc_tx, mut rpc_rx) = mpsc::channel::<RpcRequest>(32);
    let forward_tx = outbound_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(req) = rpc_rx.recv().await {
            if forward_tx.send(OutboundFrame::Request(req)).await.is_err() {
                break;
            }
        }
    });

    let mut conn = ConnState {
        conn_id,
        ns,
        registered: None,
        rpc_tx,
    };

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundFrame::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        match process_frame(&hub, &mut conn, text.as_str()) {
            FrameOutcome::Continue => {}
            FrameOutcome::Close(reason) => {
                let _ = outbound_tx.send(OutboundFrame::Close(reason)).await;
                break;
            }
        }
    }

    if let Some((client_id, socket_id)) = &conn.registered {
        hub.disconnect_socket(&conn.ns, client_id, *socket_id);
    }
    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        client_id = ?conn.registered.as_ref().map(|(id, _)| id),
        "WebSocket connection closed"
    );
    forward_task.abort();
    send_task.abort();
}

/// Dispatch one inbound frame. Pre-hello frames other than `ui.hello` are
/// tolerated and ignored; malformed JSON is dropped silently.
fn process_frame(hub: &Arc<Hub>, conn: &mut ConnState, text: &str) -> FrameOutcome {
    let envelope: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(
                component = "websocket",
                event = "ws.message.parse_failed",
                connection_id = conn.conn_id,
                error = %e,
                "Dropping unparseable frame"
            );
            return FrameOutcome::Continue;
        }
    };
    let frame_type = envelope.get("type").and_then(|t| t.as_str()).unwrap_or("");

    if frame_type == FRAME_HELLO {
        let hello: UiHello = match serde_json::from_str(text) {
            Ok(hello) => hello,
            Err(_) => return FrameOutcome::Continue,
        };
        if hello.client_id.is_empty() {
            return FrameOutcome::Continue;
        }
        if hub.require_token() {
            if hub.token().trim().is_empty() {
                return FrameOutcome::Close("server token required");
            }
            if hello.token != hub.token() {
                return FrameOutcome::Close("invalid token");
            }
        }
        let handle = SocketHandle::new(conn.rpc_tx.clone());
        let socket_id = handle.id();
        hub.register_socket_client(&conn.ns, &hello.client_id, handle);
        info!(
            component = "websocket",
            event = "ws.client.registered",
            connection_id = conn.conn_id,
            namespace = %conn.ns,
            client_id = %hello.client_id,
            "UI client registered"
        );
        conn.registered = Some((hello.client_id, socket_id));
        return FrameOutcome::Continue;
    }

    if conn.registered.is_none() {
        return FrameOutcome::Continue;
    }

    match frame_type {
        FRAME_SNAPSHOT => {
            let frame: UiSnapshotFrame = match serde_json::from_str(text) {
                Ok(frame) => frame,
                Err(_) => return FrameOutcome::Continue,
            };
            let Some(data) = frame.data else {
                return FrameOutcome::Continue;
            };
            if frame.client_id.is_empty() {
                return FrameOutcome::Continue;
            }
            hub.set_snapshot(&conn.ns, &frame.client_id, data);
        }
        "" => {
            let has_id = envelope
                .get("id")
                .and_then(|id| id.as_str())
                .map(|id| !id.is_empty())
                .unwrap_or(false);
            if !has_id {
                return FrameOutcome::Continue;
            }
            if let Ok(resp) = serde_json::from_str::<RpcResponse>(text) {
                hub.deliver_response(resp);
            }
        }
        other => {
            debug!(
                component = "websocket",
                event = "ws.message.ignored",
                connection_id = conn.conn_id,
                frame_type = %other,
                "Ignoring unknown frame type"
            );
        }
    }
    FrameOutcome::Continue
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Loopback remote plus a localhost Host header.
pub(crate) fn is_local_request(remote: SocketAddr, host: Option<&str>) -> bool {
    if !remote.ip().is_loopback() {
        return false;
    }
    let Some(host) = host else {
        return false;
    };
    let host = host.trim().to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }
    let hostname = strip_port(&host);
    hostname == "localhost" || hostname == "127.0.0.1" || hostname == "::1"
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 hosts keep their colons.
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) && !name.contains(':') => {
            name
        }
        _ => host,
    }
}

/// Empty origins pass; an explicit allow-list matches exactly; otherwise only
/// loopback hostnames are accepted.
fn origin_allowed(allow: &[String], origin: Option<&str>) -> bool {
    let origin = origin.unwrap_or("").trim();
    if origin.is_empty() {
        return true;
    }
    if !allow.is_empty() {
        return allow.iter().any(|allowed| allowed == origin);
    }
    let Some(hostname) = origin_hostname(origin) else {
        return false;
    };
    hostname == "localhost" || hostname == "127.0.0.1" || hostname == "::1"
}

fn origin_hostname(origin: &str) -> Option<String> {
    let rest = origin.split_once("://").map(|(_, rest)| rest)?;
    let authority = rest.split('/').next().unwrap_or(rest);
    Some(strip_port(&authority.to_ascii_lowercase()).to_string())
}
