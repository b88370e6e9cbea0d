//! Client registry and request routing.
//!
//! The hub owns every mutable map: connected clients, their latest snapshots,
//! snapshot watchers, per-client command queues, and the pending-call table.
//! Transports never touch this state directly; they hold their own socket or
//! notifier handle and go through hub methods. No lock is held across an await.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use serde_json::value::RawValue;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use uideck_protocol::jsonrpc::Notification;
use uideck_protocol::{RpcRequest, RpcResponse, METHOD_COMMAND};

use crate::config::Config;
use crate::namespace::DEFAULT_NAMESPACE;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_NOTIFIER_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot updates are fanned out over bounded channels; a slow subscriber
/// misses intermediate values rather than stalling the publisher.
const WATCHER_CAPACITY: usize = 8;

/// Errors surfaced to callers of [`Hub::call`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("no UI clients connected")]
    NoClients,
    #[error("ui client connection closed")]
    SocketClosed,
    #[error("timed out waiting for UI response")]
    Timeout,
}

/// Handle to a live websocket connection. Requests pushed here are written by
/// the connection's single writer task, which serializes frames per client.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    id: u64,
    tx: mpsc::Sender<RpcRequest>,
}

impl SocketHandle {
    pub fn new(tx: mpsc::Sender<RpcRequest>) -> Self {
        Self {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    async fn send(&self, req: RpcRequest) -> Result<(), CallError> {
        self.tx.send(req).await.map_err(|_| CallError::SocketClosed)
    }
}

/// Push capability for an HTTP-connected client: delivers `ui.command`
/// notifications into the session's event stream. Refuses until a stream is
/// attached so queued delivery can take over for poll-only clients.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    id: u64,
    attached: Arc<std::sync::atomic::AtomicBool>,
    tx: mpsc::Sender<Notification>,
}

impl CommandNotifier {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self {
            id: NEXT_NOTIFIER_ID.fetch_add(1, Ordering::Relaxed),
            attached: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the session's event stream as attached; notifications are
    /// deliverable from this point on.
    pub fn attach(&self) {
        self.attached.store(true, Ordering::Release);
    }

    fn notify(&self, req: &RpcRequest) -> Result<(), ()> {
        if !self.attached.load(Ordering::Acquire) {
            return Err(());
        }
        let params = json!({"id": req.id, "method": req.method, "params": req.params});
        let note = Notification::new(METHOD_COMMAND, params);
        self.tx.try_send(note).map_err(|_| ())
    }
}

#[derive(Default)]
struct CommandQueue {
    items: VecDeque<RpcRequest>,
    waiters: VecDeque<(u64, oneshot::Sender<RpcRequest>)>,
}

/// All per-client state under one key, so the maps cannot drift out of sync.
#[derive(Default)]
struct ClientRecord {
    /// True once the client completed hello on some transport.
    connected: bool,
    socket: Option<SocketHandle>,
    notifier: Option<CommandNotifier>,
    snapshot: Option<Arc<RawValue>>,
    queue: CommandQueue,
    watchers: HashMap<u64, mpsc::Sender<Arc<RawValue>>>,
}

impl ClientRecord {
    fn is_empty(&self) -> bool {
        !self.connected
            && self.socket.is_none()
            && self.notifier.is_none()
            && self.snapshot.is_none()
            && self.queue.items.is_empty()
            && self.queue.waiters.is_empty()
            && self.watchers.is_empty()
    }
}

type Registry = HashMap<String, HashMap<String, ClientRecord>>;

/// Cancels a snapshot subscription on drop. Dropping the guard removes the
/// watcher's sender from the registry, which closes the channel; doing so
/// twice is harmless.
pub struct WatcherGuard {
    registry: Weak<RwLock<Registry>>,
    ns: String,
    client_id: String,
    watcher_id: u64,
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.write().expect("hub registry poisoned");
            if let Some(record) = registry
                .get_mut(&self.ns)
                .and_then(|c| c.get_mut(&self.client_id))
            {
                record.watchers.remove(&self.watcher_id);
            }
            gc(&mut registry, &self.ns, &self.client_id);
        }
    }
}

pub struct Hub {
    token: String,
    require_token: bool,
    local_only: bool,
    allowed_origins: Vec<String>,

    registry: Arc<RwLock<Registry>>,
    pending: Mutex<HashMap<String, oneshot::Sender<RpcResponse>>>,

    next_command_seq: AtomicU64,
    next_watcher_id: AtomicU64,
    next_waiter_id: AtomicU64,
}

fn normalize_ns(ns: &str) -> &str {
    if ns.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        ns
    }
}

/// Drop a record (and its namespace) once nothing references it. Empty
/// queues may linger while they still hold items for a future reconnect.
fn gc(registry: &mut Registry, ns: &str, client_id: &str) {
    if let Some(clients) = registry.get_mut(ns) {
        if clients
            .get(client_id)
            .map(ClientRecord::is_empty)
            .unwrap_or(false)
        {
            clients.remove(client_id);
        }
        if clients.is_empty() {
            registry.remove(ns);
        }
    }
}

impl Hub {
    pub fn new(cfg: &Config) -> Self {
        let allowed_origins = cfg
            .allowed_origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        Self {
            token: cfg.token.clone(),
            require_token: cfg.require_token,
            local_only: cfg.local_only,
            allowed_origins,
            registry: Arc::new(RwLock::new(HashMap::new())),
            pending: Mutex::new(HashMap::new()),
            next_command_seq: AtomicU64::new(1),
            next_watcher_id: AtomicU64::new(1),
            next_waiter_id: AtomicU64::new(1),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn require_token(&self) -> bool {
        self.require_token
    }

    pub fn local_only(&self) -> bool {
        self.local_only
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    /// Store a client's latest snapshot and fan it out to every watcher.
    /// Fan-out never blocks: a full watcher misses this value.
    pub fn set_snapshot(&self, ns: &str, client_id: &str, data: Box<RawValue>) {
        let ns = normalize_ns(ns);
        if client_id.is_empty() || data.get().is_empty() {
            return;
        }
        let data: Arc<RawValue> = Arc::from(data);
        let mut registry = self.registry.write().expect("hub registry poisoned");
        let record = registry
            .entry(ns.to_string())
            .or_default()
            .entry(client_id.to_string())
            .or_default();
        record.snapshot = Some(data.clone());
        for watcher in record.watchers.values() {
            let _ = watcher.try_send(data.clone());
        }
    }

    pub fn snapshot(&self, ns: &str, client_id: &str) -> Option<Arc<RawValue>> {
        let registry = self.registry.read().expect("hub registry poisoned");
        registry.get(ns)?.get(client_id)?.snapshot.clone()
    }

    /// Connected client ids for a namespace, in no particular order.
    pub fn list_clients(&self, ns: &str) -> Vec<String> {
        let registry = self.registry.read().expect("hub registry poisoned");
        registry
            .get(ns)
            .map(|clients| {
                clients
                    .iter()
                    .filter(|(_, record)| record.connected)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Any one connected client of the namespace.
    pub fn default_client(&self, ns: &str) -> Option<String> {
        let registry = self.registry.read().expect("hub registry poisoned");
        registry.get(ns)?.iter().find_map(|(id, record)| {
            if record.connected {
                Some(id.clone())
            } else {
                None
            }
        })
    }

    /// Subscribe to snapshot updates for one client. The receiver observes
    /// updates in publish order but may miss intermediates under back-pressure.
    /// Dropping the guard cancels the subscription and closes the channel.
    pub fn subscribe_snapshots(
        &self,
        ns: &str,
        client_id: &str,
    ) -> (mpsc::Receiver<Arc<RawValue>>, WatcherGuard) {
        let ns = normalize_ns(ns);
        let (tx, rx) = mpsc::channel(WATCHER_CAPACITY);
        let watcher_id = self.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut registry = self.registry.write().expect("hub registry poisoned");
            registry
                .entry(ns.to_string())
                .or_default()
                .entry(client_id.to_string())
                .or_default()
                .watchers
                .insert(watcher_id, tx);
        }
        let guard = WatcherGuard {
            registry: Arc::downgrade(&self.registry),
            ns: ns.to_string(),
            client_id: client_id.to_string(),
            watcher_id,
        };
        (rx, guard)
    }

    /// Register a websocket-connected client.
    pub fn register_socket_client(&self, ns: &str, client_id: &str, socket: SocketHandle) {
        let ns = normalize_ns(ns);
        if client_id.is_empty() {
            return;
        }
        let mut registry = self.registry.write().expect("hub registry poisoned");
        let record = registry
            .entry(ns.to_string())
            .or_default()
            .entry(client_id.to_string())
            .or_default();
        record.connected = true;
        record.socket = Some(socket);
    }

    /// Tear down a websocket client. The socket id guards against a stale
    /// connection clobbering a reconnect that already re-registered.
    pub fn disconnect_socket(&self, ns: &str, client_id: &str, socket_id: u64) {
        let ns = normalize_ns(ns);
        let mut registry = self.registry.write().expect("hub registry poisoned");
        if let Some(record) = registry.get_mut(ns).and_then(|c| c.get_mut(client_id)) {
            if record.socket.as_ref().map(SocketHandle::id) == Some(socket_id) {
                record.socket = None;
                record.snapshot = None;
                record.connected = record.notifier.is_some();
            }
        }
        gc(&mut registry, ns, client_id);
    }

    /// Register an HTTP long-poll client (no socket, possibly no notifier yet).
    pub fn register_http_client(&self, ns: &str, client_id: &str) {
        let ns = normalize_ns(ns);
        if client_id.is_empty() {
            return;
        }
        let mut registry = self.registry.write().expect("hub registry poisoned");
        registry
            .entry(ns.to_string())
            .or_default()
            .entry(client_id.to_string())
            .or_default()
            .connected = true;
    }

    /// Install the push capability for an HTTP client, replacing any prior one.
    pub fn register_http_notifier(&self, ns: &str, client_id: &str, notifier: CommandNotifier) {
        let ns = normalize_ns(ns);
        if client_id.is_empty() {
            return;
        }
        let mut registry = self.registry.write().expect("hub registry poisoned");
        registry
            .entry(ns.to_string())
            .or_default()
            .entry(client_id.to_string())
            .or_default()
            .notifier = Some(notifier);
    }

    /// Tear down an HTTP client, but only if the closing session still owns
    /// the binding: a reconnected session's fresh notifier must survive.
    pub fn unregister_http_client(&self, ns: &str, client_id: &str, notifier_id: u64) {
        let ns = normalize_ns(ns);
        let mut registry = self.registry.write().expect("hub registry poisoned");
        if let Some(record) = registry.get_mut(ns).and_then(|c| c.get_mut(client_id)) {
            if record.notifier.as_ref().map(CommandNotifier::id) == Some(notifier_id) {
                record.notifier = None;
                record.snapshot = None;
                record.connected = record.socket.is_some();
            }
        }
        gc(&mut registry, ns, client_id);
    }

    /// Hand a request to the oldest poll waiter, or buffer it.
    pub fn enqueue_command(&self, ns: &str, client_id: &str, req: RpcRequest) {
        let ns = normalize_ns(ns);
        let mut registry = self.registry.write().expect("hub registry poisoned");
        let record = registry
            .entry(ns.to_string())
            .or_default()
            .entry(client_id.to_string())
            .or_default();
        let mut req = req;
        while let Some((_, waiter)) = record.queue.waiters.pop_front() {
            match waiter.send(req) {
                Ok(()) => return,
                // Waiter vanished between registration and delivery; try the next.
                Err(back) => req = back,
            }
        }
        record.queue.items.push_back(req);
    }

    /// Take the next queued request, waiting up to `timeout` for one to
    /// arrive. Returns `None` on timeout; the registered waiter is removed on
    /// every exit path, including cancellation.
    pub async fn dequeue_command(
        &self,
        ns: &str,
        client_id: &str,
        timeout: Duration,
    ) -> Option<RpcRequest> {
        let ns = normalize_ns(ns);
        let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut registry = self.registry.write().expect("hub registry poisoned");
            let record = registry
                .entry(ns.to_string())
                .or_default()
                .entry(client_id.to_string())
                .or_default();
            if let Some(req) = record.queue.items.pop_front() {
                return Some(req);
            }
            record.queue.waiters.push_back((waiter_id, tx));
        }

        struct WaiterCleanup<'a> {
            hub: &'a Hub,
            ns: &'a str,
            client_id: &'a str,
            waiter_id: u64,
            armed: bool,
        }
        impl Drop for WaiterCleanup<'_> {
            fn drop(&mut self) {
                if self.armed {
                    self.hub.remove_waiter(self.ns, self.client_id, self.waiter_id);
                }
            }
        }

        let mut cleanup = WaiterCleanup {
            hub: self,
            ns,
            client_id,
            waiter_id,
            armed: true,
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(req)) => {
                cleanup.armed = false;
                Some(req)
            }
            _ => None,
        }
    }

    fn remove_waiter(&self, ns: &str, client_id: &str, waiter_id: u64) {
        let mut registry = self.registry.write().expect("hub registry poisoned");
        if let Some(record) = registry.get_mut(ns).and_then(|c| c.get_mut(client_id)) {
            record.queue.waiters.retain(|(id, _)| *id != waiter_id);
        }
        gc(&mut registry, ns, client_id);
    }

    /// Resolve a pending call. The entry is removed before signalling, so a
    /// response arriving after cancellation is silently dropped, as is a
    /// response with an unknown or absent id.
    pub fn deliver_response(&self, resp: RpcResponse) {
        if resp.id.is_empty() {
            return;
        }
        let waiter = self
            .pending
            .lock()
            .expect("pending map poisoned")
            .remove(&resp.id);
        if let Some(tx) = waiter {
            let _ = tx.send(resp);
        }
    }

    /// Dispatch one RPC to a client and wait for its correlated response.
    ///
    /// Transport priority: live socket, then HTTP notifier, then the command
    /// queue (drained by `ui.poll`). A notifier refusal falls through to the
    /// queue; a socket write failure is surfaced after removing the pending
    /// entry. Cancellation or timeout likewise leaves no pending state behind.
    pub async fn call(
        &self,
        ns: &str,
        client_id: &str,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<RpcResponse, CallError> {
        let ns = normalize_ns(ns);
        let client_id = if client_id.is_empty() {
            self.default_client(ns).ok_or(CallError::NoClients)?
        } else {
            client_id.to_string()
        };

        let id = self.next_command_id(ns, &client_id);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id.clone(), tx);

        struct PendingCleanup<'a> {
            hub: &'a Hub,
            id: &'a str,
            armed: bool,
        }
        impl Drop for PendingCleanup<'_> {
            fn drop(&mut self) {
                if self.armed {
                    self.hub
                        .pending
                        .lock()
                        .expect("pending map poisoned")
                        .remove(self.id);
                }
            }
        }
        let mut cleanup = PendingCleanup {
            hub: self,
            id: &id,
            armed: true,
        };

        let (socket, notifier) = {
            let registry = self.registry.read().expect("hub registry poisoned");
            match registry.get(ns).and_then(|c| c.get(client_id.as_str())) {
                Some(record) => (record.socket.clone(), record.notifier.clone()),
                None => (None, None),
            }
        };

        let req = RpcRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        if let Some(socket) = socket {
            socket.send(req).await?;
        } else if let Some(notifier) = notifier {
            if notifier.notify(&req).is_err() {
                debug!(
                    component = "hub",
                    event = "hub.call.notify_refused",
                    namespace = %ns,
                    client_id = %client_id,
                    command_id = %id,
                    "Notifier refused command, falling back to queue"
                );
                self.enqueue_command(ns, &client_id, req);
            }
        } else {
            self.enqueue_command(ns, &client_id, req);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => {
                cleanup.armed = false;
                Ok(resp)
            }
            _ => Err(CallError::Timeout),
        }
    }

    /// Correlation ids only need to be unique among currently-pending calls;
    /// the counter keeps same-millisecond dispatches distinct.
    fn next_command_id(&self, ns: &str, client_id: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.next_command_seq.fetch_add(1, Ordering::Relaxed);
        format!("cmd_{ns}_{client_id}_{millis}_{seq}")
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending map poisoned").len()
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self, ns: &str, client_id: &str) -> usize {
        let registry = self.registry.read().expect("hub registry poisoned");
        registry
            .get(normalize_ns(ns))
            .and_then(|c| c.get(client_id))
            .map(|r| r.queue.waiters.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::value::RawValue;

    fn raw(text: &str) -> Box<RawValue> {
        RawValue::from_string(text.to_string()).expect("valid JSON")
    }

    fn test_hub() -> Arc<Hub> {
        Arc::new(Hub::new(&Config::default()))
    }

    fn socket_pair() -> (SocketHandle, mpsc::Receiver<RpcRequest>) {
        let (tx, rx) = mpsc::channel(8);
        (SocketHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn snapshot_read_after_write_returns_exact_bytes() {
        let hub = test_hub();
        hub.set_snapshot("default", "c1", raw(r#"{"ts":1}"#));
        let snap = hub.snapshot("default", "c1").expect("snapshot stored");
        assert_eq!(snap.get(), r#"{"ts":1}"#);
        assert!(hub.snapshot("default", "nobody").is_none());
    }

    #[tokio::test]
    async fn empty_inputs_are_ignored_by_set_snapshot() {
        let hub = test_hub();
        hub.set_snapshot("default", "", raw(r#"{"ts":1}"#));
        assert!(hub.list_clients("default").is_empty());
        assert!(hub.snapshot("default", "").is_none());
    }

    #[tokio::test]
    async fn default_client_and_listing_only_see_connected_clients() {
        let hub = test_hub();
        // A snapshot alone does not make a client: hello has not happened.
        hub.set_snapshot("default", "ghost", raw("{}"));
        assert_eq!(hub.default_client("default"), None);

        hub.register_http_client("default", "c1");
        assert_eq!(hub.default_client("default").as_deref(), Some("c1"));
        assert_eq!(hub.list_clients("default"), vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let hub = test_hub();
        hub.register_http_client("alice@x", "c1");
        hub.register_http_client("bob@x", "c1");
        hub.set_snapshot("alice@x", "c1", raw(r#"{"who":"alice"}"#));
        hub.set_snapshot("bob@x", "c1", raw(r#"{"who":"bob"}"#));

        assert_eq!(
            hub.snapshot("alice@x", "c1").expect("alice snapshot").get(),
            r#"{"who":"alice"}"#
        );
        assert_eq!(
            hub.snapshot("bob@x", "c1").expect("bob snapshot").get(),
            r#"{"who":"bob"}"#
        );
        assert_eq!(hub.default_client("alice@x").as_deref(), Some("c1"));
        assert_eq!(hub.list_clients("alice@x").len(), 1);
    }

    #[tokio::test]
    async fn cancelling_one_watcher_leaves_the_other_subscribed() {
        let hub = test_hub();
        let (mut rx_a, guard_a) = hub.subscribe_snapshots("default", "c1");
        let (mut rx_b, guard_b) = hub.subscribe_snapshots("default", "c1");

        hub.set_snapshot("default", "c1", raw(r#"{"n":1}"#));
        assert_eq!(rx_a.recv().await.expect("first update").get(), r#"{"n":1}"#);
        assert_eq!(rx_b.recv().await.expect("first update").get(), r#"{"n":1}"#);

        drop(guard_a);
        assert!(rx_a.recv().await.is_none(), "cancelled channel should close");

        hub.set_snapshot("default", "c1", raw(r#"{"n":2}"#));
        assert_eq!(
            rx_b.recv().await.expect("second update").get(),
            r#"{"n":2}"#
        );
        drop(guard_b);
    }

    #[tokio::test]
    async fn slow_watcher_drops_updates_instead_of_blocking() {
        let hub = test_hub();
        let (mut rx, _guard) = hub.subscribe_snapshots("default", "c1");
        for n in 0..20 {
            hub.set_snapshot("default", "c1", raw(&format!(r#"{{"n":{n}}}"#)));
        }
        // The channel buffers the first eight; later values were dropped.
        let mut received = 0;
        while let Ok(update) = rx.try_recv() {
            assert!(update.get().starts_with(r#"{"n":"#));
            received += 1;
        }
        assert_eq!(received, 8);
    }

    #[tokio::test]
    async fn enqueue_hands_to_waiter_and_dequeue_drains_buffer_first() {
        let hub = test_hub();
        let req = RpcRequest {
            id: "r1".into(),
            method: "ui.focus.set".into(),
            params: None,
        };
        hub.enqueue_command("default", "c2", req.clone());
        let got = hub
            .dequeue_command("default", "c2", Duration::from_millis(100))
            .await
            .expect("buffered item");
        assert_eq!(got.id, "r1");

        // Now the reverse order: waiter first, enqueue second.
        let hub2 = hub.clone();
        let poll = tokio::spawn(async move {
            hub2.dequeue_command("default", "c2", Duration::from_secs(2))
                .await
        });
        tokio::task::yield_now().await;
        hub.enqueue_command(
            "default",
            "c2",
            RpcRequest {
                id: "r2".into(),
                method: "ui.focus.set".into(),
                params: None,
            },
        );
        let got = poll.await.expect("join").expect("handed item");
        assert_eq!(got.id, "r2");
    }

    #[tokio::test]
    async fn timed_out_dequeue_removes_its_waiter() {
        let hub = test_hub();
        let got = hub
            .dequeue_command("default", "c1", Duration::from_millis(20))
            .await;
        assert!(got.is_none());
        assert_eq!(hub.waiter_count("default", "c1"), 0);
    }

    #[tokio::test]
    async fn call_with_no_clients_fails_fast() {
        let hub = test_hub();
        let err = hub
            .call("default", "", "ui.focus.set", None, Duration::from_secs(1))
            .await
            .expect_err("no clients");
        assert_eq!(err, CallError::NoClients);
        assert_eq!(err.to_string(), "no UI clients connected");
    }

    #[tokio::test]
    async fn call_round_trips_through_deliver_response() {
        let hub = test_hub();
        let (socket, mut sock_rx) = socket_pair();
        hub.register_socket_client("default", "c1", socket);

        let responder = {
            let hub = hub.clone();
            tokio::spawn(async move {
                let req = sock_rx.recv().await.expect("request on socket");
                assert_eq!(req.method, "ui.window.open");
                hub.deliver_response(RpcResponse {
                    id: req.id,
                    ok: true,
                    error: None,
                    result: Some(raw(r#"{"windowId":"W1"}"#)),
                });
            })
        };

        // Empty clientId infers the namespace's only client.
        let resp = hub
            .call(
                "default",
                "",
                "ui.window.open",
                Some(json!({"windowKey": "files"})),
                Duration::from_secs(2),
            )
            .await
            .expect("call resolves");
        assert!(resp.ok);
        assert_eq!(
            resp.result.expect("result payload").get(),
            r#"{"windowId":"W1"}"#
        );
        responder.await.expect("responder join");
        assert_eq!(hub.pending_len(), 0);
    }

    #[tokio::test]
    async fn call_timeout_removes_pending_entry() {
        let hub = test_hub();
        let (socket, _sock_rx) = socket_pair();
        hub.register_socket_client("default", "c1", socket);

        let err = hub
            .call(
                "default",
                "c1",
                "ui.focus.set",
                None,
                Duration::from_millis(30),
            )
            .await
            .expect_err("no responder");
        assert_eq!(err, CallError::Timeout);
        assert_eq!(hub.pending_len(), 0);
    }

    #[tokio::test]
    async fn call_on_dead_socket_cleans_up_and_errors() {
        let hub = test_hub();
        let (socket, sock_rx) = socket_pair();
        hub.register_socket_client("default", "c1", socket);
        drop(sock_rx);

        let err = hub
            .call(
                "default",
                "c1",
                "ui.focus.set",
                None,
                Duration::from_secs(1),
            )
            .await
            .expect_err("socket gone");
        assert_eq!(err, CallError::SocketClosed);
        assert_eq!(hub.pending_len(), 0);
    }

    #[tokio::test]
    async fn deliver_response_for_unknown_id_is_a_no_op() {
        let hub = test_hub();
        hub.deliver_response(RpcResponse {
            id: "cmd_default_c1_0_0".into(),
            ok: true,
            error: None,
            result: None,
        });
        hub.deliver_response(RpcResponse {
            id: String::new(),
            ok: false,
            error: Some("late".into()),
            result: None,
        });
        assert_eq!(hub.pending_len(), 0);
    }

    #[tokio::test]
    async fn command_ids_are_unique_within_a_burst() {
        let hub = test_hub();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            assert!(seen.insert(hub.next_command_id("default", "c1")));
        }
    }

    #[tokio::test]
    async fn long_poll_receives_call_for_pollonly_client() {
        let hub = test_hub();
        hub.register_http_client("default", "c2");

        let caller = {
            let hub = hub.clone();
            tokio::spawn(async move {
                hub.call(
                    "default",
                    "c2",
                    "ui.focus.set",
                    Some(json!({"controlId": "name"})),
                    Duration::from_secs(2),
                )
                .await
            })
        };
        tokio::task::yield_now().await;

        let req = hub
            .dequeue_command("default", "c2", Duration::from_secs(2))
            .await
            .expect("poll delivers request");
        assert_eq!(req.method, "ui.focus.set");

        hub.deliver_response(RpcResponse {
            id: req.id,
            ok: true,
            error: None,
            result: None,
        });
        let resp = caller.await.expect("join").expect("call resolves");
        assert!(resp.ok);
    }

    #[tokio::test]
    async fn unattached_notifier_falls_back_to_queue() {
        let hub = test_hub();
        let (tx, _rx) = mpsc::channel(4);
        let notifier = CommandNotifier::new(tx);
        hub.register_http_client("default", "c1");
        hub.register_http_notifier("default", "c1", notifier);

        let caller = {
            let hub = hub.clone();
            tokio::spawn(async move {
                hub.call(
                    "default",
                    "c1",
                    "ui.data.fetch",
                    None,
                    Duration::from_secs(2),
                )
                .await
            })
        };
        tokio::task::yield_now().await;

        let req = hub
            .dequeue_command("default", "c1", Duration::from_secs(2))
            .await
            .expect("queued despite notifier");
        hub.deliver_response(RpcResponse {
            id: req.id,
            ok: true,
            error: None,
            result: None,
        });
        assert!(caller.await.expect("join").expect("resolves").ok);
    }

    #[tokio::test]
    async fn attached_notifier_pushes_instead_of_queueing() {
        let hub = test_hub();
        let (tx, mut note_rx) = mpsc::channel(4);
        let notifier = CommandNotifier::new(tx);
        notifier.attach();
        hub.register_http_client("default", "c1");
        hub.register_http_notifier("default", "c1", notifier);

        let caller = {
            let hub = hub.clone();
            tokio::spawn(async move {
                hub.call(
                    "default",
                    "c1",
                    "ui.data.fetch",
                    None,
                    Duration::from_secs(2),
                )
                .await
            })
        };

        let note = note_rx.recv().await.expect("notification pushed");
        assert_eq!(note.method, METHOD_COMMAND);
        let params = note.params.expect("params");
        let id = params["id"].as_str().expect("command id").to_string();
        assert_eq!(params["method"], "ui.data.fetch");

        hub.deliver_response(RpcResponse {
            id,
            ok: true,
            error: None,
            result: None,
        });
        assert!(caller.await.expect("join").expect("resolves").ok);
    }

    #[tokio::test]
    async fn stale_http_unregister_keeps_fresh_binding() {
        let hub = test_hub();
        let (tx_old, _rx_old) = mpsc::channel(4);
        let old = CommandNotifier::new(tx_old);
        let old_id = old.id();
        hub.register_http_client("default", "c1");
        hub.register_http_notifier("default", "c1", old);

        // Reconnect installs a fresh notifier before the old session closes.
        let (tx_new, _rx_new) = mpsc::channel(4);
        let fresh = CommandNotifier::new(tx_new);
        hub.register_http_notifier("default", "c1", fresh);

        hub.unregister_http_client("default", "c1", old_id);
        assert_eq!(hub.default_client("default").as_deref(), Some("c1"));
    }
}
