//! Agent-facing bridge operations: the `snapshot`, `command`, and `wait`
//! primitives every tool is built on. Namespaces are resolved by the calling
//! transport and passed in; the service itself is tenant-agnostic.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use uideck_protocol::{UiCommandInput, UiCommandOutput, UiSnapshotInput, UiSnapshotOutput};

use crate::config::Config;
use crate::hub::{CallError, Hub};
use crate::wait::PredicateError;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("method is required")]
    MethodRequired,
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Predicate(#[from] PredicateError),
}

pub struct BridgeService {
    hub: Arc<Hub>,
    use_data: bool,
}

impl BridgeService {
    pub fn new(cfg: Config) -> Self {
        Self {
            hub: Arc::new(Hub::new(&cfg)),
            use_data: cfg.use_data,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Whether tool results are wrapped as JSON text rather than structured
    /// objects.
    pub fn use_text_payload(&self) -> bool {
        !self.use_data
    }

    /// Report a client's latest snapshot along with the namespace's roster.
    pub fn ui_snapshot(&self, ns: &str, input: &UiSnapshotInput) -> UiSnapshotOutput {
        let clients = self.hub.list_clients(ns);
        let client_id = if input.client_id.is_empty() {
            self.hub.default_client(ns).unwrap_or_default()
        } else {
            input.client_id.clone()
        };
        if client_id.is_empty() {
            return UiSnapshotOutput {
                client_id,
                snapshot: None,
                connected: false,
                clients,
            };
        }
        let snapshot = self
            .hub
            .snapshot(ns, &client_id)
            .map(|raw| raw.as_ref().to_owned());
        UiSnapshotOutput {
            client_id,
            connected: snapshot.is_some(),
            snapshot,
            clients,
        }
    }

    /// Dispatch one RPC to a client and wait for its response. A UI-reported
    /// failure (`ok == false`) is an ordinary output, not an error.
    pub async fn ui_command(
        &self,
        ns: &str,
        input: UiCommandInput,
    ) -> Result<UiCommandOutput, ServiceError> {
        if input.method.is_empty() {
            return Err(ServiceError::MethodRequired);
        }
        let timeout = if input.timeout_ms > 0 {
            Duration::from_millis(input.timeout_ms)
        } else {
            DEFAULT_COMMAND_TIMEOUT
        };

        debug!(
            component = "service",
            event = "service.command.dispatch",
            namespace = %ns,
            client_id = %input.client_id,
            method = %input.method,
            "Dispatching UI command"
        );
        let resp = self
            .hub
            .call(ns, &input.client_id, &input.method, input.params, timeout)
            .await?;
        Ok(UiCommandOutput {
            client_id: input.client_id,
            id: resp.id,
            ok: resp.ok,
            error: resp.error,
            result: resp.result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serde_json::value::RawValue;
    use tokio::sync::mpsc;
    use uideck_protocol::RpcResponse;

    use crate::hub::SocketHandle;

    fn raw(text: &str) -> Box<RawValue> {
        RawValue::from_string(text.to_string()).expect("valid JSON")
    }

    #[tokio::test]
    async fn snapshot_reports_roster_and_connection_state() {
        let svc = BridgeService::new(Config::default());
        let out = svc.ui_snapshot("default", &UiSnapshotInput::default());
        assert!(!out.connected);
        assert!(out.clients.is_empty());

        svc.hub().register_http_client("default", "c1");
        svc.hub().set_snapshot("default", "c1", raw(r#"{"ts":1}"#));
        let out = svc.ui_snapshot("default", &UiSnapshotInput::default());
        assert_eq!(out.client_id, "c1");
        assert!(out.connected);
        assert_eq!(out.clients, vec!["c1".to_string()]);
        assert_eq!(out.snapshot.expect("snapshot").get(), r#"{"ts":1}"#);
    }

    #[tokio::test]
    async fn command_requires_a_method() {
        let svc = BridgeService::new(Config::default());
        let err = svc
            .ui_command("default", UiCommandInput::default())
            .await
            .expect_err("missing method");
        assert_eq!(err.to_string(), "method is required");
    }

    #[tokio::test]
    async fn empty_client_id_infers_the_only_client() {
        let svc = BridgeService::new(Config::default());
        let (tx, mut sock_rx) = mpsc::channel(4);
        svc.hub()
            .register_socket_client("default", "c1", SocketHandle::new(tx));

        let responder = {
            let hub = svc.hub().clone();
            tokio::spawn(async move {
                let req = sock_rx.recv().await.expect("dispatched to c1");
                hub.deliver_response(RpcResponse {
                    id: req.id,
                    ok: true,
                    error: None,
                    result: None,
                });
            })
        };

        let out = svc
            .ui_command(
                "default",
                UiCommandInput {
                    method: "ui.focus.set".to_string(),
                    params: Some(json!({"controlId": "name"})),
                    ..UiCommandInput::default()
                },
            )
            .await
            .expect("command resolves");
        assert!(out.ok);
        responder.await.expect("responder join");
    }

    #[tokio::test]
    async fn ui_reported_failure_is_not_an_error() {
        let svc = BridgeService::new(Config::default());
        let (tx, mut sock_rx) = mpsc::channel(4);
        svc.hub()
            .register_socket_client("default", "c1", SocketHandle::new(tx));

        let responder = {
            let hub = svc.hub().clone();
            tokio::spawn(async move {
                let req = sock_rx.recv().await.expect("request");
                hub.deliver_response(RpcResponse {
                    id: req.id,
                    ok: false,
                    error: Some("window not found".to_string()),
                    result: None,
                });
            })
        };

        let out = svc
            .ui_command(
                "default",
                UiCommandInput {
                    client_id: "c1".to_string(),
                    method: "ui.window.close".to_string(),
                    ..UiCommandInput::default()
                },
            )
            .await
            .expect("command resolves");
        assert!(!out.ok);
        assert_eq!(out.error.as_deref(), Some("window not found"));
        responder.await.expect("responder join");
    }
}
