//! Core types shared across the protocol
//!
//! Snapshot, params, and result payloads are deliberately opaque
//! (`Box<RawValue>` / `Value`): the bridge routes them without interpreting
//! them, and only the tool layer decodes.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

/// Frame type for a UI client's hello message
pub const FRAME_HELLO: &str = "ui.hello";
/// Frame type for a UI client's snapshot message
pub const FRAME_SNAPSHOT: &str = "ui.snapshot";
/// Notification method used to push a command into an HTTP session
pub const METHOD_COMMAND: &str = "ui.command";

/// Client → server hello frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiHello {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
}

/// Client → server snapshot frame
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSnapshotFrame {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

/// Server → client command: one RPC request awaiting a correlated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Client → server response carrying the correlation id of its request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
}

/// Input for the `snapshot` primitive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiSnapshotInput {
    pub client_id: String,
}

/// Output of the `snapshot` primitive
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSnapshotOutput {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Box<RawValue>>,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<String>,
}

/// Input for the `command` primitive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiCommandInput {
    pub client_id: String,
    pub method: String,
    pub params: Option<Value>,
    pub timeout_ms: u64,
}

/// Output of the `command` primitive
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiCommandOutput {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
}

/// Input for the `wait` primitive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiWaitInput {
    pub client_id: String,
    pub timeout_ms: u64,
    pub wait_for_change: bool,
    pub predicate: Option<UiPredicate>,
    pub include_snapshot: bool,
}

/// Output of the `wait` primitive
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiWaitOutput {
    pub client_id: String,
    pub matched: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub changed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Box<RawValue>>,
}

/// A conjunction (`all`) and optional disjunction (`any`) of conditions
/// evaluated against a client's snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UiPredicate {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<UiCondition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<UiCondition>,
}

/// One path-keyed test. `path` is dot-separated; `#` maps over arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UiCondition {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub contains: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub regex: String,
}
