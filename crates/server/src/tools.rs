//! Tool catalog exposed to agents.
//!
//! Three primitives (`snapshot`, `command`, `wait`) plus typed convenience
//! tools. Each typed tool is a thin envelope: it assembles a params map,
//! dispatches the matching `ui.*` method through the command primitive, and
//! decodes the result into its typed output via a JSON round-trip.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{json, Value};
use thiserror::Error;

use uideck_protocol::{UiCommandInput, UiSnapshotInput, UiWaitInput};

use crate::service::{BridgeService, ServiceError};

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Name and one-line description of every registered tool, in catalog order.
pub const TOOLS: &[(&str, &str)] = &[
    ("snapshot", "Read a UI client's latest state snapshot"),
    ("command", "Send a raw ui.* command and wait for its response"),
    ("wait", "Block until a snapshot predicate matches or the UI changes"),
    ("window.open", "Open a window by key"),
    ("window.openDynamic", "Open a window from inline metadata"),
    ("window.activate", "Bring a window to the front"),
    ("window.close", "Close a window"),
    ("focus.set", "Focus a control"),
    ("focus.get", "Report the focused control"),
    ("control.setValue", "Set a control's value"),
    ("controls.list", "List visible controls"),
    ("controls.search", "Search visible controls"),
    ("filter.set", "Patch a data source filter"),
    ("data.fetch", "Refresh a data source"),
    ("table.selectRow", "Select a table row by index"),
    ("table.selectByKey", "Select a table row by key"),
    ("fileBrowser.openFolder", "Open a folder in the file browser"),
    ("fileBrowser.selectUri", "Select a file-browser entry by URI"),
    ("dialog.open", "Open a dialog"),
    ("dialog.close", "Close a dialog"),
    ("dialog.commit", "Commit a dialog's payload"),
    ("key.press", "Send one key event"),
    ("key.sequence", "Send a sequence of key events"),
];

pub struct ToolCatalog {
    service: Arc<BridgeService>,
}

impl ToolCatalog {
    pub fn new(service: Arc<BridgeService>) -> Self {
        Self { service }
    }

    /// Invoke a tool by name for the given namespace. The returned value is
    /// the result envelope: `{"text": …}` or `{"result": …}` depending on
    /// configuration.
    pub async fn call(&self, ns: &str, name: &str, args: Value) -> Result<Value, ToolCallError> {
        match name {
            "snapshot" => {
                let input: UiSnapshotInput = parse_args(args)?;
                let out = self.service.ui_snapshot(ns, &input);
                Ok(self.envelope(&out))
            }
            "command" => {
                let input: UiCommandInput = parse_args(args)?;
                let out = self.service.ui_command(ns, input).await?;
                Ok(self.envelope(&out))
            }
            "wait" => {
                let input: UiWaitInput = parse_args(args)?;
                let out = self
                    .service
                    .ui_wait(ns, &input)
                    .await
                    .map_err(ServiceError::from)?;
                Ok(self.envelope(&out))
            }
            "window.open" => {
                let input: WindowOpenInput = parse_args(args)?;
                let mut out = WindowOpenOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.window.open",
                    json!({
                        "windowKey": input.window_key,
                        "windowTitle": input.window_title,
                        "title": input.window_title,
                        "windowData": input.window_data,
                        "inTab": input.in_tab,
                        "parentKey": input.parent_key,
                        "parameters": input.parameters,
                        "options": input.options,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "window.openDynamic" => {
                let input: WindowOpenDynamicInput = parse_args(args)?;
                let mut out = WindowOpenDynamicOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.window.openDynamic",
                    json!({
                        "windowKey": input.window_key,
                        "windowTitle": input.window_title,
                        "title": input.window_title,
                        "windowData": input.window_data,
                        "inTab": input.in_tab,
                        "parentKey": input.parent_key,
                        "parameters": input.parameters,
                        "metadata": input.metadata,
                        "options": input.options,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "window.activate" => {
                let input: WindowIdInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.window.activate",
                    json!({"windowId": input.window_id}),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "window.close" => {
                let input: WindowIdInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.window.close",
                    json!({"windowId": input.window_id}),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "focus.set" => {
                let input: FocusSetInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.focus.set",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                        "controlId": input.control_id,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "focus.get" => {
                let input: CommonInput = parse_args(args)?;
                let mut out = FocusGetOutput::default();
                self.command_into(ns, &input, "ui.focus.get", json!({}), &mut out)
                    .await?;
                Ok(self.envelope(&out))
            }
            "control.setValue" => {
                let input: ControlSetValueInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.control.setValue",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                        "controlId": input.control_id,
                        "bindingPath": input.binding_path,
                        "dataField": input.data_field,
                        "scope": input.scope,
                        "value": input.value,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "controls.list" => {
                let input: ControlsListInput = parse_args(args)?;
                let mut out = ControlsListOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.controls.list",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "controls.search" => {
                let input: ControlsSearchInput = parse_args(args)?;
                let mut out = ControlsListOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.controls.search",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                        "query": input.query,
                        "limit": input.limit,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "filter.set" => {
                let input: FilterSetInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.filter.set",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                        "patch": input.patch,
                        "fetch": input.fetch,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "data.fetch" => {
                let input: DataFetchInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.data.fetch",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "table.selectRow" => {
                let input: TableSelectRowInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.table.selectRow",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                        "rowIndex": input.row_index,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "table.selectByKey" => {
                let input: TableSelectByKeyInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.table.selectByKey",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                        "key": input.key,
                        "uniqueKey": input.unique_key,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "fileBrowser.openFolder" => {
                let input: FileBrowserOpenFolderInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.fileBrowser.openFolder",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                        "uri": input.uri,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "fileBrowser.selectUri" => {
                let input: FileBrowserSelectUriInput = parse_args(args)?;
                let mut out = FileBrowserSelectUriOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.fileBrowser.selectUri",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                        "uri": input.uri,
                        "openParents": input.open_parents,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "dialog.open" => {
                let input: DialogOpenInput = parse_args(args)?;
                let mut out = DialogOpenOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.dialog.open",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                        "dialogId": input.dialog_id,
                        "args": input.args,
                        "options": input.options,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "dialog.close" => {
                let input: DialogCloseInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.dialog.close",
                    json!({
                        "windowId": input.window_id,
                        "dataSourceRef": input.data_source_ref,
                        "dialogId": input.dialog_id,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "dialog.commit" => {
                let input: DialogCommitInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.dialog.commit",
                    json!({
                        "windowId": input.window_id,
                        "dialogId": input.dialog_id,
                        "payload": input.payload,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "key.press" => {
                let input: KeyPressInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.key.press",
                    json!({
                        "key": input.key,
                        "ctrlKey": input.ctrl_key,
                        "shiftKey": input.shift_key,
                        "altKey": input.alt_key,
                        "metaKey": input.meta_key,
                        "type": input.kind,
                    }),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            "key.sequence" => {
                let input: KeySequenceInput = parse_args(args)?;
                let mut out = OkOutput::default();
                self.command_into(
                    ns,
                    &input.common,
                    "ui.key.sequence",
                    json!({"keys": input.keys}),
                    &mut out,
                )
                .await?;
                Ok(self.envelope(&out))
            }
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }

    /// Dispatch `method` through the command primitive and decode the result
    /// into `out`. A UI-reported failure decodes `{ok:false, error}` instead
    /// and is not an error here.
    async fn command_into<O>(
        &self,
        ns: &str,
        common: &CommonInput,
        method: &str,
        params: Value,
        out: &mut O,
    ) -> Result<(), ToolCallError>
    where
        O: DeserializeOwned,
    {
        let resp = self
            .service
            .ui_command(
                ns,
                UiCommandInput {
                    client_id: common.client_id.clone(),
                    method: method.to_string(),
                    params: Some(params),
                    timeout_ms: common.timeout_ms,
                },
            )
            .await?;
        if !resp.ok {
            let fallback = json!({"ok": false, "error": resp.error});
            if let Ok(decoded) = serde_json::from_value(fallback) {
                *out = decoded;
            }
            return Ok(());
        }
        let Some(result) = resp.result else {
            return Ok(());
        };
        *out = serde_json::from_str(result.get())
            .map_err(|e| ToolCallError::Invalid(format!("decode {method} result: {e}")))?;
        Ok(())
    }

    fn envelope(&self, out: &impl Serialize) -> Value {
        if self.service.use_text_payload() {
            let text = serde_json::to_string(out).unwrap_or_default();
            json!({"text": text})
        } else {
            json!({"result": serde_json::to_value(out).unwrap_or(Value::Null)})
        }
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolCallError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| ToolCallError::Invalid(format!("invalid params: {e}")))
}

// ---------------------------------------------------------------------------
// Typed tool input/output models
// ---------------------------------------------------------------------------

/// Fields shared by every typed tool: target client and per-call timeout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommonInput {
    pub client_id: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OkOutput {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowOpenInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_key: String,
    pub window_title: String,
    pub window_data: String,
    pub in_tab: Option<bool>,
    pub parent_key: String,
    pub parameters: Option<Value>,
    pub options: Option<Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowOpenOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub window_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowOpenDynamicInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_key: String,
    pub window_title: String,
    pub window_data: String,
    pub in_tab: Option<bool>,
    pub parent_key: String,
    pub parameters: Option<Value>,
    pub metadata: Option<Value>,
    pub options: Option<Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowOpenDynamicOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub window_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub window_key: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowIdInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FocusSetInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
    pub control_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlSetValueInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
    pub control_id: String,
    pub binding_path: String,
    pub data_field: String,
    pub scope: String,
    pub value: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSetInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
    pub patch: Option<Value>,
    pub fetch: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataFetchInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableSelectRowInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
    pub row_index: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UniqueKeyField {
    pub field: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub parameter: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableSelectByKeyInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
    pub key: String,
    pub unique_key: Vec<UniqueKeyField>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileBrowserOpenFolderInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
    pub uri: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileBrowserSelectUriInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
    pub uri: String,
    pub open_parents: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileBrowserSelectUriOutput {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node_path: Vec<i64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub requested: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogOpenInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
    pub dialog_id: String,
    pub args: Option<Value>,
    pub options: Option<Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogOpenOutput {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogCloseInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
    pub dialog_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogCommitInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub dialog_id: String,
    pub payload: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyPressInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub ctrl_key: bool,
    pub shift_key: bool,
    pub alt_key: bool,
    pub meta_key: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeySequenceInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub keys: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlsListInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlsSearchInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub window_id: String,
    pub data_source_ref: String,
    pub query: String,
    pub limit: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlInfo {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub window_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub data_source_ref: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub control_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub ts: i64,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlsListOutput {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<ControlInfo>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FocusGetOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focused: Option<ControlInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hub::SocketHandle;
    use serde_json::value::RawValue;
    use tokio::sync::mpsc;
    use uideck_protocol::RpcResponse;

    fn raw(text: &str) -> Box<RawValue> {
        RawValue::from_string(text.to_string()).expect("valid JSON")
    }

    fn catalog_with(cfg: Config) -> ToolCatalog {
        ToolCatalog::new(Arc::new(BridgeService::new(cfg)))
    }

    /// Register a socket client whose responder answers every request with
    /// the given response body.
    fn respond_with(
        catalog: &ToolCatalog,
        ok: bool,
        error: Option<&str>,
        result: Option<&str>,
    ) -> tokio::task::JoinHandle<Value> {
        let (tx, mut sock_rx) = mpsc::channel(4);
        catalog
            .service
            .hub()
            .register_socket_client("default", "c1", SocketHandle::new(tx));
        let hub = catalog.service.hub().clone();
        let error = error.map(str::to_string);
        let result = result.map(str::to_string);
        tokio::spawn(async move {
            let req = sock_rx.recv().await.expect("request");
            let params = req.params.clone().unwrap_or(Value::Null);
            hub.deliver_response(RpcResponse {
                id: req.id,
                ok,
                error,
                result: result.map(|r| raw(&r)),
            });
            params
        })
    }

    #[tokio::test]
    async fn text_envelope_wraps_output_as_json_string() {
        let catalog = catalog_with(Config::default());
        catalog.service.hub().register_http_client("default", "c1");
        catalog
            .service
            .hub()
            .set_snapshot("default", "c1", raw(r#"{"ts":1}"#));

        let envelope = catalog
            .call("default", "snapshot", Value::Null)
            .await
            .expect("snapshot tool");
        let text = envelope["text"].as_str().expect("text payload");
        let decoded: Value = serde_json::from_str(text).expect("payload is JSON");
        assert_eq!(decoded["clientId"], "c1");
        assert_eq!(decoded["connected"], true);
        assert_eq!(decoded["snapshot"], json!({"ts":1}));
    }

    #[tokio::test]
    async fn data_envelope_wraps_output_under_result() {
        let catalog = catalog_with(Config {
            use_data: true,
            ..Config::default()
        });
        catalog.service.hub().register_http_client("default", "c1");

        let envelope = catalog
            .call("default", "snapshot", json!({"clientId": "c1"}))
            .await
            .expect("snapshot tool");
        assert_eq!(envelope["result"]["clientId"], "c1");
        assert_eq!(envelope["result"]["connected"], false);
    }

    #[tokio::test]
    async fn window_open_builds_params_and_decodes_result() {
        let catalog = catalog_with(Config {
            use_data: true,
            ..Config::default()
        });
        let responder = respond_with(&catalog, true, None, Some(r#"{"windowId":"W9"}"#));

        let envelope = catalog
            .call(
                "default",
                "window.open",
                json!({"clientId": "c1", "windowKey": "files", "windowTitle": "Files"}),
            )
            .await
            .expect("tool call");
        assert_eq!(envelope["result"]["windowId"], "W9");

        let params = responder.await.expect("responder join");
        assert_eq!(params["windowKey"], "files");
        assert_eq!(params["windowTitle"], "Files");
        assert_eq!(params["title"], "Files");
    }

    #[tokio::test]
    async fn ui_failure_decodes_into_ok_false_output() {
        let catalog = catalog_with(Config {
            use_data: true,
            ..Config::default()
        });
        let responder = respond_with(&catalog, false, Some("no such window"), None);

        let envelope = catalog
            .call(
                "default",
                "window.close",
                json!({"clientId": "c1", "windowId": "W1"}),
            )
            .await
            .expect("tool call");
        assert_eq!(envelope["result"]["ok"], false);
        assert_eq!(envelope["result"]["error"], "no such window");
        responder.await.expect("responder join");
    }

    #[tokio::test]
    async fn key_press_forwards_modifiers() {
        let catalog = catalog_with(Config {
            use_data: true,
            ..Config::default()
        });
        let responder = respond_with(&catalog, true, None, Some(r#"{"ok":true}"#));

        catalog
            .call(
                "default",
                "key.press",
                json!({"clientId": "c1", "key": "Enter", "ctrlKey": true}),
            )
            .await
            .expect("tool call");
        let params = responder.await.expect("responder join");
        assert_eq!(params["key"], "Enter");
        assert_eq!(params["ctrlKey"], true);
        assert_eq!(params["shiftKey"], false);
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let catalog = catalog_with(Config::default());
        let err = catalog
            .call("default", "window.maximize", Value::Null)
            .await
            .expect_err("unknown tool");
        assert_eq!(err.to_string(), "unknown tool: window.maximize");
    }

    #[tokio::test]
    async fn catalog_names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for (name, _) in TOOLS {
            assert!(seen.insert(*name), "duplicate tool name {name}");
        }
    }
}
