//! Agent-facing JSON-RPC endpoint.
//!
//! Exposes the tool catalog over a single POST route: `tools/list` and
//! `tools/call`. The caller's namespace comes from its `Authorization`
//! header, so agents holding different credentials drive disjoint client
//! fleets without further routing configuration.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use uideck_protocol::jsonrpc::{self, ErrorObject};

use crate::namespace::namespace_from_header;
use crate::service::ServiceError;
use crate::tools::{ToolCallError, ToolCatalog, TOOLS};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

pub async fn rpc_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let ns = namespace_from_header(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    );

    let request: jsonrpc::Request = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            let response = jsonrpc::Response::failure(
                Value::Null,
                ErrorObject::parse_error(format!("invalid request: {e}")),
            );
            return (StatusCode::BAD_REQUEST, axum::Json(response)).into_response();
        }
    };

    let result = handle_request(&state.catalog, &ns, &request).await;
    if request.is_notification() {
        return StatusCode::ACCEPTED.into_response();
    }
    let id = request.id.unwrap_or(Value::Null);
    let response = match result {
        Ok(value) => jsonrpc::Response::success(id, value),
        Err(error) => jsonrpc::Response::failure(id, error),
    };
    axum::Json(response).into_response()
}

async fn handle_request(
    catalog: &ToolCatalog,
    ns: &str,
    request: &jsonrpc::Request,
) -> Result<Value, ErrorObject> {
    match request.method.as_str() {
        "tools/list" => {
            let tools: Vec<Value> = TOOLS
                .iter()
                .map(|(name, description)| json!({"name": name, "description": description}))
                .collect();
            Ok(json!({"tools": tools}))
        }
        "tools/call" => {
            let params = request.params.clone().unwrap_or_else(|| json!({}));
            let params: ToolCallParams = serde_json::from_value(params)
                .map_err(|_| ErrorObject::invalid_params("invalid params"))?;
            debug!(
                component = "agent_rpc",
                event = "agent.tool.call",
                namespace = %ns,
                tool = %params.name,
                "Tool call"
            );
            let args = params.arguments.unwrap_or(Value::Null);
            catalog
                .call(ns, &params.name, args)
                .await
                .map_err(tool_error)
        }
        _ => Err(ErrorObject::method_not_found("method not found")),
    }
}

/// Tool failures surface as InvalidParams with the error's message; routing
/// and timeout failures from the bridge are ordinary tool errors here, not
/// transport faults.
fn tool_error(err: ToolCallError) -> ErrorObject {
    match err {
        ToolCallError::UnknownTool(name) => {
            ErrorObject::invalid_params(format!("unknown tool: {name}"))
        }
        ToolCallError::Invalid(message) => ErrorObject::invalid_params(message),
        ToolCallError::Service(ServiceError::MethodRequired) => {
            ErrorObject::invalid_params("method is required")
        }
        ToolCallError::Service(err) => ErrorObject::invalid_params(err.to_string()),
    }
}
