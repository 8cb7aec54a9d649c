//! Pure helper functions for request handling, extracted for testability.
//!
//! These are stateless functions with no async or session dependencies.

use serde::Serialize;
use serde_json::Value;

use crate::error::rpc_codes;
use crate::protocol::{
    Info, InitializeResult, JsonRpcResponse, RequestId, ServerCapabilities, ToolsCapability,
};
use crate::tools::{PROMPT_FOR_EMAIL, RETRIEVE_TOOLS};
use crate::{Error, Result};

/// Name reported in `serverInfo`
pub const SERVER_NAME: &str = "mcp-actionkit";

/// Extract the client protocol version from initialize params.
///
/// Returns `"2024-11-05"` when params are `None` or missing `protocolVersion`.
pub(crate) fn extract_client_version(params: Option<&Value>) -> &str {
    params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or("2024-11-05")
}

/// Build the `InitializeResult` for a negotiated protocol version.
pub(crate) fn build_initialize_result(negotiated_version: &str) -> InitializeResult {
    InitializeResult {
        protocol_version: negotiated_version.to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: true }),
        },
        server_info: Info {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("ActionKit MCP".to_string()),
        },
        instructions: Some(format!(
            "Integration tools become available after authentication. Call {PROMPT_FOR_EMAIL} \
             with the user's email, send them to the returned link, then call {RETRIEVE_TOOLS} \
             once they confirm."
        )),
    }
}

/// Extract a required, non-empty string argument.
pub(crate) fn extract_required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::InvalidRequest(format!("Missing '{key}' argument")))
}

/// Extract the tool name from `tools/call` params.
pub(crate) fn extract_tool_name(params: Option<&Value>) -> Result<&str> {
    params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| Error::InvalidRequest("Tool name is missing".to_string()))
}

/// Parse and validate tool invocation arguments.
///
/// Handles both JSON objects and stringified JSON objects (OpenAI-style).
/// Missing or `null` arguments are rejected.
pub(crate) fn parse_tool_arguments(params: Option<&Value>) -> Result<Value> {
    let mut arguments = match params.and_then(|p| p.get("arguments")) {
        None | Some(Value::Null) => {
            return Err(Error::InvalidRequest("No arguments provided".to_string()));
        }
        Some(arguments) => arguments.clone(),
    };

    // Accept OpenAI-style tool arguments passed as a JSON string.
    if let Value::String(raw) = &arguments {
        arguments = serde_json::from_str(raw).map_err(|e| {
            Error::InvalidRequest(format!("Invalid 'arguments' JSON string: {e}"))
        })?;
    }

    if !arguments.is_object() {
        return Err(Error::InvalidRequest(
            "Invalid 'arguments': expected object or JSON object string".to_string(),
        ));
    }

    Ok(arguments)
}

/// Extract a `RequestId` from a JSON value.
///
/// Supports string and integer ID values per JSON-RPC 2.0.
/// Returns `None` if the value is not a recognised ID type.
pub(crate) fn extract_request_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        _ => None,
    }
}

/// Check whether a method name represents a notification (no response expected).
pub(crate) fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

/// Parse a JSON-RPC request or notification.
///
/// Returns `(id, method, params)`; `id` is `None` for notifications.
#[allow(clippy::result_large_err)] // the error is the response sent back as-is
pub(crate) fn parse_request(
    value: &Value,
) -> std::result::Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    if !value.is_object() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Request must be a JSON object",
        ));
    }

    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    let id = value.get("id").and_then(extract_request_id);

    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method")
        })?;

    let params = value.get("params").cloned();

    if !is_notification_method(method) && id.is_none() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Missing id",
        ));
    }

    Ok((id, method.to_string(), params))
}

/// Serialize `result` into a success response.
pub(crate) fn success_response<T: Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(
            Some(id),
            rpc_codes::INTERNAL_ERROR,
            format!("Failed to serialize result: {e}"),
        ),
    }
}
