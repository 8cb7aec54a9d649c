//! JSON-RPC method dispatch for one session
//!
//! Transport-agnostic: stdio and HTTP both hand parsed messages to
//! [`handle_value`] and write back whatever response it produces. Tool call
//! failures never escape as JSON-RPC errors; they are folded into the
//! `isError` envelope so the model sees a readable message.

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::helpers::{
    build_initialize_result, extract_client_version, extract_tool_name, is_notification_method,
    parse_request, parse_tool_arguments, success_response,
};
use super::session::{CallOutcome, Session};
use crate::Result;
use crate::error::rpc_codes;
use crate::protocol::{
    JsonRpcResponse, RequestId, ToolsCallResult, ToolsListResult, negotiate_version,
};

/// Method name of the tool list change notification
pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

/// Result of handling one incoming message
#[derive(Debug)]
pub struct Dispatch {
    /// Response to send back; `None` for notifications
    pub response: Option<JsonRpcResponse>,
    /// The session's tool list changed while handling the message
    pub tools_changed: bool,
}

impl Dispatch {
    fn reply(response: JsonRpcResponse) -> Self {
        Self {
            response: Some(response),
            tools_changed: false,
        }
    }

    fn silent() -> Self {
        Self {
            response: None,
            tools_changed: false,
        }
    }
}

/// Handle one raw JSON text message
pub async fn handle_text(session: &Session, text: &str) -> Dispatch {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => handle_value(session, &value).await,
        Err(e) => {
            debug!(error = %e, "Unparseable JSON-RPC message");
            Dispatch::reply(JsonRpcResponse::error(
                None,
                rpc_codes::PARSE_ERROR,
                format!("Parse error: {e}"),
            ))
        }
    }
}

/// Handle one parsed JSON-RPC message
pub async fn handle_value(session: &Session, value: &Value) -> Dispatch {
    let (id, method, params) = match parse_request(value) {
        Ok(parsed) => parsed,
        Err(response) => return Dispatch::reply(response),
    };

    let Some(id) = id.filter(|_| !is_notification_method(&method)) else {
        debug!(method = %method, session = %session.id(), "Notification received");
        return Dispatch::silent();
    };

    debug!(method = %method, id = %id, session = %session.id(), "Request received");
    match method.as_str() {
        "initialize" => Dispatch::reply(handle_initialize(id, params.as_ref())),
        "ping" => Dispatch::reply(JsonRpcResponse::success(id, json!({}))),
        "tools/list" => Dispatch::reply(handle_tools_list(session, id).await),
        "tools/call" => handle_tools_call(session, id, params.as_ref()).await,
        _ => Dispatch::reply(JsonRpcResponse::error(
            Some(id),
            rpc_codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )),
    }
}

/// Handle initialize request with version negotiation
pub fn handle_initialize(id: RequestId, params: Option<&Value>) -> JsonRpcResponse {
    let client_version = extract_client_version(params);
    let negotiated_version = negotiate_version(client_version);
    debug!(
        client = client_version,
        negotiated = negotiated_version,
        "Protocol version negotiation"
    );
    success_response(id, &build_initialize_result(negotiated_version))
}

/// Handle tools/list request
pub async fn handle_tools_list(session: &Session, id: RequestId) -> JsonRpcResponse {
    let result = ToolsListResult {
        tools: session.list_tools().await,
        next_cursor: None,
    };
    success_response(id, &result)
}

/// Handle tools/call request; always answers with a well-formed envelope
pub async fn handle_tools_call(session: &Session, id: RequestId, params: Option<&Value>) -> Dispatch {
    let (result, tools_changed) = match route_tool_call(session, params).await {
        Ok(outcome) => (ToolsCallResult::success(&outcome.value), outcome.tools_changed),
        Err(e) => {
            warn!(session = %session.id(), error = %e, "Tool call failed");
            (ToolsCallResult::error(e.to_string()), false)
        }
    };

    Dispatch {
        response: Some(success_response(id, &result)),
        tools_changed,
    }
}

async fn route_tool_call(session: &Session, params: Option<&Value>) -> Result<CallOutcome> {
    let name = extract_tool_name(params)?;
    let arguments = parse_tool_arguments(params)?;
    session.call_tool(name, arguments).await
}
