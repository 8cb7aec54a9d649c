//! Error types for the ActionKit MCP gateway

use std::io;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog fetch failed (non-success status or malformed payload)
    #[error("Could not fetch ActionKit actions{}: {message}", status_suffix(.status.as_ref()))]
    CatalogFetch {
        /// HTTP status, when the provider answered
        status: Option<u16>,
        /// Failure description
        message: String,
    },

    /// Action invocation rejected by the provider
    #[error("ActionKit action failed with status {status}: {body}")]
    Invocation {
        /// HTTP status returned by the provider
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Network-level failure talking to the provider
    #[error("Transport error: {0}")]
    Transport(String),

    /// Two catalog actions translate to the same tool name
    #[error("Duplicate tool name '{name}' in integrations '{first}' and '{second}'")]
    DuplicateTool {
        /// Tool name
        name: String,
        /// Integration that declared it first
        first: String,
        /// Integration that declared it again
        second: String,
    },

    /// Malformed incoming tool call
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Tool call attempted before authentication completed
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Token signing error
    #[error("Signing error: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: Option<&u16>) -> String {
    status.map_or_else(String::new, |s| format!(" (status {s})"))
}

impl Error {
    /// Create a catalog fetch error without an HTTP status
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::CatalogFetch {
            status: None,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Transport(format!("request timed out: {e}"))
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
}
