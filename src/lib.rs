//! ActionKit MCP Gateway Library
//!
//! Exposes ActionKit integration actions (Slack, Jira, HubSpot, ...) as MCP
//! tools. Each session authenticates a user through a small bootstrap tool
//! set, then sees that user's action catalog as its tool list.
//!
//! # Features
//!
//! - **Auth gate**: per-session state machine over the bootstrap tools
//! - **Signed assertions**: RS256 JWTs identifying the user to ActionKit
//! - **Multi-Transport**: stdio and Streamable HTTP
//! - **Normalized errors**: every tool failure becomes an `isError` envelope

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod actionkit;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod signer;
pub mod tools;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cli::LogFormat;

/// Setup tracing/logging.
///
/// Logs always go to stderr; stdout is reserved for the stdio transport.
pub fn setup_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
