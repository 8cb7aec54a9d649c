//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{Config, TransportMode};

/// MCP server exposing ActionKit integration actions as tools
#[derive(Parser, Debug)]
#[command(name = "mcp-actionkit")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_ACTIONKIT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[arg(
        long,
        default_value = "info",
        env = "MCP_ACTIONKIT_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format
    #[arg(
        long,
        value_enum,
        default_value_t = LogFormat::Text,
        env = "MCP_ACTIONKIT_LOG_FORMAT",
        global = true
    )]
    pub log_format: LogFormat,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the MCP server (default)
    Serve(ServeArgs),

    /// Print a signed identity assertion for a user
    Token {
        /// User identity (email or user ID)
        user: String,
    },

    /// Print the tools a user would see after authenticating
    Actions {
        /// User identity (email or user ID)
        user: String,
    },
}

/// Server overrides
#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Transport to serve on
    #[arg(short, long, value_enum, env = "MCP_ACTIONKIT_TRANSPORT")]
    pub transport: Option<TransportMode>,

    /// Port to listen on (http transport)
    #[arg(short, long, env = "MCP_ACTIONKIT_PORT")]
    pub port: Option<u16>,

    /// Host to bind to (http transport)
    #[arg(long, env = "MCP_ACTIONKIT_HOST")]
    pub host: Option<String>,
}

impl ServeArgs {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(transport) = self.transport {
            config.server.transport = transport;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
    }
}
