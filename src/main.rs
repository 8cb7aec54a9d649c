//! ActionKit MCP - integration actions as authenticated MCP tools

use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};

use mcp_actionkit::{
    Result,
    actionkit::{ActionKitClient, ActionProvider},
    cli::{Cli, Command, ServeArgs},
    config::Config,
    gateway::Gateway,
    setup_tracing,
    signer::{Identity, TokenSigner},
    tools::{self, Translation},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Token { user }) => run_token(&config, &user),
        Some(Command::Actions { user }) => run_actions(&config, &user).await,
        Some(Command::Serve(args)) => run_server(config, &args).await,
        None => run_server(config, &ServeArgs::default()).await,
    }
}

/// Print a signed assertion for `user`
fn run_token(config: &Config, user: &str) -> ExitCode {
    let result = Identity::new(user).and_then(|identity| {
        let signer = TokenSigner::from_config(&config.actionkit)?;
        signer.sign(&identity)
    });

    match result {
        Ok(assertion) => {
            let output = json!({
                "sub": assertion.subject().as_str(),
                "issuedAt": assertion.issued_at().to_rfc3339(),
                "expiresAt": assertion.expires_at().to_rfc3339(),
                "token": assertion.token(),
            });
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to sign assertion: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print the tools `user` would see after authenticating
async fn run_actions(config: &Config, user: &str) -> ExitCode {
    match fetch_translation(config, user).await {
        Ok(translation) => {
            for duplicate in &translation.duplicates {
                warn!(
                    tool = %duplicate.name,
                    kept = %duplicate.kept,
                    dropped = %duplicate.dropped,
                    "Duplicate tool dropped"
                );
            }
            match serde_json::to_string_pretty(&json!({ "tools": translation.tools })) {
                Ok(text) => {
                    println!("{text}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Failed to serialize tools: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            error!("Failed to list actions: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn fetch_translation(config: &Config, user: &str) -> Result<Translation> {
    let identity = Identity::new(user)?;
    let signer = TokenSigner::from_config(&config.actionkit)?;
    let client = ActionKitClient::new(&config.actionkit)?;
    let assertion = signer.sign(&identity)?;
    let catalog = client.fetch_actions(&assertion).await?;
    tools::to_tool_descriptors(&catalog, config.actionkit.duplicate_tools)
}

async fn run_server(mut config: Config, args: &ServeArgs) -> ExitCode {
    args.apply(&mut config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?config.server.transport,
        base_url = %config.actionkit.base_url,
        "Starting ActionKit MCP"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
