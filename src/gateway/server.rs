//! Gateway server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router, spawn_session_reaper};
use super::session::{AuthGate, Session};
use super::stdio;
use crate::actionkit::{ActionKitClient, ActionProvider};
use crate::config::{Config, TransportMode};
use crate::signer::TokenSigner;
use crate::{Error, Result};

/// Session id used for the single stdio session
const STDIO_SESSION_ID: &str = "stdio";

/// ActionKit MCP gateway
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Gate shared by all sessions
    gate: Arc<AuthGate>,
}

impl Gateway {
    /// Create a gateway talking to the configured ActionKit API.
    ///
    /// Fails when the project id or signing key is missing or unusable.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let provider = Arc::new(ActionKitClient::new(&config.actionkit)?);
        Self::with_provider(config, provider)
    }

    /// Create a gateway backed by an arbitrary action provider
    pub fn with_provider(config: Config, provider: Arc<dyn ActionProvider>) -> Result<Self> {
        let signer = Arc::new(TokenSigner::from_config(&config.actionkit)?);
        let gate = Arc::new(AuthGate::new(signer, provider, &config.actionkit)?);
        Ok(Self { config, gate })
    }

    /// Run on the configured transport until EOF (stdio) or a shutdown signal (HTTP)
    pub async fn run(self) -> Result<()> {
        match self.config.server.transport {
            TransportMode::Stdio => self.run_stdio().await,
            TransportMode::Http => self.run_http().await,
        }
    }

    async fn run_stdio(self) -> Result<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            integrations = ?self.config.actionkit.integrations,
            "Starting ActionKit MCP server on stdio"
        );
        let session = Arc::new(Session::start(STDIO_SESSION_ID, Arc::clone(&self.gate)).await);
        stdio::serve_stdio(session).await
    }

    async fn run_http(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );
        let listener = TcpListener::bind(addr).await?;
        self.serve_http(listener, shutdown_signal()).await
    }

    /// Serve Streamable HTTP on an already-bound listener until `shutdown` resolves
    pub async fn serve_http<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let server = &self.config.server;
        let state = Arc::new(AppState::new(Arc::clone(&self.gate), server.max_sessions));
        let reaper = spawn_session_reaper(
            Arc::clone(&state),
            reap_interval(server.session_idle_timeout),
            server.session_idle_timeout,
        );
        let app = create_router(state, server.max_body_size);

        let local = listener.local_addr()?;
        info!("============================================================");
        info!("ACTIONKIT MCP v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(address = %local, "Listening");
        info!("  POST   http://{local}/mcp  (requests)");
        info!("  DELETE http://{local}/mcp  (end session)");
        info!("  GET    http://{local}/health");
        info!(
            idle_timeout = ?server.session_idle_timeout,
            max_sessions = server.max_sessions,
            "Session limits"
        );
        if let Some(user) = &self.config.actionkit.user {
            info!(user = %user, "Sessions are pre-authenticated");
        }
        info!("============================================================");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Internal(e.to_string()));
        reaper.abort();
        served?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// How often idle sessions are swept: a quarter of the timeout, between 1s and 60s
fn reap_interval(idle_timeout: Duration) -> Duration {
    (idle_timeout / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
