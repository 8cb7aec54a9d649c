//! Per-session authentication gate
//!
//! A session starts `Unauthenticated` and exposes only the bootstrap tools.
//! `PROMPT_FOR_EMAIL` records who the user claims to be, the user connects
//! their integrations on the authentication page, and `RETRIEVE_TOOLS` signs an
//! assertion for that identity and swaps the bootstrap set for the user's
//! ActionKit catalog.
//!
//! Every transition runs under the session mutex. The lock is held across the
//! catalog fetch so concurrent confirmations resolve to a single fetch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::helpers::extract_required_str;
use crate::actionkit::ActionProvider;
use crate::config::{ActionKitConfig, DuplicatePolicy};
use crate::protocol::Tool;
use crate::signer::{Identity, SignedAssertion, TokenSigner};
use crate::tools::{
    self, DuplicateTool, PROMPT_FOR_EMAIL, REDIRECT_TO_AUTHENTICATION_PAGE, RETRIEVE_TOOLS,
    Translation,
};
use crate::{Error, Result};

/// Confirmation values accepted by `RETRIEVE_TOOLS` (case-insensitive)
pub const AFFIRMATIVE_CONFIRMATIONS: [&str; 7] =
    ["yes", "y", "true", "confirmed", "done", "ok", "1"];

/// Whether a `RETRIEVE_TOOLS` confirmation counts as "the user authenticated"
#[must_use]
pub fn is_affirmative(confirmation: &str) -> bool {
    let confirmation = confirmation.trim();
    AFFIRMATIVE_CONFIRMATIONS
        .iter()
        .any(|accepted| accepted.eq_ignore_ascii_case(confirmation))
}

/// Authentication state of one session
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    /// No identity known yet
    #[default]
    Unauthenticated,
    /// Identity known, waiting for the user to finish connecting
    AwaitingRedirectConfirmation {
        /// Identity the user supplied
        identity: Identity,
    },
    /// Catalog fetched for the identity
    Authenticated {
        /// Authenticated identity
        identity: Identity,
        /// Assertion used for every forwarded call
        assertion: SignedAssertion,
        /// Translated catalog, cached until re-authentication
        tools: Vec<Tool>,
    },
}

impl SessionState {
    /// Short state name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::AwaitingRedirectConfirmation { .. } => "awaiting_redirect_confirmation",
            Self::Authenticated { .. } => "authenticated",
        }
    }

    /// The identity the session is tied to, if any
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Unauthenticated => None,
            Self::AwaitingRedirectConfirmation { identity }
            | Self::Authenticated { identity, .. } => Some(identity),
        }
    }

    /// Whether the session has a fetched catalog
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Result of a tool call routed through the gate
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    /// Raw result, wrapped into a text item by the caller
    pub value: Value,
    /// The session's tool list changed as a side effect
    pub tools_changed: bool,
}

impl CallOutcome {
    fn unchanged(value: Value) -> Self {
        Self {
            value,
            tools_changed: false,
        }
    }

    fn changed(value: Value) -> Self {
        Self {
            value,
            tools_changed: true,
        }
    }
}

/// Dependencies shared by every session: signer, provider and auth settings
pub struct AuthGate {
    signer: Arc<TokenSigner>,
    provider: Arc<dyn ActionProvider>,
    auth_url: Url,
    project_id: String,
    duplicate_policy: DuplicatePolicy,
    preauthenticated_user: Option<Identity>,
}

impl AuthGate {
    /// Create a gate from its collaborators and the ActionKit configuration
    pub fn new(
        signer: Arc<TokenSigner>,
        provider: Arc<dyn ActionProvider>,
        config: &ActionKitConfig,
    ) -> Result<Self> {
        let auth_url = Url::parse(&config.auth_url).map_err(|e| {
            Error::Config(format!("Invalid auth_url '{}': {e}", config.auth_url))
        })?;
        let preauthenticated_user = config
            .user
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(Identity::new)
            .transpose()?;

        Ok(Self {
            signer,
            provider,
            auth_url,
            project_id: config.require_project_id()?.to_string(),
            duplicate_policy: config.duplicate_tools,
            preauthenticated_user,
        })
    }

    /// Link the user follows to connect their integrations
    #[must_use]
    pub fn authentication_link(&self, identity: &Identity) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("projectId", &self.project_id)
            .append_pair("user", identity.as_str());
        url.into()
    }

    fn redirect_payload(&self, identity: &Identity) -> Value {
        json!({
            "user": identity.as_str(),
            "authenticationUrl": self.authentication_link(identity),
            "nextStep": format!(
                "Open the link, connect your integrations, then call {RETRIEVE_TOOLS} with confirmation \"yes\"."
            ),
        })
    }

    async fn fetch_tools(&self, identity: &Identity) -> Result<(SignedAssertion, Translation)> {
        let assertion = self.signer.sign(identity)?;
        let catalog = self.provider.fetch_actions(&assertion).await?;
        let translation = tools::to_tool_descriptors(&catalog, self.duplicate_policy)?;
        Ok((assertion, translation))
    }
}

/// One MCP session and its authentication state
pub struct Session {
    id: String,
    gate: Arc<AuthGate>,
    state: Mutex<SessionState>,
    // Bumped on every successful authentication
    epoch: AtomicU64,
}

impl Session {
    /// Create an unauthenticated session
    pub fn new(id: impl Into<String>, gate: Arc<AuthGate>) -> Self {
        Self {
            id: id.into(),
            gate,
            state: Mutex::new(SessionState::Unauthenticated),
            epoch: AtomicU64::new(0),
        }
    }

    /// Create a session, authenticating it as the configured user when one is set.
    ///
    /// A failed pre-authentication leaves the session awaiting confirmation for
    /// that user; the bootstrap tools stay available.
    pub async fn start(id: impl Into<String>, gate: Arc<AuthGate>) -> Self {
        let user = gate.preauthenticated_user.clone();
        let session = Self::new(id, gate);
        if let Some(identity) = user {
            match session.authenticate(identity).await {
                Ok(_) => info!(session = %session.id, "Session pre-authenticated"),
                Err(e) => warn!(
                    session = %session.id,
                    error = %e,
                    "Pre-authentication failed; falling back to interactive flow"
                ),
            }
        }
        session
    }

    /// Session identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Tools exposed to this session right now
    pub async fn list_tools(&self) -> Vec<Tool> {
        match &*self.state.lock().await {
            SessionState::Authenticated { tools, .. } => tools.clone(),
            SessionState::Unauthenticated | SessionState::AwaitingRedirectConfirmation { .. } => {
                tools::bootstrap_tools()
            }
        }
    }

    /// Authenticate as `identity` directly, skipping the prompt step
    pub async fn authenticate(&self, identity: Identity) -> Result<CallOutcome> {
        let mut state = self.state.lock().await;
        *state = SessionState::AwaitingRedirectConfirmation {
            identity: identity.clone(),
        };
        self.confirm(&mut state, identity).await
    }

    /// Route a tool call through the gate.
    ///
    /// `arguments` must already be a JSON object.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallOutcome> {
        match name {
            PROMPT_FOR_EMAIL => self.prompt_for_email(&arguments).await,
            REDIRECT_TO_AUTHENTICATION_PAGE => self.redirect().await,
            RETRIEVE_TOOLS => self.retrieve_tools(&arguments).await,
            _ => self.forward(name, arguments).await,
        }
    }

    async fn prompt_for_email(&self, arguments: &Value) -> Result<CallOutcome> {
        let identity = Identity::new(extract_required_str(arguments, "email")?)?;
        let mut state = self.state.lock().await;
        let was_authenticated = state.is_authenticated();

        info!(
            session = %self.id,
            user = %identity,
            from = state.name(),
            "Identity supplied; awaiting redirect confirmation"
        );
        let payload = self.gate.redirect_payload(&identity);
        *state = SessionState::AwaitingRedirectConfirmation { identity };

        // Leaving Authenticated swaps the catalog back to the bootstrap set.
        Ok(CallOutcome {
            value: payload,
            tools_changed: was_authenticated,
        })
    }

    async fn redirect(&self) -> Result<CallOutcome> {
        match self.state.lock().await.identity() {
            Some(identity) => Ok(CallOutcome::unchanged(self.gate.redirect_payload(identity))),
            None => Err(Error::NotAuthenticated(format!(
                "no user identity yet; call {PROMPT_FOR_EMAIL} first"
            ))),
        }
    }

    async fn retrieve_tools(&self, arguments: &Value) -> Result<CallOutcome> {
        let observed = self.epoch.load(Ordering::Acquire);
        let mut state = self.state.lock().await;
        let Some(identity) = state.identity().cloned() else {
            return Err(Error::NotAuthenticated(format!(
                "no user identity yet; call {PROMPT_FOR_EMAIL} first"
            )));
        };

        let confirmation = extract_required_str(arguments, "confirmation")?;
        if !is_affirmative(confirmation) {
            debug!(
                session = %self.id,
                confirmation,
                state = state.name(),
                "Confirmation not affirmative"
            );
            let payload = if state.is_authenticated() {
                json!({
                    "status": "authenticated",
                    "user": identity.as_str(),
                    "message": format!(
                        "Current tools remain available. Call {RETRIEVE_TOOLS} with confirmation \"yes\" to refresh them."
                    ),
                })
            } else {
                json!({
                    "status": "awaiting_confirmation",
                    "user": identity.as_str(),
                    "message": format!(
                        "Authenticate via the {REDIRECT_TO_AUTHENTICATION_PAGE} link, then call {RETRIEVE_TOOLS} with confirmation \"yes\"."
                    ),
                })
            };
            return Ok(CallOutcome::unchanged(payload));
        }

        // Another confirmation finished while this one waited for the lock.
        if let SessionState::Authenticated { tools, .. } = &*state {
            if self.epoch.load(Ordering::Acquire) != observed {
                debug!(session = %self.id, "Reusing catalog from concurrent confirmation");
                return Ok(CallOutcome::unchanged(authenticated_payload(
                    &identity,
                    tools,
                    &[],
                )));
            }
        }

        self.confirm(&mut state, identity).await
    }

    /// Sign, fetch and translate for `identity` with the state lock held.
    ///
    /// Callers put the session in `AwaitingRedirectConfirmation` or
    /// `Authenticated` for `identity` first.
    async fn confirm(&self, state: &mut SessionState, identity: Identity) -> Result<CallOutcome> {
        match self.gate.fetch_tools(&identity).await {
            Ok((assertion, translation)) => {
                let payload =
                    authenticated_payload(&identity, &translation.tools, &translation.duplicates);

                info!(
                    session = %self.id,
                    user = %identity,
                    tools = translation.tools.len(),
                    "Session authenticated"
                );
                *state = SessionState::Authenticated {
                    identity,
                    assertion,
                    tools: translation.tools,
                };
                self.epoch.fetch_add(1, Ordering::AcqRel);
                Ok(CallOutcome::changed(payload))
            }
            Err(e) => {
                // State is left as found: a pending identity stays pending and
                // an authenticated session keeps its catalog.
                warn!(
                    session = %self.id,
                    user = %identity,
                    state = state.name(),
                    error = %e,
                    "Tool retrieval failed"
                );
                Err(e)
            }
        }
    }

    async fn forward(&self, name: &str, arguments: Value) -> Result<CallOutcome> {
        let assertion = {
            let mut state = self.state.lock().await;
            match &mut *state {
                SessionState::Authenticated {
                    identity,
                    assertion,
                    ..
                } => {
                    if assertion.is_expired_at(Utc::now()) {
                        debug!(session = %self.id, user = %identity, "Re-signing expired assertion");
                        *assertion = self.gate.signer.sign(identity)?;
                    }
                    assertion.clone()
                }
                SessionState::Unauthenticated | SessionState::AwaitingRedirectConfirmation { .. } => {
                    return Err(Error::NotAuthenticated(format!(
                        "tool '{name}' is unavailable until authentication completes; \
                         call {PROMPT_FOR_EMAIL} and {RETRIEVE_TOOLS} first"
                    )));
                }
            }
        };

        let value = self.gate.provider.invoke(name, arguments, &assertion).await?;
        Ok(CallOutcome::unchanged(value))
    }
}

fn authenticated_payload(identity: &Identity, tools: &[Tool], duplicates: &[DuplicateTool]) -> Value {
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    let mut payload = json!({
        "status": "authenticated",
        "user": identity.as_str(),
        "tools": names,
    });
    if !duplicates.is_empty() {
        payload["duplicates"] = duplicates
            .iter()
            .map(|d| json!({"name": d.name, "kept": d.kept, "dropped": d.dropped}))
            .collect();
    }
    payload
}
