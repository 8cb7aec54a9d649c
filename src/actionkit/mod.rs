//! ActionKit action provider
//!
//! The catalog is fetched per identity and mirrors the provider's wire shape:
//!
//! ```json
//! {"actions": {"slack": [{"type": "function", "function": {"name": "...", "description": "...", "parameters": {...}}}]}}
//! ```
//!
//! Integration and action order are kept exactly as the provider sent them.

mod client;

pub use client::ActionKitClient;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::signer::SignedAssertion;
use crate::{Error, Result};

/// A remote action as declared by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDescriptor {
    /// Integration the action belongs to (e.g. `slack`)
    pub integration: String,
    /// Action name, used verbatim as the tool name
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// JSON Schema of the action parameters
    pub parameters: Option<Value>,
}

/// Actions grouped by integration, in provider order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionCatalog {
    integrations: Vec<(String, Vec<ActionDescriptor>)>,
}

#[derive(Deserialize)]
struct WireCatalog {
    actions: Map<String, Value>,
}

#[derive(Deserialize)]
struct WireAction {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
}

impl ActionCatalog {
    /// Build a catalog from already-grouped descriptors
    #[must_use]
    pub fn new(integrations: Vec<(String, Vec<ActionDescriptor>)>) -> Self {
        Self { integrations }
    }

    /// Parse the provider's response body
    pub fn from_response(body: Value) -> Result<Self> {
        let wire: WireCatalog = serde_json::from_value(body)
            .map_err(|e| Error::catalog(format!("malformed catalog payload: {e}")))?;

        let mut integrations = Vec::with_capacity(wire.actions.len());
        for (integration, entries) in wire.actions {
            let entries: Vec<WireAction> = serde_json::from_value(entries).map_err(|e| {
                Error::catalog(format!(
                    "malformed actions for integration '{integration}': {e}"
                ))
            })?;

            let mut actions = Vec::with_capacity(entries.len());
            for entry in entries {
                if entry.kind.as_deref().is_some_and(|k| k != "function") {
                    debug!(integration = %integration, kind = ?entry.kind, "Skipping non-function action");
                    continue;
                }
                let function = entry.function.ok_or_else(|| {
                    Error::catalog(format!(
                        "action in integration '{integration}' has no function definition"
                    ))
                })?;
                actions.push(ActionDescriptor {
                    integration: integration.clone(),
                    name: function.name,
                    description: function.description,
                    parameters: function.parameters,
                });
            }
            integrations.push((integration, actions));
        }

        Ok(Self { integrations })
    }

    /// Iterate integrations with their actions
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ActionDescriptor])> {
        self.integrations
            .iter()
            .map(|(name, actions)| (name.as_str(), actions.as_slice()))
    }

    /// All actions, flattened in catalog order
    pub fn actions(&self) -> impl Iterator<Item = &ActionDescriptor> {
        self.integrations.iter().flat_map(|(_, actions)| actions)
    }

    /// Total number of actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.integrations.iter().map(|(_, a)| a.len()).sum()
    }

    /// Whether the catalog has no actions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remote catalog and execution backend for authenticated sessions
#[async_trait]
pub trait ActionProvider: Send + Sync {
    /// Fetch the actions available to the asserted identity
    async fn fetch_actions(&self, assertion: &SignedAssertion) -> Result<ActionCatalog>;

    /// Execute `action` with `parameters` on behalf of the asserted identity
    async fn invoke(
        &self,
        action: &str,
        parameters: Value,
        assertion: &SignedAssertion,
    ) -> Result<Value>;
}
