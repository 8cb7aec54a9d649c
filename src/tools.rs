//! Tool definitions: the fixed bootstrap set and catalog translation

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::warn;

use crate::actionkit::ActionCatalog;
use crate::config::DuplicatePolicy;
use crate::protocol::Tool;
use crate::{Error, Result};

/// Asks the user for the identity to authenticate as
pub const PROMPT_FOR_EMAIL: &str = "PROMPT_FOR_EMAIL";
/// Returns the page the user connects their integrations on
pub const REDIRECT_TO_AUTHENTICATION_PAGE: &str = "REDIRECT_TO_AUTHENTICATION_PAGE";
/// Fetches the user's catalog once they confirm authentication
pub const RETRIEVE_TOOLS: &str = "RETRIEVE_TOOLS";

/// Names reserved by the bootstrap set
pub const BOOTSTRAP_TOOL_NAMES: [&str; 3] =
    [PROMPT_FOR_EMAIL, REDIRECT_TO_AUTHENTICATION_PAGE, RETRIEVE_TOOLS];

/// Owner recorded for reserved bootstrap names in duplicate reports
pub const BOOTSTRAP_OWNER: &str = "bootstrap";

/// The tools exposed before a session is authenticated
#[must_use]
pub fn bootstrap_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: PROMPT_FOR_EMAIL.to_string(),
            description: Some(
                "Use when a user first interacts with the chat or when a user is unable to \
                 authenticate. Prompt for their email username."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "email": {
                        "type": "string",
                        "description": "email username"
                    }
                },
                "required": ["email"]
            }),
        },
        Tool {
            name: REDIRECT_TO_AUTHENTICATION_PAGE.to_string(),
            description: Some(
                "Use when a user has provided their email, but no tools have been made \
                 available. Provide the redirect link for user to authenticate and enable tools"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        Tool {
            name: RETRIEVE_TOOLS.to_string(),
            description: Some(
                "Use when a user has provided their email or when a user has confirmed that \
                 they have authenticated via the REDIRECT_TO_AUTHENTICATION_PAGE tool. \
                 Attempt to retrieve tools"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "confirmation": {
                        "type": "string",
                        "description": "whether the user has confirmed they have authenticated via the redirect"
                    }
                },
                "required": ["confirmation"]
            }),
        },
    ]
}

/// A tool name declared more than once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateTool {
    /// Tool name
    pub name: String,
    /// Integration whose declaration was kept
    pub kept: String,
    /// Integration whose declaration was dropped
    pub dropped: String,
}

/// Result of translating a catalog into tools
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translation {
    /// Exposed tools, in catalog order
    pub tools: Vec<Tool>,
    /// Declarations dropped under `first_wins`
    pub duplicates: Vec<DuplicateTool>,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Translate a catalog into MCP tool descriptors
pub fn to_tool_descriptors(catalog: &ActionCatalog, policy: DuplicatePolicy) -> Result<Translation> {
    let mut owners: HashMap<&str, &str> = BOOTSTRAP_TOOL_NAMES
        .iter()
        .map(|name| (*name, BOOTSTRAP_OWNER))
        .collect();
    let mut translation = Translation {
        tools: Vec::with_capacity(catalog.len()),
        duplicates: Vec::new(),
    };

    for action in catalog.actions() {
        if let Some(first) = owners.get(action.name.as_str()) {
            match policy {
                DuplicatePolicy::Reject => {
                    return Err(Error::DuplicateTool {
                        name: action.name.clone(),
                        first: (*first).to_string(),
                        second: action.integration.clone(),
                    });
                }
                DuplicatePolicy::FirstWins => {
                    warn!(
                        tool = %action.name,
                        kept = %first,
                        dropped = %action.integration,
                        "Duplicate tool name; keeping first declaration"
                    );
                    translation.duplicates.push(DuplicateTool {
                        name: action.name.clone(),
                        kept: (*first).to_string(),
                        dropped: action.integration.clone(),
                    });
                    continue;
                }
            }
        }

        owners.insert(&action.name, &action.integration);
        translation.tools.push(Tool {
            name: action.name.clone(),
            description: action.description.clone(),
            input_schema: action.parameters.clone().unwrap_or_else(empty_schema),
        });
    }

    Ok(translation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actionkit::ActionDescriptor;
    use pretty_assertions::assert_eq;

    fn action(integration: &str, name: &str) -> ActionDescriptor {
        ActionDescriptor {
            integration: integration.to_string(),
            name: name.to_string(),
            description: Some(format!("{name} description")),
            parameters: Some(json!({"type": "object", "properties": {"x": {"type": "string"}}})),
        }
    }

    #[test]
    fn bootstrap_set_has_fixed_names_and_required_params() {
        let tools = bootstrap_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, BOOTSTRAP_TOOL_NAMES.to_vec());

        assert_eq!(tools[0].input_schema["required"], json!(["email"]));
        assert!(tools[1].input_schema.get("required").is_none());
        assert_eq!(tools[2].input_schema["required"], json!(["confirmation"]));
    }

    #[test]
    fn translation_maps_fields_and_keeps_order() {
        let catalog = ActionCatalog::new(vec![
            (
                "slack".to_string(),
                vec![action("slack", "SLACK_SEND_MESSAGE"), action("slack", "SLACK_LIST")],
            ),
            ("jira".to_string(), vec![action("jira", "JIRA_CREATE")]),
        ]);

        let translation = to_tool_descriptors(&catalog, DuplicatePolicy::FirstWins).unwrap();
        let names: Vec<&str> = translation.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["SLACK_SEND_MESSAGE", "SLACK_LIST", "JIRA_CREATE"]);
        assert!(translation.duplicates.is_empty());

        let first = &translation.tools[0];
        assert_eq!(first.description.as_deref(), Some("SLACK_SEND_MESSAGE description"));
        assert_eq!(first.input_schema["properties"]["x"]["type"], "string");
    }

    #[test]
    fn missing_parameters_default_to_empty_object_schema() {
        let mut bare = action("slack", "SLACK_PING");
        bare.parameters = None;
        bare.description = None;
        let catalog = ActionCatalog::new(vec![("slack".to_string(), vec![bare])]);

        let translation = to_tool_descriptors(&catalog, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(
            translation.tools[0].input_schema,
            json!({"type": "object", "properties": {}})
        );
        assert!(translation.tools[0].description.is_none());
    }

    #[test]
    fn first_wins_records_every_later_duplicate() {
        let catalog = ActionCatalog::new(vec![
            ("slack".to_string(), vec![action("slack", "SEND")]),
            ("teams".to_string(), vec![action("teams", "SEND")]),
            ("discord".to_string(), vec![action("discord", "SEND")]),
        ]);

        let translation = to_tool_descriptors(&catalog, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(translation.tools.len(), 1);
        assert_eq!(translation.tools[0].description.as_deref(), Some("SEND description"));
        assert_eq!(
            translation.duplicates,
            vec![
                DuplicateTool {
                    name: "SEND".into(),
                    kept: "slack".into(),
                    dropped: "teams".into()
                },
                DuplicateTool {
                    name: "SEND".into(),
                    kept: "slack".into(),
                    dropped: "discord".into()
                },
            ]
        );
    }

    #[test]
    fn reject_policy_fails_on_first_duplicate() {
        let catalog = ActionCatalog::new(vec![
            ("slack".to_string(), vec![action("slack", "SEND")]),
            ("teams".to_string(), vec![action("teams", "SEND")]),
        ]);

        let err = to_tool_descriptors(&catalog, DuplicatePolicy::Reject).unwrap_err();
        match err {
            Error::DuplicateTool { name, first, second } => {
                assert_eq!(name, "SEND");
                assert_eq!(first, "slack");
                assert_eq!(second, "teams");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bootstrap_names_are_reserved() {
        let catalog = ActionCatalog::new(vec![(
            "custom".to_string(),
            vec![action("custom", RETRIEVE_TOOLS), action("custom", "OK")],
        )]);

        let translation = to_tool_descriptors(&catalog, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(translation.tools.len(), 1);
        assert_eq!(translation.duplicates[0].kept, BOOTSTRAP_OWNER);

        assert!(matches!(
            to_tool_descriptors(&catalog, DuplicatePolicy::Reject),
            Err(Error::DuplicateTool { .. })
        ));
    }
}
