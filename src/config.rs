//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment prefix for configuration overrides (`MCP_ACTIONKIT_ACTIONKIT__PROJECT_ID`, ...)
pub const ENV_PREFIX: &str = "MCP_ACTIONKIT_";

/// Variables understood for compatibility with existing `.env` deployments
pub const LEGACY_PROJECT_ID_VAR: &str = "PARAGON_PROJECT_ID";
/// Signing key variable (PEM, escaped newlines allowed)
pub const LEGACY_SIGNING_KEY_VAR: &str = "SIGNING_KEY";
/// Pre-authenticated user variable
pub const LEGACY_USER_VAR: &str = "PARAGON_USER";

/// `${VAR}` or `${VAR:-default}` in string settings
const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving the rest of the config.
    /// Paths support ~ expansion. Existing process variables are never overridden.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// ActionKit provider configuration
    pub actionkit: ActionKitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: vec![".env".to_string()],
            server: ServerConfig::default(),
            actionkit: ActionKitConfig::default(),
        }
    }
}

/// How the gateway talks MCP to its client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC on stdin/stdout
    #[default]
    Stdio,
    /// Streamable HTTP on `POST /mcp`
    Http,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Transport to serve
    pub transport: TransportMode,
    /// Host to bind to (http)
    pub host: String,
    /// Port to listen on (http)
    pub port: u16,
    /// Maximum request body size in bytes (http)
    pub max_body_size: usize,
    /// HTTP sessions unused for this long are dropped
    #[serde(with = "humantime_serde")]
    pub session_idle_timeout: Duration,
    /// Upper bound on live HTTP sessions
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::Stdio,
            host: "127.0.0.1".to_string(),
            port: 39500,
            max_body_size: 4 * 1024 * 1024,
            session_idle_timeout: Duration::from_secs(30 * 60),
            max_sessions: 1024,
        }
    }
}

/// What to do when two catalog actions map to the same tool name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the first occurrence, record and skip the rest
    #[default]
    FirstWins,
    /// Fail translation on the first duplicate
    Reject,
}

/// ActionKit provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionKitConfig {
    /// API base URL
    pub base_url: String,
    /// Paragon project identifier
    pub project_id: Option<String>,
    /// RSA private key (PEM). Supports a literal value, `env:VAR` or `file:PATH`.
    pub signing_key: Option<String>,
    /// Restrict the catalog to these integrations (empty = all)
    pub integrations: Vec<String>,
    /// Identity to authenticate every new session as
    pub user: Option<String>,
    /// Timeout for outbound ActionKit requests
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Page users are sent to for connecting their integrations
    pub auth_url: String,
    /// Duplicate tool name handling
    pub duplicate_tools: DuplicatePolicy,
}

impl Default for ActionKitConfig {
    fn default() -> Self {
        Self {
            base_url: "https://actionkit.useparagon.com".to_string(),
            project_id: None,
            signing_key: None,
            integrations: Vec::new(),
            user: None,
            timeout: Duration::from_secs(30),
            auth_url: "https://connect.useparagon.com".to_string(),
            duplicate_tools: DuplicatePolicy::FirstWins,
        }
    }
}

impl ActionKitConfig {
    /// Project id, or a configuration error when unset
    pub fn require_project_id(&self) -> Result<&str> {
        self.project_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "ActionKit project id is not set (actionkit.project_id or {LEGACY_PROJECT_ID_VAR})"
                ))
            })
    }

    /// Resolve the signing key reference to PEM text
    pub fn resolve_signing_key(&self) -> Result<String> {
        let reference = self
            .signing_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "{LEGACY_SIGNING_KEY_VAR} needs to be set (actionkit.signing_key)"
                ))
            })?;

        if let Some(var_name) = reference.strip_prefix("env:") {
            env::var(var_name).map_err(|_| {
                Error::Config(format!(
                    "Environment variable '{var_name}' not set (required for signing key)"
                ))
            })
        } else if let Some(path) = reference.strip_prefix("file:") {
            std::fs::read_to_string(expand_home(path)).map_err(|e| {
                Error::Config(format!("Failed to read signing key file {path}: {e}"))
            })
        } else {
            Ok(reference.to_string())
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
        }

        // First pass only discovers env_files; the second sees their variables.
        let bootstrap = Self::extract(path)?;
        bootstrap.load_env_files();

        let mut config = Self::extract(path)?;
        config.apply_legacy_env(|name| env::var(name).ok());
        config.expand_env_vars()?;

        Ok(config)
    }

    fn extract(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(p) = path {
            figment = figment.merge(Yaml::file(p));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }

    /// Check everything needed before serving a single request
    pub fn validate(&self) -> Result<()> {
        if self.server.max_sessions == 0 {
            return Err(Error::Config("server.max_sessions must be at least 1".to_string()));
        }
        if self.server.session_idle_timeout.is_zero() {
            return Err(Error::Config(
                "server.session_idle_timeout must be positive".to_string(),
            ));
        }
        self.actionkit.require_project_id()?;
        self.actionkit.resolve_signing_key()?;
        url::Url::parse(&self.actionkit.base_url).map_err(|e| {
            Error::Config(format!("Invalid actionkit.base_url '{}': {e}", self.actionkit.base_url))
        })?;
        url::Url::parse(&self.actionkit.auth_url).map_err(|e| {
            Error::Config(format!("Invalid actionkit.auth_url '{}': {e}", self.actionkit.auth_url))
        })?;
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Fill unset ActionKit settings from the conventional variables
    fn apply_legacy_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let ak = &mut self.actionkit;
        if ak.project_id.is_none() {
            ak.project_id = lookup(LEGACY_PROJECT_ID_VAR);
        }
        if ak.signing_key.is_none() {
            ak.signing_key = lookup(LEGACY_SIGNING_KEY_VAR);
        }
        if ak.user.is_none() {
            ak.user = lookup(LEGACY_USER_VAR).filter(|u| !u.trim().is_empty());
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(ENV_VAR_PATTERN)
            .map_err(|e| Error::Internal(format!("Invalid env var pattern: {e}")))?;

        let ak = &mut self.actionkit;
        ak.base_url = Self::expand_string(&re, &ak.base_url);
        ak.auth_url = Self::expand_string(&re, &ak.auth_url);
        if let Some(project_id) = ak.project_id.as_mut() {
            *project_id = Self::expand_string(&re, project_id);
        }
        if let Some(user) = ak.user.as_mut() {
            *user = Self::expand_string(&re, user);
        }
        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Serde helpers for human-readable durations (`30s`, `5m`, `100ms`)
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize a duration as milliseconds when sub-second, seconds otherwise
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize `30s`, `5m`, `100ms` or a bare number of seconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
