//! Identity assertions for the ActionKit API.
//!
//! Each assertion is an RS256 JWT carrying `{sub, iat, exp}` with a fixed
//! seven-day lifetime. The remote service enforces expiry; the gateway only
//! checks it to decide when to re-sign a cached assertion.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::config::ActionKitConfig;
use crate::{Error, Result};

/// Assertion lifetime in seconds (7 days)
pub const ASSERTION_TTL_SECS: i64 = 60 * 60 * 24 * 7;

/// A user identifier (email or opaque user ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Create an identity from user input. Surrounding whitespace is dropped.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidRequest("user identity must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// JWT claims sent to ActionKit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user identity)
    pub sub: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expires at (unix seconds)
    pub exp: i64,
}

/// A signed, short-lived identity assertion
#[derive(Clone)]
pub struct SignedAssertion {
    subject: Identity,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    token: String,
}

impl SignedAssertion {
    /// Identity the assertion was issued for
    #[must_use]
    pub fn subject(&self) -> &Identity {
        &self.subject
    }

    /// Issue time
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Expiry time
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// The encoded JWT, for the `Authorization: Bearer` header only
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the assertion is past its expiry at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// The token is a bearer credential and must never reach the logs.
impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("subject", &self.subject)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Signs identity assertions with the project's RSA private key
pub struct TokenSigner {
    key: EncodingKey,
}

impl TokenSigner {
    /// Build a signer from PEM key material.
    ///
    /// Keys stored in single-line env vars often carry literal `\n`
    /// sequences; those are turned into real newlines first.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let normalized = normalize_pem(pem);
        if normalized.is_empty() {
            return Err(Error::Config("signing key is empty".to_string()));
        }
        let key = EncodingKey::from_rsa_pem(normalized.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid RSA signing key: {e}")))?;
        Ok(Self { key })
    }

    /// Build a signer from the ActionKit configuration section
    pub fn from_config(config: &ActionKitConfig) -> Result<Self> {
        Self::from_pem(&config.resolve_signing_key()?)
    }

    /// Sign an assertion for `identity`, issued now
    pub fn sign(&self, identity: &Identity) -> Result<SignedAssertion> {
        self.sign_at(identity, Utc::now())
    }

    /// Sign an assertion for `identity` issued at `issued_at` (second precision)
    pub fn sign_at(&self, identity: &Identity, issued_at: DateTime<Utc>) -> Result<SignedAssertion> {
        let iat = issued_at.timestamp();
        let exp = iat + ASSERTION_TTL_SECS;
        let claims = Claims {
            sub: identity.as_str().to_string(),
            iat,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)?;

        Ok(SignedAssertion {
            subject: identity.clone(),
            issued_at: timestamp(iat)?,
            expires_at: timestamp(exp)?,
            token,
        })
    }
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Internal(format!("timestamp out of range: {secs}")))
}

/// Turn escaped `\n` sequences into newlines and trim surrounding whitespace
#[must_use]
pub fn normalize_pem(raw: &str) -> String {
    raw.trim().replace("\\n", "\n")
}
