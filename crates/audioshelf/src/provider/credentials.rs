//! Stored credential bundles and the legacy activation-token resolver.

use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::error::CredentialError;

/// Opaque credential material issued by the content provider's login flow.
///
/// The pipeline never interprets it beyond the fields a resolver needs; it is
/// stored as JSON and handed back to the provider verbatim.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialBundle(serde_json::Value);

impl CredentialBundle {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Returns a top-level string field, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialBundle(<redacted>)")
    }
}

/// Resolves the per-account activation token used by legacy-mode decryption.
pub trait CredentialResolver: Send + Sync {
    fn activation_token(
        &self,
        credentials: &CredentialBundle,
    ) -> Result<SecretString, CredentialError>;
}

/// Reads the activation token cached in the bundle's `activation_bytes`
/// field (the login flow stores it there once it has been fetched).
#[derive(Debug, Default, Clone, Copy)]
pub struct BundleCredentialResolver;

impl CredentialResolver for BundleCredentialResolver {
    fn activation_token(
        &self,
        credentials: &CredentialBundle,
    ) -> Result<SecretString, CredentialError> {
        let token = credentials
            .get_str("activation_bytes")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CredentialError::MissingActivationToken)?;

        if !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CredentialError::InvalidActivationToken);
        }

        Ok(SecretString::from(token.to_string()))
    }
}
