//! Environment-driven configuration.
//!
//! All settings come from `TROVE_*` environment variables. Values are
//! trimmed; empty and placeholder-looking values count as unset so a copied
//! sample env file cannot silently reach the provider with junk credentials.
//!
//! Outside production the server starts with whatever is present and the
//! auth routes reject per-request when something is missing. In production
//! `validate_strict` refuses startup instead.

use anyhow::{bail, Result};
use tracing::warn;

/// Default OAuth scopes requested during authorization
const DEFAULT_SCOPES: &str = "user-read-email user-read-private";

/// Substrings that mark a value as a sample-file placeholder
const PLACEHOLDER_MARKERS: &[&str] = &["changeme", "change-me", "placeholder", "your-", "your_"];

/// Complete service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub scopes: String,
    pub frontend_url: Option<String>,
    pub encryption_secret: Option<String>,
    pub encryption_salt: Option<String>,
    pub database_path: String,
    pub bind_addr: String,
    pub production: bool,
}

/// The OAuth client triple, available once configuration is complete
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: String,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self {
            client_id: env_value("TROVE_CLIENT_ID"),
            client_secret: env_value("TROVE_CLIENT_SECRET"),
            redirect_uri: env_value("TROVE_REDIRECT_URI"),
            scopes: env_value("TROVE_SCOPES").unwrap_or_else(|| DEFAULT_SCOPES.to_string()),
            frontend_url: env_value("TROVE_FRONTEND_URL"),
            encryption_secret: env_value("TROVE_ENCRYPTION_KEY"),
            encryption_salt: env_value("TROVE_ENCRYPTION_SALT"),
            database_path: env_value("TROVE_DATABASE_PATH")
                .unwrap_or_else(|| "trove.db".to_string()),
            bind_addr: env_value("TROVE_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            production: env_value("TROVE_ENV").as_deref() == Some("production"),
        }
    }

    /// Names of the required OAuth variables that are absent or placeholder.
    pub fn missing_oauth_vars(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.client_id.is_none() {
            missing.push("TROVE_CLIENT_ID");
        }
        if self.client_secret.is_none() {
            missing.push("TROVE_CLIENT_SECRET");
        }
        if self.redirect_uri.is_none() {
            missing.push("TROVE_REDIRECT_URI");
        }
        if self.encryption_secret.is_none() {
            missing.push("TROVE_ENCRYPTION_KEY");
        }
        missing
    }

    /// The client credential triple, or `None` while configuration is incomplete.
    pub fn client_credentials(&self) -> Option<ClientCredentials> {
        Some(ClientCredentials {
            client_id: self.client_id.clone()?,
            client_secret: self.client_secret.clone()?,
            redirect_uri: self.redirect_uri.clone()?,
            scopes: self.scopes.clone(),
        })
    }

    /// Refuse to run with incomplete configuration. Called only in production.
    pub fn validate_strict(&self) -> Result<()> {
        let missing = self.missing_oauth_vars();
        if !missing.is_empty() {
            bail!("missing required configuration: {}", missing.join(", "));
        }
        Ok(())
    }
}

/// Read an environment variable, treating empty and placeholder values as unset.
fn env_value(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    normalize(name, &value)
}

fn normalize(name: &str, value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if looks_placeholder(trimmed) {
        warn!(var = name, "ignoring placeholder configuration value");
        return None;
    }
    Some(trimmed.to_string())
}

fn looks_placeholder(value: &str) -> bool {
    let lowered = value.to_lowercase();
    if lowered.starts_with('<') && lowered.ends_with('>') {
        return true;
    }
    PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m))
}
