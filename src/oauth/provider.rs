//! Provider endpoint configuration.
//!
//! The integrated provider is Spotify; the endpoints are overridable from
//! the environment so a deployment can sit behind a proxy and tests can
//! point at a local double.

use crate::config::ClientCredentials;

const SPOTIFY_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SPOTIFY_PROFILE_URL: &str = "https://api.spotify.com/v1/me";

/// Provider endpoint set
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Authorization page the user is redirected to
    pub authorize_url: String,

    /// Token exchange endpoint (code and refresh grants)
    pub token_url: String,

    /// Profile endpoint used to identify the subject
    pub profile_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authorize_url: SPOTIFY_AUTHORIZE_URL.to_string(),
            token_url: SPOTIFY_TOKEN_URL.to_string(),
            profile_url: SPOTIFY_PROFILE_URL.to_string(),
        }
    }
}

impl ProviderConfig {
    /// Load endpoint overrides from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            authorize_url: env_url("TROVE_AUTHORIZE_URL").unwrap_or(defaults.authorize_url),
            token_url: env_url("TROVE_TOKEN_URL").unwrap_or(defaults.token_url),
            profile_url: env_url("TROVE_PROFILE_URL").unwrap_or(defaults.profile_url),
        }
    }

    /// Build the authorization redirect URL carrying the handshake state.
    pub fn build_authorize_url(&self, creds: &ClientCredentials, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&scope={}&redirect_uri={}&state={}",
            self.authorize_url,
            urlencoding::encode(&creds.client_id),
            urlencoding::encode(&creds.scopes),
            urlencoding::encode(&creds.redirect_uri),
            urlencoding::encode(state)
        )
    }
}

fn env_url(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
