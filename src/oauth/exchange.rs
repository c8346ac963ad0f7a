//! Provider token exchanges and profile lookup.
//!
//! Handles the authorization-code and refresh-token grants against the
//! provider's token endpoint, plus the profile fetch used to identify the
//! subject. Responses are validated into [`TokenGrant`] before any caller
//! sees them; a missing access token or expiry is a shape failure, not a
//! value that propagates.

use crate::config::ClientCredentials;
use crate::error::ExchangeError;
use serde::Deserialize;
use tracing::debug;

/// Wire shape of the provider token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// A validated token grant from the provider
#[derive(Clone, Debug)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when the provider declines to rotate the refresh token
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope: Option<String>,
    /// Lifetime of the access token in seconds, validated positive
    pub expires_in: i64,
}

/// Wire shape of the provider profile response
#[derive(Deserialize, Debug)]
pub struct UserProfile {
    pub id: String,
}

/// Exchange an authorization code for the initial token pair.
pub async fn exchange_authorization_code(
    http: &reqwest::Client,
    token_url: &str,
    creds: &ClientCredentials,
    code: &str,
) -> Result<TokenGrant, ExchangeError> {
    debug!("exchanging authorization code at {}", token_url);
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", creds.redirect_uri.as_str()),
    ];
    token_request(http, token_url, creds, &form).await
}

/// Exchange a refresh token for a fresh access token.
pub async fn exchange_refresh_token(
    http: &reqwest::Client,
    token_url: &str,
    creds: &ClientCredentials,
    refresh_token: &str,
) -> Result<TokenGrant, ExchangeError> {
    debug!("exchanging refresh token at {}", token_url);
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ];
    token_request(http, token_url, creds, &form).await
}

/// Fetch the provider profile identifying the subject.
pub async fn fetch_profile(
    http: &reqwest::Client,
    profile_url: &str,
    access_token: &str,
) -> Result<UserProfile, ExchangeError> {
    let response = http
        .get(profile_url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| ExchangeError::Gateway(format!("failed to send profile request: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(ExchangeError::Gateway(format!(
            "profile endpoint returned {}: {}",
            status, body
        )));
    }

    let profile: UserProfile = response
        .json()
        .await
        .map_err(|e| ExchangeError::Shape(format!("failed to parse profile response: {}", e)))?;

    if profile.id.trim().is_empty() {
        return Err(ExchangeError::Shape("profile id is empty".to_string()));
    }

    Ok(profile)
}

async fn token_request(
    http: &reqwest::Client,
    token_url: &str,
    creds: &ClientCredentials,
    form: &[(&str, &str)],
) -> Result<TokenGrant, ExchangeError> {
    let response = http
        .post(token_url)
        .basic_auth(&creds.client_id, Some(&creds.client_secret))
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| ExchangeError::Gateway(format!("failed to send token request: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        if is_invalid_client(&body) {
            return Err(ExchangeError::InvalidClient);
        }
        return Err(ExchangeError::Gateway(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|e| ExchangeError::Shape(format!("failed to parse token response: {}", e)))?;

    debug!(
        has_refresh_token = payload.refresh_token.is_some(),
        expires_in = ?payload.expires_in,
        "token exchange successful"
    );

    validate(payload)
}

fn validate(payload: TokenResponse) -> Result<TokenGrant, ExchangeError> {
    if payload.access_token.trim().is_empty() {
        return Err(ExchangeError::Shape(
            "response did not include an access token".to_string(),
        ));
    }

    let expires_in = payload
        .expires_in
        .ok_or_else(|| ExchangeError::Shape("token expiration is missing".to_string()))?;
    if expires_in <= 0 {
        return Err(ExchangeError::Shape(
            "token expiration must be a positive number".to_string(),
        ));
    }

    Ok(TokenGrant {
        access_token: payload.access_token,
        refresh_token: payload
            .refresh_token
            .filter(|token| !token.trim().is_empty()),
        token_type: payload
            .token_type
            .unwrap_or_else(|| "Bearer".to_string()),
        scope: payload.scope,
        expires_in,
    })
}

/// The provider reports bad client credentials as `{"error": "invalid_client"}`.
fn is_invalid_client(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.as_str())
                .map(|e| e == "invalid_client")
        })
        .unwrap_or(false)
}
