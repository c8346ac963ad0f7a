//! OAuth 2.0 authorization flow for the token custody service.
//!
//! Implements the authorization code flow:
//! 1. GET /auth/login issues a handshake state and redirects to the provider
//! 2. User authorizes on the provider's site
//! 3. Provider redirects back to GET /auth/callback
//! 4. Callback consumes the state, exchanges the code, encrypts and stores
//!    the token pair keyed by the provider's subject id

mod exchange;
mod provider;
mod vault;

pub use exchange::TokenGrant;
pub use provider::ProviderConfig;
pub use vault::{access_token_usable, TokenVault, REFRESH_BUFFER_SECONDS};

use crate::config::{AppConfig, ClientCredentials};
use crate::error::{CallbackError, ExchangeError};
use crate::store::HandshakeStore;
use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, warn};

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for the custody endpoints
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

/// Shared application state for the custody API
#[derive(Clone)]
pub struct OAuthAppState {
    pub config: Arc<AppConfig>,
    pub handshake: Arc<HandshakeStore>,
    pub vault: Arc<TokenVault>,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Create the custody API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/auth/login", get(oauth_login))
        .route("/auth/callback", get(oauth_callback));

    if let Some(frontend) = state.config.frontend_url.as_deref() {
        match frontend.parse::<HeaderValue>() {
            Ok(origin) => router = router.layer(CorsLayer::new().allow_origin(origin)),
            Err(_) => warn!(frontend, "frontend URL is not a valid origin; skipping CORS layer"),
        }
    }

    router.with_state(Arc::new(state))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /auth/login
///
/// Issues a single-use handshake state and redirects the user to the
/// provider's authorization page.
async fn oauth_login(State(state): State<Arc<OAuthAppState>>) -> Result<Redirect, AppError> {
    let creds = require_oauth_config(&state)?;

    let handshake_state = state.handshake.issue().map_err(|e| {
        error!(error = %e, "handshake state creation failed");
        AppError::ServerError("Failed to initialize login.".to_string())
    })?;

    let url = state
        .vault
        .provider()
        .build_authorize_url(&creds, &handshake_state);

    debug!("redirecting to provider authorization page");
    Ok(Redirect::temporary(&url))
}

/// GET /auth/callback
///
/// Validates and consumes the handshake state, exchanges the authorization
/// code, and persists the encrypted token pair.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Response, AppError> {
    require_oauth_config(&state)?;

    if let Some(provider_error) = callback.error {
        warn!(error = %provider_error, "provider reported an authorization error");
        return Err(AppError::BadRequest(format!(
            "Provider authorization error: {}",
            provider_error
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| AppError::BadRequest("Missing authorization code.".to_string()))?;

    let consumed = state
        .handshake
        .consume(callback.state.as_deref().unwrap_or_default())
        .map_err(|e| {
            error!(error = %e, "handshake state lookup failed");
            AppError::ServerError("Failed to validate authorization state.".to_string())
        })?;
    if !consumed {
        // Missing, expired, and replayed states are deliberately one case.
        warn!("authorization state rejected");
        return Err(AppError::BadRequest(
            "Invalid or expired authorization state.".to_string(),
        ));
    }

    let subject_id = state
        .vault
        .complete_authorization(&code)
        .await
        .map_err(|e| {
            error!(error = %e, "authorization callback failed");
            callback_error_response(e)
        })?;

    if let Some(frontend) = state.config.frontend_url.as_deref() {
        return Ok(Redirect::temporary(frontend).into_response());
    }

    Ok(Json(json!({ "status": "connected", "subject_id": subject_id })).into_response())
}

fn require_oauth_config(state: &OAuthAppState) -> Result<ClientCredentials, AppError> {
    let missing = state.config.missing_oauth_vars();
    if !missing.is_empty() {
        return Err(AppError::ServerError(format!(
            "Missing required configuration. Please set {} in your environment.",
            missing.join(", ")
        )));
    }
    if !state.vault.cipher_enabled() {
        return Err(AppError::ServerError(
            "Unable to derive the token encryption key. Use a 64-character hex \
             TROVE_ENCRYPTION_KEY or provide a passphrase with TROVE_ENCRYPTION_SALT configured."
                .to_string(),
        ));
    }
    state
        .config
        .client_credentials()
        .ok_or_else(|| AppError::ServerError("Missing required configuration.".to_string()))
}

fn callback_error_response(err: CallbackError) -> AppError {
    match err {
        CallbackError::Exchange(ExchangeError::InvalidClient) => AppError::Unauthorized(
            "Invalid client credentials. Check TROVE_CLIENT_ID and TROVE_CLIENT_SECRET."
                .to_string(),
        ),
        CallbackError::Exchange(_) => {
            AppError::BadGateway("Failed to exchange authorization code.".to_string())
        }
        CallbackError::Profile(_) => {
            AppError::BadGateway("Failed to fetch provider profile.".to_string())
        }
        CallbackError::NoRefreshToken => AppError::BadGateway(
            "Provider returned no refresh token and no stored token was found. \
             Revoke access in the provider settings and re-authorize."
                .to_string(),
        ),
        CallbackError::StoredRefreshInvalid => {
            AppError::BadGateway("Stored refresh token is invalid.".to_string())
        }
        CallbackError::Crypto => AppError::ServerError("Failed to secure tokens.".to_string()),
        CallbackError::Store(_) => AppError::ServerError("Failed to store tokens.".to_string()),
        CallbackError::Misconfigured(msg) => AppError::ServerError(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_callback_deserialization() {
        // Success case
        let query = "code=auth_code_123&state=csrf_state_456";
        let callback: OAuthCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.code, Some("auth_code_123".to_string()));
        assert_eq!(callback.state, Some("csrf_state_456".to_string()));
        assert_eq!(callback.error, None);

        // Provider error case
        let query = "error=access_denied";
        let callback: OAuthCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.error, Some("access_denied".to_string()));
        assert_eq!(callback.code, None);
        assert_eq!(callback.state, None);
    }

    #[test]
    fn test_callback_error_statuses() {
        let cases = [
            (
                callback_error_response(CallbackError::Exchange(ExchangeError::InvalidClient)),
                StatusCode::UNAUTHORIZED,
            ),
            (
                callback_error_response(CallbackError::Exchange(ExchangeError::Gateway(
                    "502".into(),
                ))),
                StatusCode::BAD_GATEWAY,
            ),
            (
                callback_error_response(CallbackError::NoRefreshToken),
                StatusCode::BAD_GATEWAY,
            ),
            (
                callback_error_response(CallbackError::Crypto),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                callback_error_response(CallbackError::Store("disk full".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
