//! Error taxonomy for the token custody core.
//!
//! Every custody operation converts internal failures into one of these
//! typed results before reaching the transport layer; nothing propagates as
//! an unhandled fault across that boundary.

use std::fmt;

/// Why an access-token resolution failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No stored record for the subject. The user has never authorized.
    NotConnected,
    /// A stored credential could not be decrypted. The user must re-authenticate.
    Reauthenticate,
    /// The provider refresh exchange failed. The caller may retry later.
    RefreshFailed(String),
    /// Missing configuration: encryption key or client credentials.
    Misconfigured(String),
    /// The persistent store was unavailable or a write failed.
    Unavailable(String),
}

impl ResolveError {
    /// How the failure should be surfaced by the transport layer.
    pub fn status_hint(&self) -> StatusHint {
        match self {
            ResolveError::NotConnected | ResolveError::Reauthenticate => StatusHint::NotConnected,
            ResolveError::RefreshFailed(_) | ResolveError::Unavailable(_) => StatusHint::Transient,
            ResolveError::Misconfigured(_) => StatusHint::Misconfigured,
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NotConnected => {
                write!(f, "account is not connected; authorization is required")
            }
            ResolveError::Reauthenticate => {
                write!(f, "stored credential is invalid; re-authentication is required")
            }
            ResolveError::RefreshFailed(msg) => write!(f, "token refresh failed: {}", msg),
            ResolveError::Misconfigured(msg) => write!(f, "service misconfigured: {}", msg),
            ResolveError::Unavailable(msg) => write!(f, "token store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Coarse classification of a resolution failure for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusHint {
    /// The client must restart authorization.
    NotConnected,
    /// Transient failure; the client may retry.
    Transient,
    /// Server-side misconfiguration; retrying will not help.
    Misconfigured,
}

/// Why completing an authorization callback failed.
#[derive(Debug)]
pub enum CallbackError {
    /// The code-for-token exchange failed.
    Exchange(ExchangeError),
    /// The profile fetch needed to identify the subject failed.
    Profile(String),
    /// The provider omitted a refresh token and no stored record exists.
    /// The user must revoke access at the provider and reconnect.
    NoRefreshToken,
    /// The provider omitted a refresh token and the stored one is undecryptable.
    StoredRefreshInvalid,
    /// Encrypting the received tokens failed.
    Crypto,
    /// Persisting the record failed.
    Store(String),
    /// Missing configuration: encryption key or client credentials.
    Misconfigured(String),
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackError::Exchange(err) => write!(f, "token exchange failed: {}", err),
            CallbackError::Profile(msg) => write!(f, "profile fetch failed: {}", msg),
            CallbackError::NoRefreshToken => write!(
                f,
                "provider returned no refresh token and no stored token was found"
            ),
            CallbackError::StoredRefreshInvalid => {
                write!(f, "stored refresh token is invalid")
            }
            CallbackError::Crypto => write!(f, "failed to secure tokens"),
            CallbackError::Store(msg) => write!(f, "failed to store tokens: {}", msg),
            CallbackError::Misconfigured(msg) => write!(f, "service misconfigured: {}", msg),
        }
    }
}

impl std::error::Error for CallbackError {}

/// Why a provider exchange round-trip failed.
#[derive(Debug)]
pub enum ExchangeError {
    /// The provider explicitly rejected the client credentials.
    InvalidClient,
    /// Transport failure or non-success response.
    Gateway(String),
    /// The response parsed but violated the expected shape.
    Shape(String),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::InvalidClient => write!(f, "provider rejected the client credentials"),
            ExchangeError::Gateway(msg) => write!(f, "provider exchange failed: {}", msg),
            ExchangeError::Shape(msg) => write!(f, "malformed provider response: {}", msg),
        }
    }
}

impl std::error::Error for ExchangeError {}
