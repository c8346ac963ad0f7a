//! Token custody and refresh orchestration.
//!
//! The vault owns the record store, the cipher, and the provider client.
//! It is the only writer of token fields: the callback path persists the
//! initial grant, and `resolve_access_token` keeps a usable access token
//! available on demand, refreshing behind a safety buffer.
//!
//! Two concurrent refreshes for one subject are tolerated: each derives a
//! self-consistent (token, expiry) pair and the store's atomic upsert makes
//! the outcome last-write-wins rather than interleaved.

use crate::config::ClientCredentials;
use crate::crypto::TokenCipher;
use crate::error::{CallbackError, ExchangeError, ResolveError};
use crate::oauth::exchange::{self, TokenGrant};
use crate::oauth::provider::ProviderConfig;
use crate::store::{TokenRecord, TokenRecordStore};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Safety margin before the recorded expiry at which a cached access token
/// stops being handed out. Absorbs clock skew and in-flight request latency.
pub const REFRESH_BUFFER_SECONDS: i64 = 60;

/// Single wait before re-reading the record when the provider omits a
/// refresh token on the initial grant and a concurrent write may be racing.
const RECORD_RACE_RETRY_DELAY_MS: u64 = 100;

/// Whether a cached access token can still be handed out at `now`.
pub fn access_token_usable(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at - now > Duration::seconds(REFRESH_BUFFER_SECONDS)
}

/// Custody engine for per-subject token records.
pub struct TokenVault {
    records: Arc<TokenRecordStore>,
    cipher: Option<TokenCipher>,
    credentials: Option<ClientCredentials>,
    provider: ProviderConfig,
    http: reqwest::Client,
}

impl TokenVault {
    pub fn new(
        records: Arc<TokenRecordStore>,
        cipher: Option<TokenCipher>,
        credentials: Option<ClientCredentials>,
        provider: ProviderConfig,
    ) -> Self {
        Self {
            records,
            cipher,
            credentials,
            provider,
            http: reqwest::Client::new(),
        }
    }

    /// False when no master key could be derived; every custody operation
    /// then fails closed.
    pub fn cipher_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Return a usable access token for the subject, refreshing if needed.
    ///
    /// Never retries a failed exchange and never touches the stored record
    /// when the exchange fails; retry policy belongs to the caller.
    pub async fn resolve_access_token(&self, subject_id: &str) -> Result<String, ResolveError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| ResolveError::Misconfigured("token encryption key unavailable".into()))?;

        let record = self
            .records
            .get(subject_id)
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?
            .ok_or(ResolveError::NotConnected)?;

        let access_token = match cipher.decrypt(&record.access_token) {
            Ok(token) => token,
            Err(_) => {
                warn!(subject = %subject_id, "stored access token failed to decrypt");
                return Err(ResolveError::Reauthenticate);
            }
        };

        if access_token_usable(record.expires_at, Utc::now()) {
            return Ok(access_token);
        }

        let refresh_token = match cipher.decrypt(&record.refresh_token) {
            Ok(token) => token,
            Err(_) => {
                warn!(subject = %subject_id, "stored refresh token failed to decrypt");
                return Err(ResolveError::Reauthenticate);
            }
        };

        let creds = self.credentials.as_ref().ok_or_else(|| {
            ResolveError::Misconfigured("OAuth client credentials unavailable".into())
        })?;

        debug!(subject = %subject_id, "access token expiring; refreshing");
        let grant =
            exchange::exchange_refresh_token(&self.http, &self.provider.token_url, creds, &refresh_token)
                .await
                .map_err(|e| match e {
                    ExchangeError::InvalidClient => {
                        ResolveError::Misconfigured("provider rejected the client credentials".into())
                    }
                    other => ResolveError::RefreshFailed(other.to_string()),
                })?;

        // The provider may decline to rotate the refresh token; the stored
        // one must survive in that case, never be blanked.
        let refresh_plain = match grant.refresh_token.clone() {
            Some(token) => token,
            None => {
                warn!(subject = %subject_id, "provider omitted refresh token; retaining stored token");
                refresh_token
            }
        };

        let new_record = self
            .encrypt_record(cipher, subject_id, &grant, &refresh_plain)
            .map_err(|_| ResolveError::Reauthenticate)?;
        self.records
            .upsert(&new_record)
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;

        info!(subject = %subject_id, "access token refreshed");
        Ok(grant.access_token)
    }

    /// Complete the initial authorization grant for an exchanged code.
    ///
    /// Returns the subject id the record was persisted under.
    pub async fn complete_authorization(&self, code: &str) -> Result<String, CallbackError> {
        let cipher = self.cipher.as_ref().ok_or_else(|| {
            CallbackError::Misconfigured("token encryption key unavailable".into())
        })?;
        let creds = self.credentials.as_ref().ok_or_else(|| {
            CallbackError::Misconfigured("OAuth client credentials unavailable".into())
        })?;

        let grant =
            exchange::exchange_authorization_code(&self.http, &self.provider.token_url, creds, code)
                .await
                .map_err(CallbackError::Exchange)?;

        let profile = exchange::fetch_profile(&self.http, &self.provider.profile_url, &grant.access_token)
            .await
            .map_err(|e| CallbackError::Profile(e.to_string()))?;

        let refresh_plain = match grant.refresh_token.clone() {
            Some(token) => token,
            None => self.recover_stored_refresh(cipher, &profile.id).await?,
        };

        let record = self
            .encrypt_record(cipher, &profile.id, &grant, &refresh_plain)
            .map_err(|_| CallbackError::Crypto)?;
        self.records
            .upsert(&record)
            .map_err(|e| CallbackError::Store(e.to_string()))?;

        info!(subject = %profile.id, "authorization completed");
        Ok(profile.id)
    }

    /// The provider omits the refresh token when access was previously
    /// granted and not revoked. The record for the subject may still be in
    /// flight from a concurrent callback, so allow one short wait and one
    /// re-read before declaring the grant unrecoverable.
    async fn recover_stored_refresh(
        &self,
        cipher: &TokenCipher,
        subject_id: &str,
    ) -> Result<String, CallbackError> {
        let mut existing = self
            .records
            .get(subject_id)
            .map_err(|e| CallbackError::Store(e.to_string()))?;
        if existing.is_none() {
            tokio::time::sleep(tokio::time::Duration::from_millis(RECORD_RACE_RETRY_DELAY_MS)).await;
            existing = self
                .records
                .get(subject_id)
                .map_err(|e| CallbackError::Store(e.to_string()))?;
        }

        let record = existing.ok_or(CallbackError::NoRefreshToken)?;
        let token = cipher
            .decrypt(&record.refresh_token)
            .map_err(|_| CallbackError::StoredRefreshInvalid)?;

        warn!(subject = %subject_id, "provider omitted refresh token; retaining stored token");
        Ok(token)
    }

    fn encrypt_record(
        &self,
        cipher: &TokenCipher,
        subject_id: &str,
        grant: &TokenGrant,
        refresh_plain: &str,
    ) -> Result<TokenRecord> {
        Ok(TokenRecord {
            subject_id: subject_id.to_string(),
            access_token: cipher.encrypt(&grant.access_token)?,
            refresh_token: cipher.encrypt(refresh_plain)?,
            token_type: grant.token_type.clone(),
            scope: grant.scope.clone(),
            expires_at: Utc::now() + Duration::seconds(grant.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usable_outside_buffer() {
        let now = Utc::now();
        assert!(access_token_usable(now + Duration::minutes(10), now));
        assert!(access_token_usable(now + Duration::seconds(61), now));
    }

    #[test]
    fn test_token_unusable_inside_buffer() {
        let now = Utc::now();
        assert!(!access_token_usable(now + Duration::seconds(30), now));
        assert!(!access_token_usable(now + Duration::seconds(60), now));
        assert!(!access_token_usable(now, now));
        assert!(!access_token_usable(now - Duration::seconds(10), now));
    }
}
