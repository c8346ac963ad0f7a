use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use trove::config::AppConfig;
use trove::crypto::{derive_key, TokenCipher};
use trove::oauth::{create_oauth_router, OAuthAppState, ProviderConfig, TokenVault};
use trove::store::{run_state_cleanup, HandshakeStore, TokenRecordStore, STATE_TTL_SECONDS};

/// How often expired handshake states are swept
const STATE_CLEANUP_INTERVAL_SECONDS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trove=info".into()),
        )
        .init();

    let config = AppConfig::from_env();
    if config.production {
        config.validate_strict()?;
    }

    let cipher = build_cipher(&config)?;
    if cipher.is_none() {
        warn!("token encryption is disabled; custody endpoints will reject requests");
    }

    let handshake = Arc::new(
        HandshakeStore::new(&config.database_path, STATE_TTL_SECONDS)
            .context("failed to open handshake state store")?,
    );
    let records = Arc::new(
        TokenRecordStore::new(&config.database_path)
            .context("failed to open token record store")?,
    );

    let vault = Arc::new(TokenVault::new(
        records,
        cipher,
        config.client_credentials(),
        ProviderConfig::from_env(),
    ));

    tokio::spawn(run_state_cleanup(
        handshake.clone(),
        STATE_CLEANUP_INTERVAL_SECONDS,
    ));

    let config = Arc::new(config);
    let app = create_oauth_router(OAuthAppState {
        config: config.clone(),
        handshake,
        vault,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "trove listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Derive the master key and construct the cipher.
///
/// Production refuses to start on a derivation failure; elsewhere the
/// server runs with the cipher disabled and the custody endpoints reject.
fn build_cipher(config: &AppConfig) -> Result<Option<TokenCipher>> {
    let Some(secret) = config.encryption_secret.as_deref() else {
        return Ok(None);
    };

    match derive_key(secret, config.encryption_salt.as_deref(), config.production) {
        Ok(key) => Ok(Some(TokenCipher::new(&key))),
        Err(e) if config.production => {
            Err(e).context("token encryption key derivation failed")
        }
        Err(e) => {
            error!(error = %e, "token encryption key derivation failed; cipher disabled");
            Ok(None)
        }
    }
}
