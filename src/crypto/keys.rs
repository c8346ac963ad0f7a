//! Master key derivation.
//!
//! The operator supplies either a 64-hex-digit literal (decoded directly as
//! the 32-byte key) or a passphrase. Passphrases are stretched with scrypt
//! and require a salt; outside production a deterministic hostname-based
//! salt is synthesized so local setups work without extra configuration.

use scrypt::{scrypt, Params as ScryptParams};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;

/// Size of the derived key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Length of a hex-literal key value
const HEX_KEY_LEN: usize = 64;

/// Context string mixed into the fallback salt
const FALLBACK_SALT_CONTEXT: &str = "trove-token";

/// Errors from master key derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDerivationError {
    /// A passphrase key requires a salt in production
    MissingSalt,
    /// The key derivation function itself failed
    Derivation(String),
}

impl fmt::Display for KeyDerivationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyDerivationError::MissingSalt => write!(
                f,
                "a salt is required when the encryption key is a passphrase in production"
            ),
            KeyDerivationError::Derivation(msg) => write!(f, "key derivation failed: {}", msg),
        }
    }
}

impl std::error::Error for KeyDerivationError {}

/// Derive the 32-byte master key from an operator-supplied secret.
///
/// A secret matching the 64-hex-digit pattern is decoded directly. Anything
/// else is treated as a passphrase and stretched with scrypt; the salt is
/// required in production and synthesized from the host name otherwise.
pub fn derive_key(
    secret: &str,
    salt: Option<&str>,
    production: bool,
) -> Result<[u8; KEY_SIZE], KeyDerivationError> {
    if is_hex_key(secret) {
        let bytes = hex::decode(secret)
            .map_err(|e| KeyDerivationError::Derivation(e.to_string()))?;
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    let owned_salt;
    let salt = match salt {
        Some(value) => value,
        None if production => return Err(KeyDerivationError::MissingSalt),
        None => {
            owned_salt = fallback_salt();
            warn!(
                "no encryption salt configured; using a deterministic hostname-based salt. \
                 This is insecure for production."
            );
            &owned_salt
        }
    };

    // N=16384, r=8, p=1: interactive-login cost, deliberately slow.
    let params = ScryptParams::new(14, 8, 1, KEY_SIZE)
        .map_err(|e| KeyDerivationError::Derivation(e.to_string()))?;
    let mut key = [0u8; KEY_SIZE];
    scrypt(secret.as_bytes(), salt.as_bytes(), &params, &mut key)
        .map_err(|e| KeyDerivationError::Derivation(e.to_string()))?;
    Ok(key)
}

fn is_hex_key(value: &str) -> bool {
    value.len() == HEX_KEY_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Deterministic development-only salt derived from the local host identity.
fn fallback_salt() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let digest = Sha256::digest(format!("{}:{}", FALLBACK_SALT_CONTEXT, host).as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_hex_key_decoded_directly() {
        let key = derive_key(HEX_KEY, None, true).unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[1], 0x01);
        assert_eq!(key[31], 0x1f);
    }

    #[test]
    fn test_hex_key_is_deterministic() {
        let a = derive_key(HEX_KEY, None, false).unwrap();
        let b = derive_key(HEX_KEY, Some("ignored-salt"), true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_uppercase_hex_key_accepted() {
        let upper = HEX_KEY.to_uppercase();
        assert_eq!(
            derive_key(&upper, None, true).unwrap(),
            derive_key(HEX_KEY, None, true).unwrap()
        );
    }

    #[test]
    fn test_passphrase_derivation_is_deterministic() {
        let a = derive_key("correct horse battery staple", Some("salt-1"), true).unwrap();
        let b = derive_key("correct horse battery staple", Some("salt-1"), true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_passphrase_derivation_varies_with_inputs() {
        let base = derive_key("passphrase", Some("salt-1"), true).unwrap();
        let other_salt = derive_key("passphrase", Some("salt-2"), true).unwrap();
        let other_pass = derive_key("passphrase!", Some("salt-1"), true).unwrap();
        assert_ne!(base, other_salt);
        assert_ne!(base, other_pass);
    }

    #[test]
    fn test_passphrase_without_salt_fails_in_production() {
        let result = derive_key("passphrase", None, true);
        assert_eq!(result, Err(KeyDerivationError::MissingSalt));
    }

    #[test]
    fn test_passphrase_without_salt_uses_fallback_outside_production() {
        // The fallback salt is host-deterministic, so two derivations agree.
        let a = derive_key("passphrase", None, false).unwrap();
        let b = derive_key("passphrase", None, false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_63_hex_digits_is_a_passphrase() {
        // One digit short of a literal key, so it needs a salt.
        let almost = &HEX_KEY[..63];
        assert_eq!(derive_key(almost, None, true), Err(KeyDerivationError::MissingSalt));
        assert!(derive_key(almost, Some("salt"), true).is_ok());
    }
}
