//! Key derivation and at-rest encryption for OAuth tokens.
//!
//! The master key is derived once at startup, either from a 64-hex-digit
//! literal or from a passphrase stretched with scrypt. All stored tokens are
//! encrypted with AES-256-GCM under that key; if no key can be derived, the
//! cipher is never constructed and every custody operation fails closed.

mod cipher;
mod keys;

pub use cipher::TokenCipher;
pub use keys::{derive_key, KeyDerivationError, KEY_SIZE};
