//! AES-256-GCM encryption for token strings.
//!
//! Each token is sealed with a fresh random nonce. The stored form is a
//! three-part envelope `nonce.tag.ciphertext`, each part base64-encoded.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use super::keys::KEY_SIZE;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Authenticated cipher for token strings.
///
/// Holds the derived master key for the process lifetime. Decryption fails
/// on any malformed envelope or authentication mismatch and never surfaces
/// partial plaintext.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt a token into a `nonce.tag.ciphertext` envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        // Fresh random nonce per call; nonces must never repeat under one key.
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("token encryption failed"))?;

        // The aead crate appends the tag; the envelope carries it separately.
        let (body, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        Ok(format!(
            "{}.{}.{}",
            BASE64.encode(nonce),
            BASE64.encode(tag),
            BASE64.encode(body)
        ))
    }

    /// Decrypt a `nonce.tag.ciphertext` envelope back into the token.
    pub fn decrypt(&self, envelope: &str) -> Result<String> {
        let mut parts = envelope.split('.');
        let (nonce_part, tag_part, body_part) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(n), Some(t), Some(c), None) if !n.is_empty() && !t.is_empty() && !c.is_empty() => {
                    (n, t, c)
                }
                _ => bail!("malformed token envelope"),
            };

        let nonce_bytes = BASE64
            .decode(nonce_part)
            .context("failed to decode envelope nonce")?;
        if nonce_bytes.len() != NONCE_SIZE {
            bail!(
                "invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            );
        }

        let tag = BASE64
            .decode(tag_part)
            .context("failed to decode envelope tag")?;
        if tag.len() != TAG_SIZE {
            bail!("invalid tag size: expected {}, got {}", TAG_SIZE, tag.len());
        }

        let mut sealed = BASE64
            .decode(body_part)
            .context("failed to decode envelope ciphertext")?;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), sealed.as_ref())
            .map_err(|_| anyhow!("token decryption failed"))?;

        String::from_utf8(plaintext).context("decrypted token is not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> TokenCipher {
        TokenCipher::new(&[7u8; KEY_SIZE])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let plaintext = "my-secret-access-token-12345";

        let envelope = cipher.encrypt(plaintext).expect("encryption failed");
        assert_ne!(envelope, plaintext);
        assert_eq!(envelope.split('.').count(), 3);

        let decrypted = cipher.decrypt(&envelope).expect("decryption failed");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let cipher = test_cipher();

        let a = cipher.encrypt("same-plaintext").unwrap();
        let b = cipher.encrypt("same-plaintext").unwrap();
        assert_ne!(a, b);

        assert_eq!(cipher.decrypt(&a).unwrap(), "same-plaintext");
        assert_eq!(cipher.decrypt(&b).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = test_cipher().encrypt("secret").unwrap();
        let other = TokenCipher::new(&[8u8; KEY_SIZE]);
        assert!(other.decrypt(&envelope).is_err());
    }

    #[test]
    fn test_missing_parts_rejected() {
        let cipher = test_cipher();
        let envelope = cipher.encrypt("secret").unwrap();
        let parts: Vec<&str> = envelope.split('.').collect();

        assert!(cipher.decrypt("").is_err());
        assert!(cipher.decrypt("only-one-part").is_err());
        assert!(cipher
            .decrypt(&format!("{}.{}", parts[0], parts[1]))
            .is_err());
        assert!(cipher
            .decrypt(&format!(".{}.{}", parts[1], parts[2]))
            .is_err());
        assert!(cipher
            .decrypt(&format!("{}.{}.{}.extra", parts[0], parts[1], parts[2]))
            .is_err());
    }

    #[test]
    fn test_tampered_tag_fails() {
        let cipher = test_cipher();
        let envelope = cipher.encrypt("secret").unwrap();
        let parts: Vec<&str> = envelope.split('.').collect();

        let tag = BASE64.decode(parts[1]).unwrap();
        for i in 0..tag.len() {
            let mut flipped = tag.clone();
            flipped[i] ^= 0x01;
            let tampered = format!("{}.{}.{}", parts[0], BASE64.encode(&flipped), parts[2]);
            assert!(cipher.decrypt(&tampered).is_err(), "tag byte {} accepted", i);
        }
        // The unmodified envelope still decrypts.
        assert_eq!(cipher.decrypt(&envelope).unwrap(), "secret");
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = test_cipher();
        let envelope = cipher.encrypt("secret-of-reasonable-length").unwrap();
        let parts: Vec<&str> = envelope.split('.').collect();

        let body = BASE64.decode(parts[2]).unwrap();
        for i in 0..body.len() {
            let mut flipped = body.clone();
            flipped[i] ^= 0x01;
            let tampered = format!("{}.{}.{}", parts[0], parts[1], BASE64.encode(&flipped));
            assert!(
                cipher.decrypt(&tampered).is_err(),
                "ciphertext byte {} accepted",
                i
            );
        }
    }

    #[test]
    fn test_bad_nonce_size_rejected() {
        let cipher = test_cipher();
        let envelope = cipher.encrypt("secret").unwrap();
        let parts: Vec<&str> = envelope.split('.').collect();

        let short_nonce = BASE64.encode([0u8; 8]);
        let tampered = format!("{}.{}.{}", short_nonce, parts[1], parts[2]);
        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_garbage_base64_rejected() {
        let cipher = test_cipher();
        assert!(cipher.decrypt("!!!.###.$$$").is_err());
    }
}
