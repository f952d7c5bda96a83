//! Symmetric encryption for stored conversation payloads and the per-chat
//! context files. AES-256-GCM, one process-level key loaded at startup.
//!
//! Token format: `enc::` + base64(nonce[12] ‖ ciphertext+tag). Strings without
//! the prefix are legacy plaintext and pass through `decrypt` unchanged, so
//! readers never have to know which era a row was written in.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine as _;
use thiserror::Error;
use tracing::info;

/// Sentinel prefix identifying an encrypted payload.
pub const ENC_PREFIX: &str = "enc::";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Env var carrying the base64 key. Takes precedence over the key file.
pub const KEY_ENV_VAR: &str = "CHARLA_CONTEXT_KEY";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be {KEY_LEN} bytes")]
    InvalidKey,

    #[error("payload is not valid base64")]
    Malformed,

    #[error("ciphertext too short")]
    TooShort,

    #[error("decryption failed (wrong key or corrupted data)")]
    Failed,

    #[error("decrypted payload is not UTF-8")]
    NotUtf8,

    #[error("key storage error: {0}")]
    KeyStorage(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct ContextCipher {
    cipher: Aes256Gcm,
}

impl ContextCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Resolve the process key: CHARLA_CONTEXT_KEY env var (base64) when set,
    /// otherwise a key file — generated on first run with owner-only
    /// permissions on POSIX.
    pub fn from_env_or_file(key_file: &std::path::Path) -> Result<Self, CryptoError> {
        if let Ok(b64) = std::env::var(KEY_ENV_VAR) {
            let key = base64::engine::general_purpose::STANDARD
                .decode(b64.trim())
                .map_err(|_| CryptoError::Malformed)?;
            return Self::new(&key);
        }

        if key_file.exists() {
            let b64 = std::fs::read_to_string(key_file)?;
            let key = base64::engine::general_purpose::STANDARD
                .decode(b64.trim())
                .map_err(|_| CryptoError::Malformed)?;
            return Self::new(&key);
        }

        // First run: generate and persist a fresh key.
        use rand::Rng;
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill(&mut key[..]);
        if let Some(parent) = key_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let b64 = base64::engine::general_purpose::STANDARD.encode(key);
        std::fs::write(key_file, &b64)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(key_file, std::fs::Permissions::from_mode(0o600))?;
        }
        info!(path = %key_file.display(), "generated new context encryption key");
        Self::new(&key)
    }

    /// Encrypt a UTF-8 string into an opaque `enc::` token.
    pub fn encrypt(&self, text: &str) -> String {
        use rand::Rng;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // Aead::encrypt only fails on absurd plaintext lengths.
        let ciphertext = self
            .cipher
            .encrypt(nonce, text.as_bytes())
            .expect("AES-GCM encryption");

        let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        packed.extend_from_slice(&nonce_bytes);
        packed.extend_from_slice(&ciphertext);

        format!(
            "{}{}",
            ENC_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(packed)
        )
    }

    /// Decrypt an `enc::` token. Strings without the prefix are legacy
    /// plaintext and are returned as-is.
    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let Some(encoded) = stored.strip_prefix(ENC_PREFIX) else {
            return Ok(stored.to_string());
        };

        let packed = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::Malformed)?;
        if packed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::TooShort);
        }

        let (nonce_bytes, ciphertext) = packed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Failed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::NotUtf8)
    }
}

/// Whether a stored string carries the encryption sentinel.
pub fn is_encrypted(stored: &str) -> bool {
    stored.starts_with(ENC_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> ContextCipher {
        ContextCipher::new(&[0x42u8; 32]).unwrap()
    }

    #[test]
    fn roundtrip_utf8() {
        let cipher = test_cipher();
        let plaintext = "hola, ¿cómo estás? — emoji: 🙂";
        let token = cipher.encrypt(plaintext);
        assert!(token.starts_with(ENC_PREFIX));
        assert_ne!(token, plaintext);
        assert_eq!(cipher.decrypt(&token).unwrap(), plaintext);
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let cipher = test_cipher();
        assert_eq!(cipher.decrypt("texto sin cifrar").unwrap(), "texto sin cifrar");
    }

    #[test]
    fn tampered_token_fails() {
        let cipher = test_cipher();
        let mut token = cipher.encrypt("mensaje");
        // Flip a character inside the base64 body.
        let flipped = if token.ends_with('A') { 'B' } else { 'A' };
        token.pop();
        token.push(flipped);
        assert!(cipher.decrypt(&token).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let a = test_cipher();
        let b = ContextCipher::new(&[0x17u8; 32]).unwrap();
        let token = a.encrypt("secreto");
        assert!(matches!(b.decrypt(&token), Err(CryptoError::Failed)));
    }

    #[test]
    fn short_token_rejected() {
        let cipher = test_cipher();
        let short = format!("{}{}", ENC_PREFIX, base64::engine::general_purpose::STANDARD.encode([0u8; 8]));
        assert!(matches!(cipher.decrypt(&short), Err(CryptoError::TooShort)));
    }

    #[test]
    fn key_file_created_with_owner_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("context.key");
        let cipher = ContextCipher::from_env_or_file(&key_path).unwrap();
        assert!(key_path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        // Second load reuses the same key.
        let again = ContextCipher::from_env_or_file(&key_path).unwrap();
        let token = cipher.encrypt("persistente");
        assert_eq!(again.decrypt(&token).unwrap(), "persistente");
    }
}
