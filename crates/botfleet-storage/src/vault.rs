// AES-256-GCM credential vault
//
// Payload layout: base64(nonce || ciphertext || tag). A fresh random nonce
// per call makes encryption non-deterministic; GCM authentication makes
// decryption fail closed on any tampered input.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

use botfleet_core::{CredentialVault, VaultError};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Environment variable holding the base64-encoded 32-byte vault key
pub const VAULT_KEY_ENV: &str = "VAULT_KEY";

/// Production credential vault
#[derive(Clone)]
pub struct TokenVault {
    cipher: Aes256Gcm,
}

impl TokenVault {
    /// Create from a base64-encoded 32-byte key
    pub fn new(key_b64: &str) -> Result<Self, VaultError> {
        let key_bytes = BASE64
            .decode(key_b64.trim())
            .map_err(|e| VaultError::InvalidKey(format!("key is not valid base64: {e}")))?;

        if key_bytes.len() != KEY_SIZE {
            return Err(VaultError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_SIZE,
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| VaultError::InvalidKey(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// Create from the `VAULT_KEY` environment variable
    pub fn from_env() -> Result<Self, VaultError> {
        let key = std::env::var(VAULT_KEY_ENV)
            .map_err(|_| VaultError::InvalidKey(format!("{VAULT_KEY_ENV} not set")))?;
        Self::new(&key)
    }
}

impl CredentialVault for TokenVault {
    fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Crypto(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    fn decrypt(&self, payload: &str) -> Result<String, VaultError> {
        let combined = BASE64
            .decode(payload)
            .map_err(|e| VaultError::Malformed(format!("payload is not valid base64: {e}")))?;

        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err(VaultError::Malformed("payload too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::Authentication)
    }
}

/// Generate a fresh random vault key in base64 form
pub fn generate_vault_key() -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> TokenVault {
        TokenVault::new(&generate_vault_key()).unwrap()
    }

    #[test]
    fn roundtrip() {
        let vault = vault();
        let token = "123456789:AAHrZn9cXWp0qkLm3vTyBdEfGh1iJkLmNo5";
        let encrypted = vault.encrypt(token).unwrap();
        assert_eq!(vault.decrypt(&encrypted).unwrap(), token);
    }

    #[test]
    fn encryption_is_non_deterministic() {
        let vault = vault();
        let a = vault.encrypt("same-token").unwrap();
        let b = vault.encrypt("same-token").unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.decrypt(&a).unwrap(), "same-token");
        assert_eq!(vault.decrypt(&b).unwrap(), "same-token");
    }

    #[test]
    fn tampered_payload_fails_closed() {
        let vault = vault();
        let encrypted = vault.encrypt("secret").unwrap();

        let mut bytes = BASE64.decode(&encrypted).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);

        assert!(matches!(
            vault.decrypt(&tampered),
            Err(VaultError::Authentication)
        ));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let encrypted = vault().encrypt("secret").unwrap();
        let other = vault();
        assert!(matches!(
            other.decrypt(&encrypted),
            Err(VaultError::Authentication)
        ));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let vault = vault();
        assert!(matches!(
            vault.decrypt("not-base64!!!"),
            Err(VaultError::Malformed(_))
        ));
        assert!(matches!(
            vault.decrypt(&BASE64.encode([0u8; 8])),
            Err(VaultError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(TokenVault::new("short").is_err());
        assert!(TokenVault::new(&BASE64.encode([0u8; 16])).is_err());
    }
}
