use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};

use lesprivate_common::AppError;

const NONCE_LEN: usize = 12;

/// AES-256-GCM for bank account numbers at rest. Output is base64(nonce || ciphertext).
#[derive(Clone)]
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    pub fn new(key: &str) -> Result<Self, AppError> {
        let key_bytes = key.as_bytes().get(..32).ok_or_else(|| {
            AppError::Internal("Encryption key must be at least 32 characters".to_string())
        })?;

        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| AppError::Internal(format!("Encryption failed: {}", e)))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(&sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String, AppError> {
        let data = general_purpose::STANDARD
            .decode(sealed)
            .map_err(|e| AppError::Internal(format!("Base64 decode failed: {}", e)))?;

        if data.len() <= NONCE_LEN {
            return Err(AppError::Internal("Invalid encrypted data".to_string()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| AppError::Internal(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::Internal(format!("UTF-8 conversion failed: {}", e)))
    }
}

/// Last four characters, the only part of an account number kept in clear.
pub fn last4(account_number: &str) -> String {
    let chars: Vec<char> = account_number.chars().collect();
    chars[chars.len().saturating_sub(4)..].iter().collect()
}

pub fn mask_account(last4: &str) -> String {
    format!("****{}", last4)
}

/// Byte comparison whose running time does not depend on where the inputs differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn short_keys_are_rejected() {
        assert!(EncryptionService::new("too-short").is_err());
    }

    #[test]
    fn sealed_values_open_and_differ_per_call() {
        let service = EncryptionService::new(KEY).unwrap();
        let a = service.encrypt("1234567890").unwrap();
        let b = service.encrypt("1234567890").unwrap();

        assert_ne!(a, b);
        assert_eq!(service.decrypt(&a).unwrap(), "1234567890");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let service = EncryptionService::new(KEY).unwrap();
        let sealed = service.encrypt("1234567890").unwrap();
        let mut raw = general_purpose::STANDARD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        assert!(service
            .decrypt(&general_purpose::STANDARD.encode(&raw))
            .is_err());
    }

    #[test]
    fn masking_keeps_the_tail() {
        assert_eq!(last4("0012345678"), "5678");
        assert_eq!(last4("12"), "12");
        assert_eq!(mask_account("5678"), "****5678");
    }

    #[test]
    fn token_comparison() {
        assert!(constant_time_eq(b"callback", b"callback"));
        assert!(!constant_time_eq(b"callback", b"callbacc"));
        assert!(!constant_time_eq(b"callback", b"call"));
    }
}
