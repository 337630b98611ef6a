//! At-rest encryption for stored provider passwords.
//!
//! AES-128-ECB with PKCS7 padding, base64-armored. The key is derived from
//! the configured secret with SHA-256 (first 16 bytes). ECB is acceptable
//! here: each ciphertext holds a single short secret, not structured data.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use anyhow::{bail, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 16;

#[derive(Clone)]
pub struct PasswordCipher {
    key: [u8; 16],
}

impl PasswordCipher {
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);
        PasswordCipher { key }
    }

    pub fn encrypt(&self, plain: &str) -> String {
        let cipher = Aes128::new(GenericArray::from_slice(&self.key));

        // PKCS7 padding
        let data = plain.as_bytes();
        let padding_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
        let mut padded = data.to_vec();
        padded.extend(std::iter::repeat(padding_len as u8).take(padding_len));

        let mut encrypted = Vec::with_capacity(padded.len());
        for chunk in padded.chunks(BLOCK_SIZE) {
            let mut block = GenericArray::clone_from_slice(chunk);
            cipher.encrypt_block(&mut block);
            encrypted.extend_from_slice(&block);
        }

        STANDARD.encode(encrypted)
    }

    pub fn decrypt(&self, armored: &str) -> Result<String> {
        let data = STANDARD.decode(armored)?;
        if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
            bail!("ciphertext length is not a multiple of the AES block size");
        }

        let cipher = Aes128::new(GenericArray::from_slice(&self.key));
        let mut decrypted = Vec::with_capacity(data.len());
        for chunk in data.chunks(BLOCK_SIZE) {
            let mut block = GenericArray::clone_from_slice(chunk);
            cipher.decrypt_block(&mut block);
            decrypted.extend_from_slice(&block);
        }

        let pad_len = *decrypted.last().unwrap_or(&0) as usize;
        if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > decrypted.len() {
            bail!("invalid PKCS7 padding");
        }
        let valid = decrypted[decrypted.len() - pad_len..]
            .iter()
            .all(|&b| b == pad_len as u8);
        if !valid {
            bail!("invalid PKCS7 padding");
        }
        decrypted.truncate(decrypted.len() - pad_len);

        Ok(String::from_utf8(decrypted)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = PasswordCipher::new("unit-test-secret");
        let encrypted = cipher.encrypt("hunter2");
        assert_ne!(encrypted, "hunter2");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "hunter2");
    }

    #[test]
    fn test_roundtrip_block_aligned_input() {
        // 16-byte input forces a full extra padding block
        let cipher = PasswordCipher::new("unit-test-secret");
        let plain = "0123456789abcdef";
        assert_eq!(cipher.decrypt(&cipher.encrypt(plain)).unwrap(), plain);
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        let cipher = PasswordCipher::new("unit-test-secret");
        assert!(cipher.decrypt("not base64 at all!!").is_err());
        assert!(cipher.decrypt(&STANDARD.encode(b"short")).is_err());
    }

    #[test]
    fn test_different_secrets_do_not_interoperate() {
        let a = PasswordCipher::new("secret-a");
        let b = PasswordCipher::new("secret-b");
        let encrypted = a.encrypt("hunter2");
        match b.decrypt(&encrypted) {
            Ok(plain) => assert_ne!(plain, "hunter2"),
            Err(_) => {}
        }
    }
}
