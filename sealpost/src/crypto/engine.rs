use std::sync::Arc;

use super::group::GroupOperation;
use super::types::{Ciphertext, KeyPair, Point, Scalar};
use crate::error::CryptoError;

/// El Gamal-style encryption over a pluggable [`GroupOperation`].
///
/// The shared point is rendered as lowercase hex and used directly as a
/// repeating XOR mask. There is no authentication tag: a tampered `c2`
/// decrypts to different text without an error.
#[derive(Debug, Clone)]
pub struct CryptoEngine {
    group: Arc<dyn GroupOperation>,
}

impl CryptoEngine {
    pub fn new(group: Arc<dyn GroupOperation>) -> Self {
        Self { group }
    }

    pub fn group(&self) -> &Arc<dyn GroupOperation> {
        &self.group
    }

    /// Derive a key pair from a private scalar
    pub fn key_pair(&self, private_key: Scalar) -> Result<KeyPair, CryptoError> {
        let public_key = self.group.combine(&private_key, &self.group.base_point())?;
        Ok(KeyPair {
            private_key,
            public_key,
        })
    }

    /// Encrypt `message` for the holder of `recipient_public_key`
    pub fn encrypt(
        &self,
        message: &str,
        recipient_public_key: &Point,
    ) -> Result<Ciphertext, CryptoError> {
        let ephemeral = self.group.random_scalar();
        let shared = self.group.combine(&ephemeral, recipient_public_key)?;
        let c1 = self.group.combine(&ephemeral, &self.group.base_point())?;

        let mask = derive_mask_key(&shared, message.chars().count() * 2);
        let c2 = xor_mask(message, &mask)?;

        Ok(Ciphertext { c1, c2 })
    }

    /// Recover the plaintext from `(c1, c2)` with the recipient's private key
    pub fn decrypt(&self, c1: &Point, c2: &str, private_key: &Scalar) -> Result<String, CryptoError> {
        let shared = self.group.combine(private_key, c1)?;
        let mask = derive_mask_key(&shared, c2.chars().count());
        xor_mask(c2, &mask)
    }
}

/// Hex rendering of the shared point, truncated to at most `len` digits
pub fn derive_mask_key(shared: &Point, len: usize) -> String {
    let mut hex = shared.to_hex();
    hex.truncate(len);
    hex
}

/// XOR each character of `text` with the key, cycling the key as needed
pub fn xor_mask(text: &str, key: &str) -> Result<String, CryptoError> {
    let key: Vec<u32> = key.chars().map(u32::from).collect();
    if key.is_empty() {
        return if text.is_empty() {
            Ok(String::new())
        } else {
            Err(CryptoError::EmptyMask)
        };
    }

    text.chars()
        .enumerate()
        .map(|(i, c)| {
            let masked = u32::from(c) ^ key[i % key.len()];
            char::from_u32(masked).ok_or(CryptoError::InvalidCharacter(masked))
        })
        .collect()
}
