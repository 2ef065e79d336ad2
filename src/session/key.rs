//! The symmetric key agreed during the handshake.

use crate::crypto::symmetric::{self, KEY_SIZE};
use crate::utils::{CryptoError, Result};
use num_bigint::BigUint;
use rand_core::{OsRng, RngCore};
use std::fmt;

/// Key material chosen by the initiator and unwrapped by the listener
///
/// The handshake can only carry fewer bytes than the listener's modulus, so
/// the material is between 1 and [`SessionKey::MAX_LEN`] bytes long. The AES
/// key is the material read as a big-endian integer and rendered on
/// [`KEY_SIZE`] bytes, which both ends compute identically.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    material: Vec<u8>,
}

impl SessionKey {
    /// Longest key material the handshake transports
    pub const MAX_LEN: usize = KEY_SIZE;

    /// Wrap existing key material
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidParameters` unless `1 <= len <= MAX_LEN`
    pub fn from_material(material: Vec<u8>) -> Result<Self> {
        check_len(material.len())?;
        Ok(Self { material })
    }

    /// Draw `len` random bytes of key material
    pub fn generate(len: usize) -> Result<Self> {
        check_len(len)?;
        let mut material = vec![0u8; len];
        OsRng.fill_bytes(&mut material);
        Ok(Self { material })
    }

    /// Rebuild the key from an unwrapped integer, keeping its low `len` bytes
    pub fn from_integer(m: &BigUint, len: usize) -> Result<Self> {
        check_len(len)?;
        let bytes = m.to_bytes_be();
        let material = if bytes.len() >= len {
            bytes[bytes.len() - len..].to_vec()
        } else {
            let mut padded = vec![0u8; len - bytes.len()];
            padded.extend_from_slice(&bytes);
            padded
        };
        Ok(Self { material })
    }

    /// The key material as a big-endian integer
    pub fn to_integer(&self) -> BigUint {
        BigUint::from_bytes_be(&self.material)
    }

    /// Raw key material
    pub fn material(&self) -> &[u8] {
        &self.material
    }

    /// Length of the key material in bytes
    pub fn len(&self) -> usize {
        self.material.len()
    }

    /// Always false; key material is never empty
    pub fn is_empty(&self) -> bool {
        self.material.is_empty()
    }

    /// The 16-byte AES key: material left-padded with zeros
    pub fn cipher_key(&self) -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        key[KEY_SIZE - self.material.len()..].copy_from_slice(&self.material);
        key
    }

    /// Encrypt a message into an `IV || ciphertext` envelope
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        symmetric::encrypt(plaintext, &self.cipher_key())
    }

    /// Decrypt an envelope produced by the peer
    pub fn decrypt(&self, envelope: &[u8]) -> Result<String> {
        symmetric::decrypt(envelope, &self.cipher_key())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("len", &self.material.len())
            .finish_non_exhaustive()
    }
}

fn check_len(len: usize) -> Result<()> {
    if len == 0 || len > SessionKey::MAX_LEN {
        return Err(CryptoError::InvalidParameters {
            reason: format!(
                "session key length must be 1..={}, got {len}",
                SessionKey::MAX_LEN
            ),
        }
        .into());
    }
    Ok(())
}
