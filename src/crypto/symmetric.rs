//! AES-128-CBC payload encryption.
//!
//! Every call to [`encrypt`] draws a fresh random IV and returns the envelope
//! `IV || ciphertext`. The plaintext is PKCS#7 padded, so the ciphertext is
//! always a non-empty multiple of the block size.

use crate::utils::{CryptoError, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand_core::{OsRng, RngCore};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Symmetric key length in bytes
pub const KEY_SIZE: usize = 16;

/// AES block size, also the IV length
pub const BLOCK_SIZE: usize = 16;

/// Encrypt `plaintext` under a 16-byte key
///
/// # Errors
///
/// Returns `CryptoError::InvalidKey` if `key` is not exactly [`KEY_SIZE`] bytes
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    let mut iv = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes128CbcEnc::new_from_slices(key, &iv).map_err(|e| CryptoError::Encryption {
        reason: e.to_string(),
    })?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut envelope = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypt an `IV || ciphertext` envelope produced by [`encrypt`]
///
/// Nothing is returned unless the padding and the UTF-8 text both validate.
///
/// # Errors
///
/// * `CryptoError::InvalidKey` if `key` is not exactly [`KEY_SIZE`] bytes
/// * `CryptoError::Decryption` for short or misaligned envelopes, bad padding
///   or invalid UTF-8
pub fn decrypt(envelope: &[u8], key: &[u8]) -> Result<String> {
    check_key(key)?;

    if envelope.len() < BLOCK_SIZE {
        return Err(decryption_error(format!(
            "envelope of {} bytes is shorter than one block",
            envelope.len()
        )));
    }

    let (iv, ciphertext) = envelope.split_at(BLOCK_SIZE);
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(decryption_error(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }

    let cipher =
        Aes128CbcDec::new_from_slices(key, iv).map_err(|e| decryption_error(e.to_string()))?;
    let padded_free = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| decryption_error("invalid padding"))?;

    String::from_utf8(padded_free).map_err(|_| decryption_error("plaintext is not valid UTF-8"))
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey {
            expected: KEY_SIZE,
            actual: key.len(),
        }
        .into());
    }
    Ok(())
}

fn decryption_error<S: Into<String>>(reason: S) -> crate::utils::MessengerError {
    CryptoError::Decryption {
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::FailureKind;
    use rand::Rng;

    fn random_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_round_trip() {
        let key = random_key();
        for message in ["", "a", "Hello, World!", "exactly sixteen!", "héllo wörld ✓ 🔐"] {
            let envelope = encrypt(message, &key).unwrap();
            assert_eq!(decrypt(&envelope, &key).unwrap(), message);
        }
    }

    #[test]
    fn test_envelope_layout() {
        let key = random_key();
        let envelope = encrypt("exactly sixteen!", &key).unwrap();
        // IV plus two blocks: 16 bytes of text and a full block of padding
        assert_eq!(envelope.len(), BLOCK_SIZE * 3);

        let envelope = encrypt("", &key).unwrap();
        assert_eq!(envelope.len(), BLOCK_SIZE * 2);
    }

    #[test]
    fn test_random_iv() {
        let key = random_key();
        let first = encrypt("same message", &key).unwrap();
        let second = encrypt("same message", &key).unwrap();

        assert_ne!(first, second);
        assert_ne!(first[..BLOCK_SIZE], second[..BLOCK_SIZE]);
        assert_eq!(decrypt(&first, &key).unwrap(), "same message");
        assert_eq!(decrypt(&second, &key).unwrap(), "same message");
    }

    #[test]
    fn test_invalid_key_length() {
        let short_key = [0u8; 7];
        let err = encrypt("hi", &short_key).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Cipher);

        let envelope = encrypt("hi", &random_key()).unwrap();
        assert!(decrypt(&envelope, &[0u8; 32]).is_err());
    }

    #[test]
    fn test_undersized_envelope() {
        let key = random_key();
        assert!(decrypt(&[0u8; 15], &key).is_err());
        assert!(decrypt(&[0u8; 16], &key).is_err());
        assert!(decrypt(&[0u8; 20], &key).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = encrypt("a message long enough to span blocks", &random_key()).unwrap();
        let mut failures = 0;
        for _ in 0..50 {
            if decrypt(&envelope, &random_key()).is_err() {
                failures += 1;
            }
        }
        assert!(failures >= 45, "only {failures}/50 wrong-key decryptions failed");
    }

    #[test]
    fn test_tamper_detection() {
        let key = random_key();
        let message = "The quick brown fox jumps over the lazy dog, twice over!";
        let envelope = encrypt(message, &key).unwrap();
        let mut rng = rand::thread_rng();

        let trials = 500;
        let mut detected = 0;
        for _ in 0..trials {
            let mut tampered = envelope.clone();
            let position = rng.gen_range(BLOCK_SIZE..tampered.len());
            tampered[position] ^= rng.gen_range(1..=255u8);

            match decrypt(&tampered, &key) {
                Err(err) => {
                    assert!(err.is_security_violation());
                    detected += 1;
                }
                Ok(text) => assert_ne!(text, message),
            }
        }

        assert!(
            detected * 100 >= trials * 95,
            "only {detected}/{trials} tampered envelopes were rejected"
        );
    }
}
