//! Authenticated encryption with associated data
//!
//! XChaCha20-Poly1305 for message encryption. The 24-byte nonce travels as
//! its own envelope field, so unlike a self-framing format it is not
//! prepended to the ciphertext here.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::{Error, Result};

/// Size of the encryption key in bytes
pub const KEY_SIZE: usize = 32;
/// Size of the nonce in bytes
pub const NONCE_SIZE: usize = 24;
/// Size of the authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Generate a fresh random nonce
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Encrypt a message, binding `associated_data` into the authentication tag
pub fn seal(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key).map_err(|e| Error::Encryption(e.to_string()))?;

    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|e| Error::Encryption(e.to_string()))
}

/// Decrypt a message, verifying `associated_data` against the tag
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8],
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(Error::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Decryption("Ciphertext too short".to_string()));
    }

    let cipher =
        XChaCha20Poly1305::new_from_slice(key).map_err(|e| Error::Decryption(e.to_string()))?;

    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| Error::Decryption("Authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = [0u8; 32];
        let nonce = generate_nonce();
        let plaintext = b"Hello, Hushwire!";
        let aad = b"associated data";

        let ciphertext = seal(&key, &nonce, plaintext, aad).unwrap();
        let decrypted = open(&key, &nonce, &ciphertext, aad).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = [0u8; 32];
        let key2 = [1u8; 32];
        let nonce = generate_nonce();

        let ciphertext = seal(&key1, &nonce, b"secret", b"").unwrap();
        assert!(open(&key2, &nonce, &ciphertext, b"").is_err());
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let key = [0u8; 32];
        let nonce = generate_nonce();
        let other_nonce = generate_nonce();

        let ciphertext = seal(&key, &nonce, b"secret", b"").unwrap();
        assert!(open(&key, &other_nonce, &ciphertext, b"").is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = [0u8; 32];
        let nonce = generate_nonce();

        let ciphertext = seal(&key, &nonce, b"secret", b"correct aad").unwrap();
        assert!(open(&key, &nonce, &ciphertext, b"wrong aad").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [0u8; 32];
        let nonce = generate_nonce();

        let mut ciphertext = seal(&key, &nonce, b"secret", b"aad").unwrap();
        let len = ciphertext.len();
        ciphertext[len - 1] ^= 0xff;

        assert!(open(&key, &nonce, &ciphertext, b"aad").is_err());
    }

    #[test]
    fn test_bad_nonce_length_rejected() {
        let key = [0u8; 32];
        let nonce = generate_nonce();

        let ciphertext = seal(&key, &nonce, b"secret", b"").unwrap();
        let result = open(&key, &nonce[..12], &ciphertext, b"");
        assert!(matches!(
            result,
            Err(Error::InvalidNonceLength { expected: 24, .. })
        ));
    }

    #[test]
    fn test_empty_message() {
        let key = [0u8; 32];
        let nonce = generate_nonce();

        let ciphertext = seal(&key, &nonce, b"", b"aad").unwrap();
        assert_eq!(ciphertext.len(), TAG_SIZE);
        let decrypted = open(&key, &nonce, &ciphertext, b"aad").unwrap();
        assert!(decrypted.is_empty());
    }
}
