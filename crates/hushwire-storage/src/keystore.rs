//! Secure key storage with Argon2 passphrase derivation
//!
//! Stores the identity keys and prekey private halves encrypted at rest.
//! The keystore is a serializable blob; callers decide where it lives on
//! disk.

use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use hushwire_core::crypto::{IdentityKeyPair, OneTimePrekey, PrekeyBatch, SignedPrekey};

use crate::error::{Error, Result};

/// Size of the encryption key
const KEY_SIZE: usize = 32;
/// Size of the nonce
const NONCE_SIZE: usize = 12;
/// Size of the salt
const SALT_SIZE: usize = 16;

/// Create an Argon2 instance with fixed parameters:
/// Argon2id, version 0x13, 64 MiB memory, 3 iterations, parallelism 4
fn argon2_instance<'a>() -> Result<Argon2<'a>> {
    let params = argon2::Params::new(65536, 3, 4, Some(KEY_SIZE))
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    Ok(Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params,
    ))
}

/// Encrypted key store
#[derive(Serialize, Deserialize)]
pub struct KeyStore {
    /// Salt for passphrase-based key derivation
    salt: [u8; SALT_SIZE],
    /// Argon2 passphrase hash for verification
    passphrase_hash: String,
    /// Stable device id (an identifier, not a secret)
    device_id: String,
    /// Encrypted Ed25519 signing key
    encrypted_signing_key: Vec<u8>,
    /// Encrypted X25519 DH secret key
    encrypted_dh_key: Vec<u8>,
    /// Encrypted signed prekey
    encrypted_signed_prekey: Option<EncryptedPrekey>,
    /// Encrypted one-time prekeys
    encrypted_one_time_prekeys: Vec<EncryptedPrekey>,
    /// Next one-time prekey id
    next_otpk_id: u32,
    /// Next signed prekey id
    next_spk_id: u32,
}

/// Encrypted prekey private half
#[derive(Clone, Serialize, Deserialize)]
struct EncryptedPrekey {
    id: u32,
    encrypted_secret: Vec<u8>,
    signature: Option<Vec<u8>>,
    created_at: i64,
}

impl KeyStore {
    /// Create a new key store with a passphrase
    ///
    /// Generates a fresh identity (signing + DH keypairs and a device id)
    /// and encrypts it under the passphrase.
    pub fn create(passphrase: &str) -> Result<(Self, IdentityKeyPair)> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let salt_string =
            SaltString::encode_b64(&salt).map_err(|e| Error::KeyDerivation(e.to_string()))?;
        let passphrase_hash = argon2_instance()?
            .hash_password(passphrase.as_bytes(), &salt_string)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?
            .to_string();

        let encryption_key = derive_encryption_key(passphrase, &salt)?;

        let identity = IdentityKeyPair::generate();
        let encrypted_signing_key = encrypt_data(&encryption_key, &identity.signing_key_bytes())?;
        let encrypted_dh_key = encrypt_data(&encryption_key, &identity.dh_secret_bytes())?;

        let store = Self {
            salt,
            passphrase_hash,
            device_id: identity.device_id().to_string(),
            encrypted_signing_key,
            encrypted_dh_key,
            encrypted_signed_prekey: None,
            encrypted_one_time_prekeys: Vec::new(),
            next_otpk_id: 0,
            next_spk_id: 1,
        };

        Ok((store, identity))
    }

    /// Open the key store, decrypting the identity
    pub fn open(&self, passphrase: &str) -> Result<IdentityKeyPair> {
        self.verify_passphrase(passphrase)?;
        let encryption_key = derive_encryption_key(passphrase, &self.salt)?;

        let signing_bytes = decrypt_data(&encryption_key, &self.encrypted_signing_key)?;
        let dh_bytes = decrypt_data(&encryption_key, &self.encrypted_dh_key)?;

        let identity =
            IdentityKeyPair::from_bytes(&signing_bytes, &dh_bytes, self.device_id.clone())?;
        Ok(identity)
    }

    /// Verify the passphrase without decrypting keys
    pub fn verify_passphrase(&self, passphrase: &str) -> Result<()> {
        let parsed_hash = PasswordHash::new(&self.passphrase_hash)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;

        argon2_instance()?
            .verify_password(passphrase.as_bytes(), &parsed_hash)
            .map_err(|_| Error::InvalidPassphrase)
    }

    /// The stored device id
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Generate and store a fresh prekey batch
    ///
    /// Replaces any previously stored batch, so callers must publish the
    /// matching bundle before regenerating.
    pub fn generate_prekey_batch(
        &mut self,
        passphrase: &str,
        identity: &IdentityKeyPair,
        count: u32,
    ) -> Result<PrekeyBatch> {
        self.verify_passphrase(passphrase)?;
        let encryption_key = derive_encryption_key(passphrase, &self.salt)?;

        let batch = PrekeyBatch::generate(identity, count, self.next_spk_id, self.next_otpk_id)?;
        self.next_spk_id += 1;
        self.next_otpk_id += count;

        let spk = &batch.signed_prekey;
        self.encrypted_signed_prekey = Some(EncryptedPrekey {
            id: spk.id,
            encrypted_secret: encrypt_data(&encryption_key, &spk.secret_bytes())?,
            signature: Some(spk.signature_bytes().to_vec()),
            created_at: spk.created_at,
        });

        self.encrypted_one_time_prekeys = batch
            .one_time_prekeys
            .iter()
            .map(|otp| {
                Ok(EncryptedPrekey {
                    id: otp.id,
                    encrypted_secret: encrypt_data(&encryption_key, &otp.secret_bytes())?,
                    signature: None,
                    created_at: chrono::Utc::now().timestamp(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(batch)
    }

    /// Get the current signed prekey
    pub fn signed_prekey(&self, passphrase: &str) -> Result<Option<SignedPrekey>> {
        self.verify_passphrase(passphrase)?;
        let encryption_key = derive_encryption_key(passphrase, &self.salt)?;

        match &self.encrypted_signed_prekey {
            Some(encrypted) => {
                let secret_bytes = decrypt_data(&encryption_key, &encrypted.encrypted_secret)?;
                let signature = encrypted
                    .signature
                    .as_ref()
                    .ok_or_else(|| Error::KeyNotFound("signed prekey signature".to_string()))?;

                let spk = SignedPrekey::from_bytes(
                    encrypted.id,
                    &secret_bytes,
                    signature,
                    encrypted.created_at,
                )?;
                Ok(Some(spk))
            }
            None => Ok(None),
        }
    }

    /// Decrypt all stored one-time prekeys
    ///
    /// Used by responder-side bootstrap to identify which prekey an
    /// initiator consumed.
    pub fn one_time_prekeys(&self, passphrase: &str) -> Result<Vec<OneTimePrekey>> {
        self.verify_passphrase(passphrase)?;
        let encryption_key = derive_encryption_key(passphrase, &self.salt)?;

        self.encrypted_one_time_prekeys
            .iter()
            .map(|encrypted| {
                let secret_bytes = decrypt_data(&encryption_key, &encrypted.encrypted_secret)?;
                Ok(OneTimePrekey::from_bytes(encrypted.id, &secret_bytes)?)
            })
            .collect()
    }

    /// Remove a one-time prekey by id, returning it
    ///
    /// The private half is deleted from the store; a consumed prekey can
    /// never be used in a second handshake.
    pub fn consume_one_time_prekey(&mut self, passphrase: &str, id: u32) -> Result<OneTimePrekey> {
        self.verify_passphrase(passphrase)?;
        let encryption_key = derive_encryption_key(passphrase, &self.salt)?;

        let idx = self
            .encrypted_one_time_prekeys
            .iter()
            .position(|k| k.id == id)
            .ok_or_else(|| Error::KeyNotFound(format!("one-time prekey {id}")))?;

        let encrypted = self.encrypted_one_time_prekeys.remove(idx);
        let secret_bytes = decrypt_data(&encryption_key, &encrypted.encrypted_secret)?;

        Ok(OneTimePrekey::from_bytes(id, &secret_bytes)?)
    }

    /// Number of stored one-time prekeys
    pub fn one_time_prekey_count(&self) -> usize {
        self.encrypted_one_time_prekeys.len()
    }

    /// Serialize the key store to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a key store from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Derive an encryption key from the passphrase using Argon2
fn derive_encryption_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_SIZE]> {
    let mut key = [0u8; KEY_SIZE];
    argon2_instance()?
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Encrypt data with ChaCha20-Poly1305, nonce prepended
fn encrypt_data(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key).map_err(|e| Error::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt data with ChaCha20-Poly1305
fn decrypt_data(key: &[u8; KEY_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE {
        return Err(Error::Decryption("Ciphertext too short".to_string()));
    }

    let cipher =
        ChaCha20Poly1305::new_from_slice(key).map_err(|e| Error::Decryption(e.to_string()))?;

    let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
    cipher
        .decrypt(nonce, &ciphertext[NONCE_SIZE..])
        .map_err(|_| Error::Decryption("Decryption failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_open() {
        let passphrase = "test_passphrase_123";

        let (store, identity1) = KeyStore::create(passphrase).unwrap();
        let identity2 = store.open(passphrase).unwrap();

        assert_eq!(
            identity1.public_key().fingerprint(),
            identity2.public_key().fingerprint()
        );
        assert_eq!(identity1.device_id(), identity2.device_id());
        assert_eq!(store.device_id(), identity1.device_id());
    }

    #[test]
    fn test_wrong_passphrase() {
        let (store, _) = KeyStore::create("correct_passphrase").unwrap();
        assert!(matches!(
            store.open("wrong_passphrase"),
            Err(Error::InvalidPassphrase)
        ));
    }

    #[test]
    fn test_prekey_batch_storage() {
        let passphrase = "test_passphrase";
        let (mut store, identity) = KeyStore::create(passphrase).unwrap();

        let batch = store
            .generate_prekey_batch(passphrase, &identity, 10)
            .unwrap();
        assert_eq!(store.one_time_prekey_count(), 10);

        let spk = store.signed_prekey(passphrase).unwrap().unwrap();
        assert_eq!(spk.id, batch.signed_prekey.id);
        assert_eq!(spk.secret_bytes(), batch.signed_prekey.secret_bytes());
    }

    #[test]
    fn test_regenerate_replaces_batch() {
        let passphrase = "test_passphrase";
        let (mut store, identity) = KeyStore::create(passphrase).unwrap();

        store
            .generate_prekey_batch(passphrase, &identity, 10)
            .unwrap();
        let second = store
            .generate_prekey_batch(passphrase, &identity, 4)
            .unwrap();

        // The old batch is gone and ids keep advancing
        assert_eq!(store.one_time_prekey_count(), 4);
        let stored = store.one_time_prekeys(passphrase).unwrap();
        assert_eq!(stored[0].id, second.one_time_prekeys[0].id);
        assert_eq!(stored[0].id, 10);
        assert_eq!(second.signed_prekey.id, 2);
    }

    #[test]
    fn test_consume_one_time_prekey() {
        let passphrase = "test_passphrase";
        let (mut store, identity) = KeyStore::create(passphrase).unwrap();

        let batch = store
            .generate_prekey_batch(passphrase, &identity, 5)
            .unwrap();
        let target = batch.one_time_prekeys[2].id;

        let consumed = store.consume_one_time_prekey(passphrase, target).unwrap();
        assert_eq!(consumed.id, target);
        assert_eq!(store.one_time_prekey_count(), 4);

        // Second consume of the same id fails
        assert!(matches!(
            store.consume_one_time_prekey(passphrase, target),
            Err(Error::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_serialization_round_trip() {
        let passphrase = "test_passphrase";
        let (mut store1, identity1) = KeyStore::create(passphrase).unwrap();
        store1
            .generate_prekey_batch(passphrase, &identity1, 3)
            .unwrap();

        let bytes = store1.to_bytes().unwrap();
        let store2 = KeyStore::from_bytes(&bytes).unwrap();

        let identity2 = store2.open(passphrase).unwrap();
        assert_eq!(
            identity1.public_key().fingerprint(),
            identity2.public_key().fingerprint()
        );
        assert_eq!(store2.one_time_prekey_count(), 3);
    }
}
