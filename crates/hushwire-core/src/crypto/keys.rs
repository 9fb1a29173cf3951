//! Identity and prekey management
//!
//! Implements the key hierarchy for Hushwire:
//! - Identity: long-term Ed25519 signing key + X25519 DH key + stable device id
//! - Signed Prekey: medium-term X25519 key signed by the identity
//! - One-Time Prekeys: single-use X25519 keys for asynchronous key agreement

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of Ed25519 keys in bytes
pub const ED25519_KEY_SIZE: usize = 32;
/// Size of X25519 keys in bytes
pub const X25519_KEY_SIZE: usize = 32;
/// Size of Ed25519 signatures in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Long-term identity key pair
///
/// Contains the Ed25519 signing key (used only to sign prekeys and for
/// safety-code derivation), the X25519 DH secret, and the stable device id.
/// Implements manual `Drop` to ensure secret key material is zeroized.
#[derive(Clone)]
pub struct IdentityKeyPair {
    /// Ed25519 signing key
    signing_key: SigningKey,
    /// X25519 secret key for DH operations
    dh_secret: X25519SecretKey,
    /// Stable device identifier (UUID v4)
    device_id: String,
}

impl Drop for IdentityKeyPair {
    fn drop(&mut self) {
        self.dh_secret.zeroize();

        // SigningKey does not implement Zeroize; overwrite it manually
        let mut signing_bytes = self.signing_key.to_bytes();
        signing_bytes.zeroize();
        self.signing_key = SigningKey::from_bytes(&[0u8; 32]);
    }
}

impl IdentityKeyPair {
    /// Generate a new random identity with a fresh device id
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            dh_secret: X25519SecretKey::random_from_rng(&mut OsRng),
            device_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Reconstruct an identity from raw bytes and a stored device id
    pub fn from_bytes(signing_bytes: &[u8], dh_bytes: &[u8], device_id: String) -> Result<Self> {
        if signing_bytes.len() != ED25519_KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: ED25519_KEY_SIZE,
                actual: signing_bytes.len(),
            });
        }
        if dh_bytes.len() != X25519_KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: X25519_KEY_SIZE,
                actual: dh_bytes.len(),
            });
        }

        let signing_arr: [u8; 32] = signing_bytes
            .try_into()
            .map_err(|_| Error::KeyGeneration("bad signing key bytes".to_string()))?;
        let dh_arr: [u8; 32] = dh_bytes
            .try_into()
            .map_err(|_| Error::KeyGeneration("bad DH key bytes".to_string()))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&signing_arr),
            dh_secret: X25519SecretKey::from(dh_arr),
            device_id,
        })
    }

    /// Get the public half of the identity
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey {
            verifying_key: self.signing_key.verifying_key(),
            dh_public: X25519PublicKey::from(&self.dh_secret),
        }
    }

    /// Sign a message with the identity signing key
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Get the X25519 secret key for DH operations
    pub fn dh_secret(&self) -> &X25519SecretKey {
        &self.dh_secret
    }

    /// Get the stable device identifier
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Export signing key bytes (for secure storage)
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Export DH secret key bytes (for secure storage)
    pub fn dh_secret_bytes(&self) -> [u8; 32] {
        self.dh_secret.to_bytes()
    }
}

/// Public portion of an identity key
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityPublicKey {
    /// Ed25519 verifying key
    #[serde(with = "verifying_key_b64")]
    verifying_key: VerifyingKey,
    /// X25519 public key for DH
    #[serde(with = "x25519_public_b64")]
    dh_public: X25519PublicKey,
}

impl PartialEq for IdentityPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.verifying_key == other.verifying_key
            && self.dh_public.as_bytes() == other.dh_public.as_bytes()
    }
}

impl Eq for IdentityPublicKey {}

impl IdentityPublicKey {
    /// Verify a signature against this identity
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.verifying_key
            .verify(message, signature)
            .map_err(|_| Error::SignatureVerification)
    }

    /// Get the Ed25519 verifying key
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Get the X25519 public key for DH
    pub fn dh_public(&self) -> &X25519PublicKey {
        &self.dh_public
    }

    /// Short hex fingerprint for display and logging
    pub fn fingerprint(&self) -> String {
        use blake2::{Blake2s256, Digest};
        let mut hasher = Blake2s256::new();
        hasher.update(self.verifying_key.as_bytes());
        hasher.update(self.dh_public.as_bytes());
        let hash = hasher.finalize();
        hex::encode(&hash[..16])
    }
}

/// A signed prekey
///
/// Medium-term X25519 key whose public half is signed by the identity.
/// Rotation cadence is policy owned by the caller.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SignedPrekey {
    #[zeroize(skip)]
    pub id: u32,
    secret: X25519SecretKey,
    #[zeroize(skip)]
    signature: Signature,
    #[zeroize(skip)]
    pub created_at: i64,
}

impl SignedPrekey {
    /// Generate a new signed prekey bound to the identity
    pub fn generate(id: u32, identity: &IdentityKeyPair) -> Self {
        let secret = X25519SecretKey::random_from_rng(&mut OsRng);
        let public = X25519PublicKey::from(&secret);
        let signature = identity.sign(public.as_bytes());

        Self {
            id,
            secret,
            signature,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Reconstruct from stored components
    pub fn from_bytes(
        id: u32,
        secret_bytes: &[u8],
        signature_bytes: &[u8],
        created_at: i64,
    ) -> Result<Self> {
        if secret_bytes.len() != X25519_KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: X25519_KEY_SIZE,
                actual: secret_bytes.len(),
            });
        }

        let secret_arr: [u8; 32] = secret_bytes
            .try_into()
            .map_err(|_| Error::KeyGeneration("bad prekey bytes".to_string()))?;
        let sig_arr: [u8; 64] = signature_bytes
            .try_into()
            .map_err(|_| Error::InvalidKeyLength {
                expected: SIGNATURE_SIZE,
                actual: signature_bytes.len(),
            })?;

        Ok(Self {
            id,
            secret: X25519SecretKey::from(secret_arr),
            signature: Signature::from_bytes(&sig_arr),
            created_at,
        })
    }

    /// Get the public wire form
    pub fn public_key(&self) -> SignedPrekeyPublic {
        SignedPrekeyPublic {
            key: X25519PublicKey::from(&self.secret),
            signature: self.signature,
        }
    }

    /// Get the secret key for DH
    pub fn secret(&self) -> &X25519SecretKey {
        &self.secret
    }

    /// Export secret key bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Export signature bytes
    pub fn signature_bytes(&self) -> [u8; 64] {
        self.signature.to_bytes()
    }
}

/// Public portion of a signed prekey, as published in a bundle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedPrekeyPublic {
    #[serde(with = "x25519_public_b64")]
    pub key: X25519PublicKey,
    #[serde(with = "signature_b64")]
    pub signature: Signature,
}

impl SignedPrekeyPublic {
    /// Verify the signature using the identity's verifying key
    pub fn verify(&self, identity_signing: &VerifyingKey) -> Result<()> {
        identity_signing
            .verify(self.key.as_bytes(), &self.signature)
            .map_err(|_| Error::SignatureVerification)
    }
}

/// A one-time prekey
///
/// Consumed on first use; the private half must be deleted once a handshake
/// has used it.
#[derive(Clone, ZeroizeOnDrop)]
pub struct OneTimePrekey {
    #[zeroize(skip)]
    pub id: u32,
    secret: X25519SecretKey,
}

impl OneTimePrekey {
    /// Generate a new one-time prekey
    pub fn generate(id: u32) -> Self {
        Self {
            id,
            secret: X25519SecretKey::random_from_rng(&mut OsRng),
        }
    }

    /// Reconstruct from stored bytes
    pub fn from_bytes(id: u32, secret_bytes: &[u8]) -> Result<Self> {
        if secret_bytes.len() != X25519_KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: X25519_KEY_SIZE,
                actual: secret_bytes.len(),
            });
        }

        let secret_arr: [u8; 32] = secret_bytes
            .try_into()
            .map_err(|_| Error::KeyGeneration("bad prekey bytes".to_string()))?;
        Ok(Self {
            id,
            secret: X25519SecretKey::from(secret_arr),
        })
    }

    /// Get the public wire form (fresh keys are unused)
    pub fn public_key(&self) -> OneTimePrekeyPublic {
        OneTimePrekeyPublic {
            key: X25519PublicKey::from(&self.secret),
            used: false,
        }
    }

    /// Get the secret key for DH
    pub fn secret(&self) -> &X25519SecretKey {
        &self.secret
    }

    /// Export secret key bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

/// Public portion of a one-time prekey with its consumption flag
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OneTimePrekeyPublic {
    #[serde(with = "x25519_public_b64")]
    pub key: X25519PublicKey,
    #[serde(default)]
    pub used: bool,
}

/// An ephemeral key pair for a single handshake
#[derive(ZeroizeOnDrop)]
pub struct EphemeralKeyPair {
    secret: X25519SecretKey,
}

impl EphemeralKeyPair {
    /// Generate a new ephemeral key pair
    pub fn generate() -> Self {
        Self {
            secret: X25519SecretKey::random_from_rng(&mut OsRng),
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(&self.secret)
    }

    /// Get the secret key
    pub fn secret(&self) -> &X25519SecretKey {
        &self.secret
    }

    /// Export secret key bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

/// The public view of a device, as published through the directory
///
/// This is the only object exchanged with the directory collaborator; it
/// never carries secret material.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBundle {
    pub device_id: String,
    #[serde(with = "verifying_key_b64")]
    pub identity_signing_ed25519: VerifyingKey,
    #[serde(with = "x25519_public_b64")]
    pub identity_dh_x25519: X25519PublicKey,
    pub signed_prekey: SignedPrekeyPublic,
    pub one_time_prekeys: Vec<OneTimePrekeyPublic>,
}

impl DeviceBundle {
    /// Verify the signed prekey signature against the bundle's identity key
    pub fn verify(&self) -> Result<()> {
        self.signed_prekey.verify(&self.identity_signing_ed25519)
    }

    /// First one-time prekey not yet marked used, if any
    pub fn first_unused_prekey(&self) -> Option<&OneTimePrekeyPublic> {
        self.one_time_prekeys.iter().find(|p| !p.used)
    }
}

/// Freshly generated prekey material: the private halves of one signed
/// prekey and a batch of one-time prekeys
///
/// The caller persists this locally and publishes the matching
/// [`DeviceBundle`]. Regenerating replaces any unpublished batch, so publish
/// before generating again.
pub struct PrekeyBatch {
    pub signed_prekey: SignedPrekey,
    pub one_time_prekeys: Vec<OneTimePrekey>,
}

impl PrekeyBatch {
    /// Generate a signed prekey and `count` one-time prekeys
    ///
    /// `count` must be at least 1. Ids are assigned sequentially starting
    /// from the provided values so callers can keep them unique across
    /// batches.
    pub fn generate(
        identity: &IdentityKeyPair,
        count: u32,
        signed_prekey_id: u32,
        first_one_time_id: u32,
    ) -> Result<Self> {
        if count == 0 {
            return Err(Error::EmptyPrekeyBatch);
        }

        let signed_prekey = SignedPrekey::generate(signed_prekey_id, identity);
        let one_time_prekeys = (0..count)
            .map(|i| OneTimePrekey::generate(first_one_time_id + i))
            .collect();

        Ok(Self {
            signed_prekey,
            one_time_prekeys,
        })
    }

    /// Build the public bundle for publication
    pub fn bundle(&self, identity: &IdentityKeyPair) -> DeviceBundle {
        DeviceBundle {
            device_id: identity.device_id().to_string(),
            identity_signing_ed25519: identity.public_key().verifying_key,
            identity_dh_x25519: identity.public_key().dh_public,
            signed_prekey: self.signed_prekey.public_key(),
            one_time_prekeys: self
                .one_time_prekeys
                .iter()
                .map(|k| k.public_key())
                .collect(),
        }
    }
}

// Serde helpers rendering keys as base64 strings (URL-safe, no padding,
// matching the wire format of the directory and relay collaborators).
pub(crate) mod verifying_key_b64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(key: &VerifyingKey, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(key.as_bytes()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<VerifyingKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(&s)
            .map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid key length"))?;
        VerifyingKey::from_bytes(&arr).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod x25519_public_b64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(
        key: &X25519PublicKey,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(key.as_bytes()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<X25519PublicKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(&s)
            .map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid key length"))?;
        Ok(X25519PublicKey::from(arr))
    }
}

pub(crate) mod signature_b64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(sig: &Signature, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(sig.to_bytes()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Signature, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(&s)
            .map_err(serde::de::Error::custom)?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid signature length"))?;
        Ok(Signature::from_bytes(&arr))
    }
}
