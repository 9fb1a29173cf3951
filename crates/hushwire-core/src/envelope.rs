//! The envelope wire format
//!
//! An envelope is the opaque record carried by the relay: ciphertext plus
//! the minimum metadata needed for routing and decryption. Binary fields
//! are base64 (URL-safe, no padding); the relay never sees plaintext.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use x25519_dalek::PublicKey as X25519PublicKey;

use crate::crypto::ratchet::SealedMessage;
use crate::error::{Error, Result};

/// Associated data bound into every message's authentication tag
///
/// Serialized as compact JSON and carried base64-encoded in the envelope
/// header; tampering with any field breaks decryption.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssociatedData {
    #[serde(rename = "toUserId")]
    pub to_user_id: String,
    #[serde(rename = "dev")]
    pub device_id: String,
    #[serde(rename = "typ")]
    pub message_type: String,
    #[serde(rename = "ts")]
    pub timestamp_ms: i64,
}

impl AssociatedData {
    /// Build associated data stamped with the current time
    pub fn new(
        to_user_id: impl Into<String>,
        device_id: impl Into<String>,
        message_type: impl Into<String>,
    ) -> Self {
        Self {
            to_user_id: to_user_id.into(),
            device_id: device_id.into(),
            message_type: message_type.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Serialize to the exact bytes bound as AAD
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse from header bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// The wire record exchanged through the relay
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub conversation_id: String,
    pub sender_device_id: String,
    pub recipient_user_id: String,
    pub recipient_device_id: String,
    /// Sender's current ratchet public key, base64
    pub ratchet_pub: String,
    /// Serialized associated data, base64
    pub header: String,
    /// AEAD ciphertext, base64
    pub ciphertext: String,
    /// AEAD nonce, base64
    pub nonce: String,
    /// Strictly increasing per-chain counter; first message carries 1
    pub counter: u32,
}

impl Envelope {
    /// Assemble an envelope from a sealed message and its routing metadata
    pub fn assemble(
        conversation_id: impl Into<String>,
        sender_device_id: impl Into<String>,
        recipient_user_id: impl Into<String>,
        recipient_device_id: impl Into<String>,
        header_bytes: &[u8],
        sealed: &SealedMessage,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            sender_device_id: sender_device_id.into(),
            recipient_user_id: recipient_user_id.into(),
            recipient_device_id: recipient_device_id.into(),
            ratchet_pub: b64(sealed.ratchet_public.as_bytes()),
            header: b64(header_bytes),
            ciphertext: b64(&sealed.ciphertext),
            nonce: b64(&sealed.nonce),
            counter: sealed.counter,
        }
    }

    /// Decode the sender's ratchet public key
    pub fn ratchet_public(&self) -> Result<X25519PublicKey> {
        let bytes = unb64("ratchetPub", &self.ratchet_pub)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidEnvelope("ratchetPub has wrong length".to_string()))?;
        Ok(X25519PublicKey::from(arr))
    }

    /// Decode the header (associated data) bytes
    pub fn header_bytes(&self) -> Result<Vec<u8>> {
        unb64("header", &self.header)
    }

    /// Decode the ciphertext bytes
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>> {
        unb64("ciphertext", &self.ciphertext)
    }

    /// Decode the nonce bytes
    pub fn nonce_bytes(&self) -> Result<Vec<u8>> {
        unb64("nonce", &self.nonce)
    }
}

/// Stable conversation identifier for a pair of users
///
/// Sorted so both participants derive the same id.
pub fn conversation_id(user_a: &str, user_b: &str) -> String {
    let mut pair = [user_a, user_b];
    pair.sort_unstable();
    pair.join(":")
}

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn unb64(field: &str, value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| Error::InvalidEnvelope(format!("{field} is not valid base64")))
}
