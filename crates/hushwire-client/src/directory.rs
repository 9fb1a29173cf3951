//! Directory and relay collaborator contracts
//!
//! The protocol core only needs two external services: a directory to
//! publish and fetch device key bundles, and a relay to carry opaque
//! envelopes. Both are abstract here; implementations decide the transport.
//! Protocol security must hold even when the relay is untrusted.

use async_trait::async_trait;
use x25519_dalek::PublicKey as X25519PublicKey;

use hushwire_core::crypto::DeviceBundle;
use hushwire_core::envelope::Envelope;

use crate::error::Result;

/// Identifier the relay assigns to a stored envelope
pub type EnvelopeId = String;

/// Receipt kinds; `Read` implies `Delivered`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivered,
    Read,
}

/// The directory service: publishes and serves device key bundles
#[async_trait]
pub trait Directory: Send + Sync {
    /// Publish a device bundle. Idempotent upsert keyed by device id.
    async fn publish_bundle(&self, user_id: &str, bundle: DeviceBundle) -> Result<()>;

    /// All bundles for a user's devices, excluding revoked devices
    async fn fetch_bundles(&self, user_id: &str) -> Result<Vec<DeviceBundle>>;

    /// The bundle for a single device, if registered and not revoked
    async fn fetch_device(&self, device_id: &str) -> Result<Option<DeviceBundle>>;

    /// Mark a one-time prekey as used. Idempotent; returns whether the
    /// prekey was found on the device.
    async fn consume_prekey(&self, device_id: &str, prekey: &X25519PublicKey) -> Result<bool>;
}

/// The relay service: stores and forwards opaque envelopes
#[async_trait]
pub trait Relay: Send + Sync {
    /// Store envelopes for later pickup, one per recipient device.
    /// Returns the assigned ids in order.
    async fn push_envelopes(&self, envelopes: Vec<Envelope>) -> Result<Vec<EnvelopeId>>;

    /// Undelivered envelopes addressed to the given device, oldest first,
    /// in a bounded batch
    async fn pull_envelopes(&self, recipient_device_id: &str)
        -> Result<Vec<(EnvelopeId, Envelope)>>;

    /// Acknowledge receipt. Idempotent and monotonic: acknowledging `Read`
    /// also marks `Delivered`.
    async fn acknowledge(&self, ids: &[EnvelopeId], kind: ReceiptKind) -> Result<()>;
}
