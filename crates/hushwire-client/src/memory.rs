//! In-memory directory and relay
//!
//! Process-local implementations of the collaborator contracts, used by the
//! test suite and by examples. They enforce the same invariants the real
//! services do: one-time prekeys are consumed at most once, revoked devices
//! are excluded from bundle fetches, pulls are bounded and oldest-first,
//! and receipts are idempotent and monotonic.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use x25519_dalek::PublicKey as X25519PublicKey;

use hushwire_core::crypto::DeviceBundle;
use hushwire_core::envelope::Envelope;

use crate::directory::{Directory, EnvelopeId, ReceiptKind, Relay};
use crate::error::Result;

/// Maximum envelopes returned by a single pull
pub const MAX_PULL_BATCH: usize = 300;

struct DeviceRecord {
    user_id: String,
    bundle: DeviceBundle,
    revoked: bool,
}

/// In-memory directory keyed by device id
#[derive(Default)]
pub struct MemoryDirectory {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a device revoked; revoked devices disappear from bundle fetches
    pub async fn revoke_device(&self, device_id: &str) {
        if let Some(record) = self.devices.write().await.get_mut(device_id) {
            record.revoked = true;
        }
    }

    /// Count of unused one-time prekeys on a device (test inspection)
    pub async fn unused_prekey_count(&self, device_id: &str) -> usize {
        self.devices
            .read()
            .await
            .get(device_id)
            .map(|r| r.bundle.one_time_prekeys.iter().filter(|p| !p.used).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn publish_bundle(&self, user_id: &str, bundle: DeviceBundle) -> Result<()> {
        let mut devices = self.devices.write().await;
        devices.insert(
            bundle.device_id.clone(),
            DeviceRecord {
                user_id: user_id.to_string(),
                bundle,
                revoked: false,
            },
        );
        Ok(())
    }

    async fn fetch_bundles(&self, user_id: &str) -> Result<Vec<DeviceBundle>> {
        let devices = self.devices.read().await;
        Ok(devices
            .values()
            .filter(|r| r.user_id == user_id && !r.revoked)
            .map(|r| r.bundle.clone())
            .collect())
    }

    async fn fetch_device(&self, device_id: &str) -> Result<Option<DeviceBundle>> {
        let devices = self.devices.read().await;
        Ok(devices
            .get(device_id)
            .filter(|r| !r.revoked)
            .map(|r| r.bundle.clone()))
    }

    async fn consume_prekey(&self, device_id: &str, prekey: &X25519PublicKey) -> Result<bool> {
        let mut devices = self.devices.write().await;
        let Some(record) = devices.get_mut(device_id) else {
            return Ok(false);
        };

        let found = record
            .bundle
            .one_time_prekeys
            .iter_mut()
            .find(|p| p.key.as_bytes() == prekey.as_bytes());

        match found {
            Some(p) => {
                p.used = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

struct StoredEnvelope {
    id: EnvelopeId,
    envelope: Envelope,
    delivered: bool,
    read: bool,
}

#[derive(Default)]
struct RelayState {
    envelopes: Vec<StoredEnvelope>,
    next_id: u64,
}

/// In-memory relay with bounded, oldest-first pulls
#[derive(Default)]
pub struct MemoryRelay {
    state: RwLock<RelayState>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored envelopes not yet marked delivered (test inspection)
    pub async fn undelivered_count(&self) -> usize {
        self.state
            .read()
            .await
            .envelopes
            .iter()
            .filter(|e| !e.delivered)
            .count()
    }

    /// All stored envelopes for a device, delivered or not (test inspection)
    pub async fn stored_envelopes(&self, recipient_device_id: &str) -> Vec<Envelope> {
        self.state
            .read()
            .await
            .envelopes
            .iter()
            .filter(|e| e.envelope.recipient_device_id == recipient_device_id)
            .map(|e| e.envelope.clone())
            .collect()
    }

    /// Whether the given envelope is marked read (test inspection)
    pub async fn is_read(&self, id: &str) -> bool {
        self.state
            .read()
            .await
            .envelopes
            .iter()
            .any(|e| e.id == id && e.read)
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn push_envelopes(&self, envelopes: Vec<Envelope>) -> Result<Vec<EnvelopeId>> {
        let mut state = self.state.write().await;
        let mut ids = Vec::with_capacity(envelopes.len());

        for envelope in envelopes {
            let id = format!("env-{}", state.next_id);
            state.next_id += 1;
            ids.push(id.clone());
            state.envelopes.push(StoredEnvelope {
                id,
                envelope,
                delivered: false,
                read: false,
            });
        }

        Ok(ids)
    }

    async fn pull_envelopes(
        &self,
        recipient_device_id: &str,
    ) -> Result<Vec<(EnvelopeId, Envelope)>> {
        let state = self.state.read().await;
        Ok(state
            .envelopes
            .iter()
            .filter(|e| !e.delivered && e.envelope.recipient_device_id == recipient_device_id)
            .take(MAX_PULL_BATCH)
            .map(|e| (e.id.clone(), e.envelope.clone()))
            .collect())
    }

    async fn acknowledge(&self, ids: &[EnvelopeId], kind: ReceiptKind) -> Result<()> {
        let mut state = self.state.write().await;
        for stored in state.envelopes.iter_mut() {
            if ids.contains(&stored.id) {
                stored.delivered = true;
                if kind == ReceiptKind::Read {
                    stored.read = true;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hushwire_core::crypto::{IdentityKeyPair, PrekeyBatch};
    use hushwire_core::crypto::ratchet::SealedMessage;

    fn sample_bundle() -> (IdentityKeyPair, DeviceBundle) {
        let identity = IdentityKeyPair::generate();
        let batch = PrekeyBatch::generate(&identity, 2, 1, 0).unwrap();
        let bundle = batch.bundle(&identity);
        (identity, bundle)
    }

    fn sample_envelope(recipient_device_id: &str) -> Envelope {
        let sealed = SealedMessage {
            ciphertext: vec![1, 2, 3],
            nonce: [0u8; 24],
            counter: 1,
            ratchet_public: X25519PublicKey::from([5u8; 32]),
        };
        Envelope::assemble("a:b", "sender-dev", "user-b", recipient_device_id, b"h", &sealed)
    }

    #[tokio::test]
    async fn test_publish_is_idempotent_upsert() {
        let directory = MemoryDirectory::new();
        let (_, bundle) = sample_bundle();
        let device_id = bundle.device_id.clone();

        directory.publish_bundle("alice", bundle.clone()).await.unwrap();
        directory.publish_bundle("alice", bundle).await.unwrap();

        assert_eq!(directory.fetch_bundles("alice").await.unwrap().len(), 1);
        assert!(directory.fetch_device(&device_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_revoked_devices_excluded() {
        let directory = MemoryDirectory::new();
        let (_, bundle) = sample_bundle();
        let device_id = bundle.device_id.clone();

        directory.publish_bundle("alice", bundle).await.unwrap();
        directory.revoke_device(&device_id).await;

        assert!(directory.fetch_bundles("alice").await.unwrap().is_empty());
        assert!(directory.fetch_device(&device_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consume_prekey_marks_used() {
        let directory = MemoryDirectory::new();
        let (_, bundle) = sample_bundle();
        let device_id = bundle.device_id.clone();
        let prekey = bundle.one_time_prekeys[0].key;

        directory.publish_bundle("alice", bundle).await.unwrap();
        assert_eq!(directory.unused_prekey_count(&device_id).await, 2);

        assert!(directory.consume_prekey(&device_id, &prekey).await.unwrap());
        assert_eq!(directory.unused_prekey_count(&device_id).await, 1);

        // Idempotent re-consume; still marked used
        assert!(directory.consume_prekey(&device_id, &prekey).await.unwrap());
        assert_eq!(directory.unused_prekey_count(&device_id).await, 1);

        let fetched = directory.fetch_device(&device_id).await.unwrap().unwrap();
        assert!(fetched
            .one_time_prekeys
            .iter()
            .any(|p| p.used && p.key.as_bytes() == prekey.as_bytes()));
    }

    #[tokio::test]
    async fn test_pull_excludes_delivered_and_other_devices() {
        let relay = MemoryRelay::new();

        let ids = relay
            .push_envelopes(vec![sample_envelope("dev-1"), sample_envelope("dev-2")])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        let batch = relay.pull_envelopes("dev-1").await.unwrap();
        assert_eq!(batch.len(), 1);

        relay
            .acknowledge(&[batch[0].0.clone()], ReceiptKind::Delivered)
            .await
            .unwrap();
        assert!(relay.pull_envelopes("dev-1").await.unwrap().is_empty());
        assert_eq!(relay.undelivered_count().await, 1);
    }

    #[tokio::test]
    async fn test_read_receipt_is_monotonic() {
        let relay = MemoryRelay::new();
        let ids = relay
            .push_envelopes(vec![sample_envelope("dev-1")])
            .await
            .unwrap();

        relay.acknowledge(&ids, ReceiptKind::Read).await.unwrap();

        // Read implies delivered
        assert!(relay.pull_envelopes("dev-1").await.unwrap().is_empty());
        assert!(relay.is_read(&ids[0]).await);

        // Re-acknowledging is a no-op
        relay.acknowledge(&ids, ReceiptKind::Delivered).await.unwrap();
        assert!(relay.is_read(&ids[0]).await);
    }

    #[tokio::test]
    async fn test_pull_is_oldest_first_and_bounded() {
        let relay = MemoryRelay::new();
        let envelopes: Vec<_> = (0..MAX_PULL_BATCH + 5)
            .map(|_| sample_envelope("dev-1"))
            .collect();
        relay.push_envelopes(envelopes).await.unwrap();

        let batch = relay.pull_envelopes("dev-1").await.unwrap();
        assert_eq!(batch.len(), MAX_PULL_BATCH);
        assert_eq!(batch[0].0, "env-0");
        assert_eq!(batch[1].0, "env-1");
    }
}
