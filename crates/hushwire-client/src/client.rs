//! Hushwire messenger - main client interface
//!
//! Ties the protocol core, local storage, and the directory/relay
//! collaborators together: identity bootstrap, bundle publication, fan-out
//! encryption to every recipient device, and pull-side decryption with
//! session bootstrap on first contact.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use ed25519_dalek::VerifyingKey;

use hushwire_core::crypto::keys::{DeviceBundle, IdentityKeyPair, IdentityPublicKey, OneTimePrekey};
use hushwire_core::crypto::ratchet::{RatchetState, Role};
use hushwire_core::crypto::safety::SafetyCode;
use hushwire_core::crypto::x3dh;
use hushwire_core::envelope::{conversation_id, AssociatedData, Envelope};
use hushwire_storage::{Database, KeyStore};

use crate::directory::{Directory, EnvelopeId, ReceiptKind, Relay};
use crate::error::{Error, Result};
use crate::session::{Session, SessionManager};

const KEYSTORE_FILE: &str = "keystore.bin";
const DATABASE_FILE: &str = "hushwire.db";

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Data directory for the keystore and database
    pub data_dir: PathBuf,
    /// One-time prekeys per published batch
    pub prekey_count: u32,
    /// Timeout applied to every directory/relay call
    pub request_timeout: Duration,
    /// Base interval of the background pull loop
    pub pull_interval: Duration,
    /// Backoff cap for the pull loop after repeated failures
    pub max_backoff: Duration,
}

impl ClientConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            prekey_count: 40,
            request_timeout: Duration::from_secs(10),
            pull_interval: Duration::from_secs(4),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// A decrypted incoming message
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub envelope_id: EnvelopeId,
    pub sender_device_id: String,
    pub conversation_id: String,
    pub plaintext: Vec<u8>,
}

impl IncomingMessage {
    /// Plaintext as UTF-8 text, if it is text
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.plaintext).ok()
    }
}

/// Hushwire client for one device
pub struct Messenger<D, R> {
    config: ClientConfig,
    user_id: String,
    passphrase: String,
    identity: IdentityKeyPair,
    keystore: StdMutex<KeyStore>,
    sessions: SessionManager,
    directory: Arc<D>,
    relay: Arc<R>,
}

impl<D: Directory, R: Relay> Messenger<D, R> {
    /// Open the client, ensuring a device identity exists
    ///
    /// Loads the keystore if present (verifying the passphrase), otherwise
    /// generates and persists a fresh identity with a stable device id.
    /// Idempotent: an existing identity is never regenerated.
    pub fn open(
        config: ClientConfig,
        user_id: impl Into<String>,
        passphrase: &str,
        directory: Arc<D>,
        relay: Arc<R>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let keystore_path = config.data_dir.join(KEYSTORE_FILE);
        let (keystore, identity) = if keystore_path.exists() {
            let bytes = std::fs::read(&keystore_path)?;
            let keystore = KeyStore::from_bytes(&bytes)?;
            let identity = keystore.open(passphrase)?;
            (keystore, identity)
        } else {
            let (keystore, identity) = KeyStore::create(passphrase)?;
            std::fs::write(&keystore_path, keystore.to_bytes()?)?;
            (keystore, identity)
        };

        let database = Database::open(config.data_dir.join(DATABASE_FILE))?;
        let db = Arc::new(StdMutex::new(database));

        tracing::info!(device = identity.device_id(), "device identity ready");

        Ok(Self {
            config,
            user_id: user_id.into(),
            passphrase: passphrase.to_string(),
            identity,
            keystore: StdMutex::new(keystore),
            sessions: SessionManager::new(db),
            directory,
            relay,
        })
    }

    /// This client's user id
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// This client's stable device id
    pub fn device_id(&self) -> &str {
        self.identity.device_id()
    }

    /// Public half of this device's identity
    pub fn identity_public(&self) -> IdentityPublicKey {
        self.identity.public_key()
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of one-time prekey private halves still stored locally
    pub fn one_time_prekey_count(&self) -> usize {
        self.keystore
            .lock()
            .expect("keystore lock poisoned")
            .one_time_prekey_count()
    }

    /// Safety code for out-of-band verification against a peer identity
    pub fn safety_code(&self, peer_signing: &VerifyingKey) -> SafetyCode {
        SafetyCode::derive(self.identity.public_key().verifying_key(), peer_signing)
    }

    /// Generate a fresh prekey batch and publish the device bundle
    ///
    /// Replaces any stored unpublished prekey material, so the matching
    /// bundle is published before this returns.
    pub async fn publish_bundle(&self) -> Result<DeviceBundle> {
        let bundle = {
            let mut keystore = self.keystore.lock().expect("keystore lock poisoned");
            let batch = keystore.generate_prekey_batch(
                &self.passphrase,
                &self.identity,
                self.config.prekey_count,
            )?;
            batch.bundle(&self.identity)
        };
        self.persist_keystore()?;

        self.with_timeout(self.directory.publish_bundle(&self.user_id, bundle.clone()))
            .await?;

        tracing::info!(
            device = %bundle.device_id,
            prekeys = bundle.one_time_prekeys.len(),
            "published device bundle"
        );
        Ok(bundle)
    }

    /// Send a text message to every device of a user
    ///
    /// Ensures a session per recipient device (bootstrapping via X3DH on
    /// first contact, consuming exactly one one-time prekey) and produces
    /// one envelope per device. Returns the relay-assigned envelope ids.
    pub async fn send_text(&self, to_user: &str, text: &str) -> Result<Vec<EnvelopeId>> {
        let bundles = self
            .with_timeout(self.directory.fetch_bundles(to_user))
            .await?;

        let mut envelopes = Vec::with_capacity(bundles.len());
        for bundle in &bundles {
            if bundle.device_id == self.device_id() {
                continue;
            }
            let envelope = self
                .encrypt_to_device(to_user, bundle, text.as_bytes(), "text")
                .await?;
            envelopes.push(envelope);
        }

        if envelopes.is_empty() {
            tracing::warn!(user = to_user, "no recipient devices, nothing sent");
            return Ok(Vec::new());
        }

        let count = envelopes.len();
        let ids = self
            .with_timeout(self.relay.push_envelopes(envelopes))
            .await?;
        tracing::info!(user = to_user, count, "fanned out envelopes");
        Ok(ids)
    }

    /// Pull undelivered envelopes once and decrypt what we can
    ///
    /// Individual decrypt failures are skipped without aborting the batch.
    /// Every envelope fetched is acknowledged as delivered, best-effort and
    /// idempotent, whether or not its decrypt succeeded.
    pub async fn pull_once(&self) -> Result<Vec<IncomingMessage>> {
        let batch = self
            .with_timeout(self.relay.pull_envelopes(self.device_id()))
            .await?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut messages = Vec::new();
        let mut ids = Vec::with_capacity(batch.len());
        for (id, envelope) in batch {
            ids.push(id.clone());
            match self.decrypt_envelope(&envelope).await {
                Ok(plaintext) => messages.push(IncomingMessage {
                    envelope_id: id,
                    sender_device_id: envelope.sender_device_id,
                    conversation_id: envelope.conversation_id,
                    plaintext,
                }),
                Err(e) => {
                    tracing::debug!(envelope = %id, error = %e, "skipping envelope");
                }
            }
        }

        if let Err(e) = self
            .with_timeout(self.relay.acknowledge(&ids, ReceiptKind::Delivered))
            .await
        {
            tracing::warn!(error = %e, "delivery receipt failed, retried on next pull");
        }

        tracing::debug!(
            fetched = ids.len(),
            decrypted = messages.len(),
            "pull complete"
        );
        Ok(messages)
    }

    /// Mark envelopes as read
    pub async fn mark_read(&self, ids: &[EnvelopeId]) -> Result<()> {
        self.with_timeout(self.relay.acknowledge(ids, ReceiptKind::Read))
            .await
    }

    /// Tear down the in-memory session registry (logout)
    ///
    /// Persisted state is untouched; a later [`open`](Messenger::open)
    /// restores sessions lazily.
    pub fn close(&self) {
        self.sessions.close();
    }

    /// Encrypt one message for one recipient device, bootstrapping the
    /// session first if needed. The whole operation runs under the
    /// per-peer slot lock.
    async fn encrypt_to_device(
        &self,
        to_user: &str,
        bundle: &DeviceBundle,
        plaintext: &[u8],
        message_type: &str,
    ) -> Result<Envelope> {
        let slot = self.sessions.slot(&bundle.device_id);
        let mut guard = slot.lock().await;

        if guard.is_none() && !self.sessions.restore(&mut guard, &bundle.device_id)? {
            self.bootstrap_initiator(&mut guard, to_user, bundle).await?;
        }

        let session = guard
            .as_mut()
            .ok_or_else(|| Error::NoSession(bundle.device_id.clone()))?;

        let aad = AssociatedData::new(to_user, bundle.device_id.as_str(), message_type);
        let aad_bytes = aad.to_bytes()?;
        let sealed = session.ratchet_mut().encrypt(plaintext, &aad_bytes)?;
        self.sessions.persist(session)?;

        Ok(Envelope::assemble(
            conversation_id(&self.user_id, to_user),
            self.device_id(),
            to_user,
            bundle.device_id.as_str(),
            &aad_bytes,
            &sealed,
        ))
    }

    /// Initiator-side session bootstrap against a published bundle
    async fn bootstrap_initiator(
        &self,
        guard: &mut Option<Session>,
        to_user: &str,
        bundle: &DeviceBundle,
    ) -> Result<()> {
        let handshake = x3dh::initiate(&self.identity, bundle).map_err(|e| match e {
            hushwire_core::Error::SignatureVerification => Error::Security(e),
            other => Error::Crypto(other),
        })?;

        // Report the consumed prekey so the directory marks it used; the
        // handshake stands even if the directory has already seen it.
        if let Some(used) = handshake.used_prekey {
            let found = self
                .with_timeout(self.directory.consume_prekey(&bundle.device_id, &used))
                .await?;
            if !found {
                tracing::warn!(device = %bundle.device_id, "consumed prekey unknown to directory");
            }
        } else {
            tracing::warn!(
                device = %bundle.device_id,
                "peer prekeys depleted, degraded three-term handshake"
            );
        }

        let ratchet = RatchetState::init_session(
            &handshake.root_secret,
            handshake.ephemeral.secret().clone(),
            &bundle.signed_prekey.key,
            Role::Initiator,
        );

        let session = Session::new(bundle.device_id.clone(), ratchet);
        self.sessions.persist(&session)?;
        *guard = Some(session);

        tracing::info!(device = %bundle.device_id, user = to_user, "session established as initiator");
        Ok(())
    }

    /// Decrypt one envelope under the sender-device slot lock,
    /// bootstrapping the responder side of the session on first contact
    async fn decrypt_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let peer = envelope.sender_device_id.clone();
        let slot = self.sessions.slot(&peer);
        let mut guard = slot.lock().await;

        if guard.is_none() && !self.sessions.restore(&mut guard, &peer)? {
            return self.bootstrap_responder(&mut guard, envelope).await;
        }

        let session = guard.as_mut().ok_or_else(|| Error::NoSession(peer))?;

        let header = envelope.header_bytes()?;
        let ciphertext = envelope.ciphertext_bytes()?;
        let nonce = envelope.nonce_bytes()?;

        let plaintext = session
            .ratchet_mut()
            .decrypt(&ciphertext, &nonce, &header)
            .map_err(Error::Decrypt)?;
        self.sessions.persist(session)?;

        Ok(plaintext)
    }

    /// Responder-side bootstrap from a first envelope
    ///
    /// The envelope carries the initiator's ephemeral key but not which
    /// one-time prekey was consumed, so each stored private half is
    /// trialed (then the no-prekey case) until one authenticates the
    /// envelope. The winning prekey is deleted from the keystore.
    async fn bootstrap_responder(
        &self,
        guard: &mut Option<Session>,
        envelope: &Envelope,
    ) -> Result<Vec<u8>> {
        let peer = &envelope.sender_device_id;
        let sender_bundle = self
            .with_timeout(self.directory.fetch_device(peer))
            .await?
            .ok_or_else(|| Error::NoSession(peer.clone()))?;

        let (signed_prekey, one_time_prekeys) = {
            let keystore = self.keystore.lock().expect("keystore lock poisoned");
            let spk = keystore
                .signed_prekey(&self.passphrase)?
                .ok_or(Error::NoSignedPrekey)?;
            let otps = keystore.one_time_prekeys(&self.passphrase)?;
            (spk, otps)
        };

        let ephemeral = envelope.ratchet_public()?;
        let header = envelope.header_bytes()?;
        let ciphertext = envelope.ciphertext_bytes()?;
        let nonce = envelope.nonce_bytes()?;

        let mut candidates: Vec<Option<&OneTimePrekey>> =
            one_time_prekeys.iter().map(Some).collect();
        candidates.push(None);

        for candidate in candidates {
            let root = x3dh::respond(
                &self.identity,
                &signed_prekey,
                candidate,
                &sender_bundle.identity_dh_x25519,
                &ephemeral,
            )?;
            let mut ratchet = RatchetState::init_session(
                &root,
                signed_prekey.secret().clone(),
                &ephemeral,
                Role::Responder,
            );

            let Ok(plaintext) = ratchet.decrypt(&ciphertext, &nonce, &header) else {
                continue;
            };

            if let Some(consumed) = candidate {
                let mut keystore = self.keystore.lock().expect("keystore lock poisoned");
                keystore.consume_one_time_prekey(&self.passphrase, consumed.id)?;
            }
            if candidate.is_some() {
                self.persist_keystore()?;
            }

            let session = Session::new(peer.clone(), ratchet);
            self.sessions.persist(&session)?;
            *guard = Some(session);

            tracing::info!(device = %peer, "session established as responder");
            return Ok(plaintext);
        }

        Err(Error::Decrypt(hushwire_core::Error::Decryption(
            "no prekey candidate authenticated the envelope".to_string(),
        )))
    }

    fn persist_keystore(&self) -> Result<()> {
        let bytes = {
            let keystore = self.keystore.lock().expect("keystore lock poisoned");
            keystore.to_bytes()?
        };
        std::fs::write(self.config.data_dir.join(KEYSTORE_FILE), bytes)?;
        Ok(())
    }

    /// Run a collaborator call under the configured request timeout
    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.request_timeout, fut)
            .await
            .map_err(|_| Error::Timeout(self.config.request_timeout))?
    }
}
