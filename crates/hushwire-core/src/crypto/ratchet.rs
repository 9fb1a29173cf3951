//! Per-direction symmetric message chains
//!
//! Each session holds an independent send chain and receive chain seeded
//! once from the handshake root secret. Every message advances its chain
//! through two independent one-way derivations, so a compromised message
//! key exposes neither earlier nor later messages.
//!
//! There is no per-message DH ratchet step and no buffer of skipped message
//! keys: delivery is strictly sequential per chain, and an envelope that
//! arrives out of order fails to authenticate until its predecessors have
//! been processed. Both are deliberate simplifications; a DH ratchet
//! triggered by a new incoming ratchet key, and a bounded skipped-key map,
//! are the natural extension points.

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::aead;
use super::kdf::{kdf_chain, kdf_session, KEY_SIZE};
use super::x3dh::RootSecret;
use crate::error::Result;

/// Which side of the handshake this session belongs to
///
/// Decides how the two session chain keys map onto the send and receive
/// chains: the initiator sends on the "send"-labeled key and the responder
/// sends on the "recv"-labeled key, so each side's send chain matches the
/// other side's receive chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Output of a single encryption step, carrying everything the envelope
/// needs
pub struct SealedMessage {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; aead::NONCE_SIZE],
    /// Post-increment send counter; the first message carries 1
    pub counter: u32,
    /// Our current ratchet public key, sent so the peer can bootstrap
    pub ratchet_public: X25519PublicKey,
}

/// Per-peer ratchet session state
///
/// One instance exists per (local device, peer device) pair, created on the
/// first successful handshake and mutated on every send and receive. Chain
/// keys only ever evolve forward; no chain key is recoverable from a later
/// one.
#[derive(ZeroizeOnDrop)]
pub struct RatchetState {
    send_chain_key: [u8; KEY_SIZE],
    #[zeroize(skip)]
    send_counter: u32,
    recv_chain_key: [u8; KEY_SIZE],
    #[zeroize(skip)]
    recv_counter: u32,
    our_ratchet_secret: X25519SecretKey,
    #[zeroize(skip)]
    our_ratchet_public: X25519PublicKey,
    #[zeroize(skip)]
    peer_ratchet_public: X25519PublicKey,
}

impl RatchetState {
    /// Initialize a session from a handshake root secret
    ///
    /// Performs one DH between the local and peer ratchet keys, combines it
    /// with the root secret, and splits the result into the two chains
    /// according to `role`. The root secret is not retained.
    pub fn init_session(
        root_secret: &RootSecret,
        our_ratchet_secret: X25519SecretKey,
        peer_ratchet_public: &X25519PublicKey,
        role: Role,
    ) -> Self {
        let dh = our_ratchet_secret.diffie_hellman(peer_ratchet_public);
        let (send_labeled, recv_labeled) = kdf_session(root_secret.as_bytes(), dh.as_bytes());

        let (send_chain_key, recv_chain_key) = match role {
            Role::Initiator => (send_labeled, recv_labeled),
            Role::Responder => (recv_labeled, send_labeled),
        };

        let our_ratchet_public = X25519PublicKey::from(&our_ratchet_secret);

        Self {
            send_chain_key,
            send_counter: 0,
            recv_chain_key,
            recv_counter: 0,
            our_ratchet_secret,
            our_ratchet_public,
            peer_ratchet_public: *peer_ratchet_public,
        }
    }

    /// Encrypt a message, advancing the send chain
    ///
    /// Derives a one-time message key and the next chain key, encrypts with
    /// a fresh random nonce binding `associated_data`, then replaces the
    /// chain key and increments the counter. Callers must serialize
    /// concurrent sends for the same peer device; interleaved sends must
    /// never observe the same chain key.
    pub fn encrypt(&mut self, plaintext: &[u8], associated_data: &[u8]) -> Result<SealedMessage> {
        let (next_chain_key, mut message_key) = kdf_chain(&self.send_chain_key);

        let nonce = aead::generate_nonce();
        let result = aead::seal(&message_key, &nonce, plaintext, associated_data);
        message_key.zeroize();
        let ciphertext = result?;

        self.send_chain_key.copy_from_slice(&next_chain_key);
        self.send_counter += 1;

        Ok(SealedMessage {
            ciphertext,
            nonce,
            counter: self.send_counter,
            ratchet_public: self.our_ratchet_public,
        })
    }

    /// Decrypt a message, advancing the receive chain only on success
    ///
    /// On authentication failure the chain is left untouched and the error
    /// surfaces to the caller; a later redelivery of the expected message
    /// can still succeed.
    pub fn decrypt(
        &mut self,
        ciphertext: &[u8],
        nonce: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        let (next_chain_key, mut message_key) = kdf_chain(&self.recv_chain_key);

        let result = aead::open(&message_key, nonce, ciphertext, associated_data);
        message_key.zeroize();
        let plaintext = result?;

        self.recv_chain_key.copy_from_slice(&next_chain_key);
        self.recv_counter += 1;

        Ok(plaintext)
    }

    /// Messages sent on this session
    pub fn send_counter(&self) -> u32 {
        self.send_counter
    }

    /// Messages received on this session
    pub fn recv_counter(&self) -> u32 {
        self.recv_counter
    }

    /// Our current ratchet public key
    pub fn our_ratchet_public(&self) -> &X25519PublicKey {
        &self.our_ratchet_public
    }

    /// The peer's current ratchet public key
    pub fn peer_ratchet_public(&self) -> &X25519PublicKey {
        &self.peer_ratchet_public
    }

    /// Export state for persistence
    pub fn export(&self) -> ExportedRatchetState {
        ExportedRatchetState {
            send_chain_key: self.send_chain_key,
            send_counter: self.send_counter,
            recv_chain_key: self.recv_chain_key,
            recv_counter: self.recv_counter,
            our_ratchet_secret: self.our_ratchet_secret.to_bytes(),
            peer_ratchet_public: self.peer_ratchet_public.to_bytes(),
        }
    }

    /// Restore state from an export
    pub fn import(exported: &ExportedRatchetState) -> Self {
        let our_ratchet_secret = X25519SecretKey::from(exported.our_ratchet_secret);
        let our_ratchet_public = X25519PublicKey::from(&our_ratchet_secret);

        Self {
            send_chain_key: exported.send_chain_key,
            send_counter: exported.send_counter,
            recv_chain_key: exported.recv_chain_key,
            recv_counter: exported.recv_counter,
            our_ratchet_secret,
            our_ratchet_public,
            peer_ratchet_public: X25519PublicKey::from(exported.peer_ratchet_public),
        }
    }

    #[cfg(test)]
    pub(crate) fn send_chain_key(&self) -> &[u8; KEY_SIZE] {
        &self.send_chain_key
    }

    #[cfg(test)]
    pub(crate) fn recv_chain_key(&self) -> &[u8; KEY_SIZE] {
        &self.recv_chain_key
    }
}

/// Serializable ratchet state for persistence
///
/// Contains raw secret bytes; the storage layer is responsible for
/// encrypting it at rest.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExportedRatchetState {
    pub send_chain_key: [u8; KEY_SIZE],
    pub send_counter: u32,
    pub recv_chain_key: [u8; KEY_SIZE],
    pub recv_counter: u32,
    pub our_ratchet_secret: [u8; 32],
    pub peer_ratchet_public: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{IdentityKeyPair, PrekeyBatch};
    use crate::crypto::x3dh::{initiate, respond};

    fn setup_sessions() -> (RatchetState, RatchetState) {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let bob_batch = PrekeyBatch::generate(&bob, 5, 1, 0).unwrap();
        let bundle = bob_batch.bundle(&bob);

        let handshake = initiate(&alice, &bundle).unwrap();
        let used = handshake.used_prekey.unwrap();
        let otp = bob_batch
            .one_time_prekeys
            .iter()
            .find(|k| k.public_key().key.as_bytes() == used.as_bytes())
            .unwrap();

        let bob_root = respond(
            &bob,
            &bob_batch.signed_prekey,
            Some(otp),
            alice.public_key().dh_public(),
            &handshake.ephemeral.public_key(),
        )
        .unwrap();

        // Alice's ratchet key is the handshake ephemeral; Bob's is his
        // signed prekey, whose public half Alice read from the bundle.
        let alice_session = RatchetState::init_session(
            &handshake.root_secret,
            handshake.ephemeral.secret().clone(),
            &bundle.signed_prekey.key,
            Role::Initiator,
        );

        let bob_session = RatchetState::init_session(
            &bob_root,
            bob_batch.signed_prekey.secret().clone(),
            &handshake.ephemeral.public_key(),
            Role::Responder,
        );

        (alice_session, bob_session)
    }

    #[test]
    fn test_chains_cross_match() {
        let (alice, bob) = setup_sessions();

        assert_eq!(alice.send_chain_key(), bob.recv_chain_key());
        assert_eq!(alice.recv_chain_key(), bob.send_chain_key());
        assert_ne!(alice.send_chain_key(), alice.recv_chain_key());
    }

    #[test]
    fn test_round_trip() {
        let (mut alice, mut bob) = setup_sessions();

        let sealed = alice.encrypt(b"Hello, Bob!", b"aad").unwrap();
        let plaintext = bob
            .decrypt(&sealed.ciphertext, &sealed.nonce, b"aad")
            .unwrap();

        assert_eq!(plaintext, b"Hello, Bob!");
        assert_eq!(sealed.counter, 1);
    }

    #[test]
    fn test_counters_increment_by_one() {
        let (mut alice, mut bob) = setup_sessions();

        for expected in 1..=3u32 {
            let sealed = alice.encrypt(b"msg", b"").unwrap();
            assert_eq!(sealed.counter, expected);
            bob.decrypt(&sealed.ciphertext, &sealed.nonce, b"").unwrap();
            assert_eq!(bob.recv_counter(), expected);
        }
        assert_eq!(alice.send_counter(), 3);
    }

    #[test]
    fn test_bidirectional() {
        let (mut alice, mut bob) = setup_sessions();

        let m1 = alice.encrypt(b"hi bob", b"").unwrap();
        assert_eq!(bob.decrypt(&m1.ciphertext, &m1.nonce, b"").unwrap(), b"hi bob");

        let m2 = bob.encrypt(b"hi alice", b"").unwrap();
        assert_eq!(
            alice.decrypt(&m2.ciphertext, &m2.nonce, b"").unwrap(),
            b"hi alice"
        );
    }

    #[test]
    fn test_unique_message_keys() {
        let (mut alice, _) = setup_sessions();

        // Same plaintext, different chain positions and nonces
        let m1 = alice.encrypt(b"same", b"").unwrap();
        let m2 = alice.encrypt(b"same", b"").unwrap();
        assert_ne!(m1.ciphertext, m2.ciphertext);
        assert_ne!(m1.nonce, m2.nonce);
    }

    #[test]
    fn test_dropped_message_desynchronizes() {
        let (mut alice, mut bob) = setup_sessions();

        let m1 = alice.encrypt(b"first", b"").unwrap();
        let _m2 = alice.encrypt(b"second", b"").unwrap();
        let m3 = alice.encrypt(b"third", b"").unwrap();

        bob.decrypt(&m1.ciphertext, &m1.nonce, b"").unwrap();

        // Message 2 dropped: message 3 cannot authenticate against the
        // chain position expecting message 2.
        assert!(bob.decrypt(&m3.ciphertext, &m3.nonce, b"").is_err());
        assert_eq!(bob.recv_counter(), 1);
    }

    #[test]
    fn test_failed_decrypt_leaves_chain_intact() {
        let (mut alice, mut bob) = setup_sessions();

        let m1 = alice.encrypt(b"first", b"").unwrap();
        let m2 = alice.encrypt(b"second", b"").unwrap();

        // Out-of-order arrival fails without advancing the chain...
        assert!(bob.decrypt(&m2.ciphertext, &m2.nonce, b"").is_err());
        assert_eq!(bob.recv_counter(), 0);

        // ...so redelivery in order still works.
        assert_eq!(bob.decrypt(&m1.ciphertext, &m1.nonce, b"").unwrap(), b"first");
        assert_eq!(
            bob.decrypt(&m2.ciphertext, &m2.nonce, b"").unwrap(),
            b"second"
        );
    }

    #[test]
    fn test_wrong_aad_fails() {
        let (mut alice, mut bob) = setup_sessions();

        let sealed = alice.encrypt(b"bound", b"header-a").unwrap();
        assert!(bob
            .decrypt(&sealed.ciphertext, &sealed.nonce, b"header-b")
            .is_err());
    }

    #[test]
    fn test_export_import_continuity() {
        let (mut alice, mut bob) = setup_sessions();

        let m1 = alice.encrypt(b"before export", b"").unwrap();
        bob.decrypt(&m1.ciphertext, &m1.nonce, b"").unwrap();

        let exported = alice.export();
        let mut restored = RatchetState::import(&exported);
        assert_eq!(restored.send_counter(), 1);

        let m2 = restored.encrypt(b"after import", b"").unwrap();
        assert_eq!(
            bob.decrypt(&m2.ciphertext, &m2.nonce, b"").unwrap(),
            b"after import"
        );
        assert_eq!(m2.counter, 2);
    }
}
