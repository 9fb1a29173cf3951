//! Extended Triple Diffie-Hellman (X3DH) key agreement
//!
//! Derives a shared root secret between two devices that have never
//! communicated, using only the responder's published bundle. Asynchronous
//! by design: the responder need not be online when the initiator runs the
//! handshake.
//!
//! The protocol uses X25519 for all Diffie-Hellman operations.

use x25519_dalek::PublicKey as X25519PublicKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::kdf::{concat_keys, derive_root_secret, KEY_SIZE};
use super::keys::{DeviceBundle, EphemeralKeyPair, IdentityKeyPair, OneTimePrekey, SignedPrekey};
use crate::error::Result;

/// The shared value produced by the handshake, used once to seed a
/// session's chain keys
#[derive(ZeroizeOnDrop)]
pub struct RootSecret([u8; KEY_SIZE]);

impl RootSecret {
    /// Get the secret bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Result of an initiator-side handshake
pub struct Handshake {
    /// The derived root secret
    pub root_secret: RootSecret,
    /// Ephemeral key pair generated for this handshake; its public half
    /// travels to the peer in the first envelope's ratchet-public field
    pub ephemeral: EphemeralKeyPair,
    /// The one-time prekey consumed from the bundle, if any. The caller
    /// must report it to the directory so it is marked used.
    pub used_prekey: Option<X25519PublicKey>,
}

/// Initiate a handshake against a peer's published bundle
///
/// Verifies the signed prekey signature, selects the first unused one-time
/// prekey (proceeding with three DH terms when the bundle is depleted), and
/// derives the root secret from DH1..DH4.
///
/// A signature failure is a trust violation: the handshake aborts with
/// [`Error::SignatureVerification`](crate::Error::SignatureVerification)
/// and must not be retried with the same bundle.
pub fn initiate(identity: &IdentityKeyPair, peer_bundle: &DeviceBundle) -> Result<Handshake> {
    peer_bundle.verify()?;

    let one_time = peer_bundle.first_unused_prekey();
    let ephemeral = EphemeralKeyPair::generate();

    // DH1 = DH(IK_A, SPK_B)
    let dh1 = identity
        .dh_secret()
        .diffie_hellman(&peer_bundle.signed_prekey.key);
    // DH2 = DH(EK_A, IK_B)
    let dh2 = ephemeral
        .secret()
        .diffie_hellman(&peer_bundle.identity_dh_x25519);
    // DH3 = DH(EK_A, SPK_B)
    let dh3 = ephemeral
        .secret()
        .diffie_hellman(&peer_bundle.signed_prekey.key);

    let mut dh_material = concat_keys(&[dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes()]);

    // DH4 = DH(EK_A, OPK_B) when a one-time prekey is available
    let used_prekey = if let Some(otp) = one_time {
        let dh4 = ephemeral.secret().diffie_hellman(&otp.key);
        dh_material.extend_from_slice(dh4.as_bytes());
        Some(otp.key)
    } else {
        None
    };

    let root = derive_root_secret(&dh_material)?;
    dh_material.zeroize();

    Ok(Handshake {
        root_secret: RootSecret(root),
        ephemeral,
        used_prekey,
    })
}

/// Responder side of the handshake
///
/// Mirrors [`initiate`] using the responder's private halves: the signed
/// prekey, the consumed one-time prekey (if the initiator used one), the
/// initiator's identity DH key, and the initiator's ephemeral public key
/// from the first envelope.
pub fn respond(
    identity: &IdentityKeyPair,
    signed_prekey: &SignedPrekey,
    one_time_prekey: Option<&OneTimePrekey>,
    initiator_identity_dh: &X25519PublicKey,
    initiator_ephemeral: &X25519PublicKey,
) -> Result<RootSecret> {
    // DH1 = DH(SPK_B, IK_A)
    let dh1 = signed_prekey.secret().diffie_hellman(initiator_identity_dh);
    // DH2 = DH(IK_B, EK_A)
    let dh2 = identity.dh_secret().diffie_hellman(initiator_ephemeral);
    // DH3 = DH(SPK_B, EK_A)
    let dh3 = signed_prekey.secret().diffie_hellman(initiator_ephemeral);

    let mut dh_material = concat_keys(&[dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes()]);

    // DH4 = DH(OPK_B, EK_A) when the initiator consumed a one-time prekey
    if let Some(otp) = one_time_prekey {
        let dh4 = otp.secret().diffie_hellman(initiator_ephemeral);
        dh_material.extend_from_slice(dh4.as_bytes());
    }

    let root = derive_root_secret(&dh_material)?;
    dh_material.zeroize();

    Ok(RootSecret(root))
}
