//! Key derivation functions
//!
//! HKDF-SHA256 seeds the root secret and splits session chains; BLAKE2b
//! advances the per-message chains. Labels are domain-separated so no
//! derived key can stand in for another.

use blake2::{Blake2b512, Digest};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Error, Result};

/// Domain separation prefix for Hushwire
const INFO_PREFIX: &[u8] = b"hushwire_v1_";

/// Size of root, chain, and message keys in bytes
pub const KEY_SIZE: usize = 32;

/// Derive the root secret from concatenated DH outputs (X3DH step 5)
pub fn derive_root_secret(dh_outputs: &[u8]) -> Result<[u8; KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, dh_outputs);
    let mut root = [0u8; KEY_SIZE];

    let mut info = INFO_PREFIX.to_vec();
    info.extend_from_slice(b"x3dh_root");

    hkdf.expand(&info, &mut root)
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;

    Ok(root)
}

/// Derive the two session chain keys from the root secret and the ratchet
/// DH output
///
/// Returns `(send_labeled, recv_labeled)`. Which chain each key seeds
/// depends on the caller's role: the initiator sends on the "send"-labeled
/// key, the responder sends on the "recv"-labeled key, so the two sides'
/// chains cross-match.
pub fn kdf_session(root: &[u8; KEY_SIZE], dh_output: &[u8; 32]) -> ([u8; KEY_SIZE], [u8; KEY_SIZE]) {
    let hkdf = Hkdf::<Sha256>::new(Some(root), dh_output);

    let mut send = [0u8; KEY_SIZE];
    let mut recv = [0u8; KEY_SIZE];

    hkdf.expand(b"hushwire_v1_send", &mut send)
        .expect("32 bytes is valid");
    hkdf.expand(b"hushwire_v1_recv", &mut recv)
        .expect("32 bytes is valid");

    (send, recv)
}

/// Advance a message chain one step
///
/// Returns `(next_chain_key, message_key)`. Both derivations are
/// independent one-way functions of the current chain key, so a leaked
/// message key reveals neither the chain key nor any future key.
pub fn kdf_chain(chain_key: &[u8; KEY_SIZE]) -> ([u8; KEY_SIZE], [u8; KEY_SIZE]) {
    let mut hasher = Blake2b512::new();
    hasher.update(chain_key);
    hasher.update(b"msg");
    let hash = hasher.finalize();
    let mut message_key = [0u8; KEY_SIZE];
    message_key.copy_from_slice(&hash[..KEY_SIZE]);

    let mut hasher = Blake2b512::new();
    hasher.update(chain_key);
    hasher.update(b"next");
    let hash = hasher.finalize();
    let mut next_chain_key = [0u8; KEY_SIZE];
    next_chain_key.copy_from_slice(&hash[..KEY_SIZE]);

    (next_chain_key, message_key)
}

/// Concatenate byte slices for use as KDF input
pub fn concat_keys(keys: &[&[u8]]) -> Vec<u8> {
    let total_len: usize = keys.iter().map(|k| k.len()).sum();
    let mut result = Vec::with_capacity(total_len);
    for key in keys {
        result.extend_from_slice(key);
    }
    result
}
