//! Cryptographic primitives for Hushwire
//!
//! This module provides:
//! - `keys`: Identity and prekey management
//! - `x3dh`: Extended Triple Diffie-Hellman key agreement
//! - `ratchet`: Per-direction symmetric message chains
//! - `aead`: Authenticated encryption (XChaCha20-Poly1305)
//! - `kdf`: Key derivation functions
//! - `safety`: Safety codes for identity verification

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod ratchet;
pub mod safety;
pub mod x3dh;

pub use keys::{
    DeviceBundle, EphemeralKeyPair, IdentityKeyPair, IdentityPublicKey, OneTimePrekey,
    PrekeyBatch, SignedPrekey,
};
pub use ratchet::{ExportedRatchetState, RatchetState, Role};
pub use safety::SafetyCode;
pub use x3dh::{initiate, respond, Handshake, RootSecret};
