//! Hushwire Storage - encrypted key material and session persistence
//!
//! Provides the device-local persistent store:
//! - Identity keys and prekey private halves, encrypted under a passphrase
//! - Ratchet session state keyed by peer device id
//! - Small settings table

pub mod database;
pub mod error;
pub mod keystore;

pub use database::{Database, StoredSession};
pub use error::{Error, Result};
pub use keystore::KeyStore;
