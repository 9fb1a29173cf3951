//! Client error types
//!
//! The taxonomy separates failures a caller should retry automatically
//! (network trouble) from failures that demand explicit action (security
//! violations): see [`Error::is_retryable`].

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized - create an identity first")]
    NotInitialized,

    #[error("Already initialized")]
    AlreadyInitialized,

    #[error("No session with peer device {0}")]
    NoSession(String),

    #[error("Security violation: {0}")]
    Security(#[source] hushwire_core::Error),

    #[error("Decryption failed: {0}")]
    Decrypt(#[source] hushwire_core::Error),

    #[error("No signed prekey available for responder handshake")]
    NoSignedPrekey,

    #[error("Crypto error: {0}")]
    Crypto(#[from] hushwire_core::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] hushwire_storage::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a caller may retry automatically (with backoff)
    ///
    /// Security violations and storage failures are never retryable; they
    /// surface to the user instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
