//! Error types for Hushwire Core

use thiserror::Error;

/// Core error type for Hushwire cryptographic operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("Prekey batch must contain at least one one-time prekey")]
    EmptyPrekeyBatch,

    #[error("Invalid envelope field: {0}")]
    InvalidEnvelope(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("QR encoding failed: {0}")]
    QrEncoding(String),
}

/// Result type for Hushwire Core operations
pub type Result<T> = std::result::Result<T, Error>;
