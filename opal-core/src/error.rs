//! Error types for opal-core

use thiserror::Error;

/// Wire codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Notification event errors
#[derive(Error, Debug)]
pub enum EventError {
    #[error("invalid event name: {0}")]
    InvalidName(String),

    #[error("invalid filter value: {0}")]
    InvalidFilterValue(String),
}

/// Stream encryption errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("malformed ciphertext header: {0}")]
    Header(String),

    #[error("unknown cipher algorithm: {0}")]
    UnknownAlgorithm(u8),
}

/// Bucket lifecycle document errors
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("malformed lifecycle document: {0}")]
    Malformed(String),

    #[error("lifecycle validation failed: {0}")]
    Validation(String),
}
