//! Error types

/// Cryptographic engine errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The platform's cryptographic backend is unavailable
    #[error("Cryptographic backend unavailable: {0}")]
    Unavailable(String),

    /// Input failed validation before any cryptographic work
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authenticated decryption failed.
    ///
    /// Deliberately carries no detail: a wrong PIN and a tampered or
    /// truncated record are indistinguishable to callers.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Encoding or hash-format error
    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
