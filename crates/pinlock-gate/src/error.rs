//! Error types

/// Gate errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Cryptographic engine error
    #[error("Crypto error: {0}")]
    Crypto(#[from] pinlock_crypto::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] pinlock_store::Error),

    /// Input failed validation before any crypto or storage work
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation requires a configured PIN and none exists
    #[error("No PIN configured")]
    NoPinConfigured,

    /// A PIN entry flow is already active
    #[error("A PIN entry flow is already active")]
    EntryInProgress,

    /// Gate error (generic)
    #[error("Gate error: {0}")]
    Gate(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
