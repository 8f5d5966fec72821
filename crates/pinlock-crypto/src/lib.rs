//! Cryptographic engine for the Pinlock gate
//!
//! Implements the primitives the gate is built on: PBKDF2-HMAC-SHA256 key
//! stretching, AES-256-GCM sealing of the gate secret, a verify-only PIN
//! hash, and CSPRNG-backed token generation.
//!
//! ## Security Properties
//!
//! - **Key Stretching**: PBKDF2-HMAC-SHA256 with 100,000 iterations
//! - **Authenticated Encryption**: AES-256-GCM with a fresh salt and nonce
//!   per seal operation
//! - **Indistinguishable Failures**: wrong PIN and tampered ciphertext both
//!   surface as the same generic authentication failure
//! - **Zeroization**: derived keys and decrypted secrets are wiped on drop

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod sealed;

pub use engine::{
    derive_key, ensure_available, generate_gate_secret, generate_salt, generate_secure_id,
    hash_pin, open_secret, seal_secret, verify_pin, DerivedKey, GATE_SECRET_LENGTH,
    KDF_ITERATIONS, KEY_LENGTH, NONCE_LENGTH, SALT_LENGTH, SECURE_ID_LENGTH,
};
pub use error::{Error, Result};
pub use sealed::{SealedSecret, FORMAT_VERSION};
