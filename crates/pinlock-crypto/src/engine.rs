//! Key derivation, sealing, and random token generation

use crate::sealed::{SealedSecret, FORMAT_VERSION};
use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{pbkdf2_hmac, Params, Pbkdf2};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Derived key length in bytes (AES-256)
pub const KEY_LENGTH: usize = 32;

/// KDF salt length in bytes
pub const SALT_LENGTH: usize = 16;

/// AES-GCM nonce length in bytes
pub const NONCE_LENGTH: usize = 12;

/// PBKDF2-HMAC-SHA256 iteration count.
///
/// Deliberately slow: stretching a 4-digit PIN is the whole point, and a
/// few hundred milliseconds per derivation is acceptable.
pub const KDF_ITERATIONS: u32 = 100_000;

/// Gate secret length in bytes before hex encoding (256 bits)
pub const GATE_SECRET_LENGTH: usize = 32;

/// Secure identifier length in bytes before hex encoding
pub const SECURE_ID_LENGTH: usize = 16;

/// A PIN-derived AES-256 key, zeroized on drop
pub struct DerivedKey(Zeroizing<[u8; KEY_LENGTH]>);

impl DerivedKey {
    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

/// Probe the OS CSPRNG.
///
/// The AEAD and KDF are compiled into the binary; the random source is the
/// only platform service that can genuinely be absent. Callers should treat
/// a failure here as fatal to the PIN feature and disable it rather than
/// retry.
pub fn ensure_available() -> Result<()> {
    let mut probe = [0u8; 1];
    fill_random(&mut probe)
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        tracing::warn!("OS random source unavailable: {e}");
        Error::Unavailable(e.to_string())
    })
}

/// Generate a fresh KDF salt
pub fn generate_salt() -> Result<[u8; SALT_LENGTH]> {
    let mut salt = [0u8; SALT_LENGTH];
    fill_random(&mut salt)?;
    Ok(salt)
}

/// Generate a new gate secret: 256 random bits, hex-encoded.
///
/// Generated once at PIN setup, never displayed or transmitted. Its
/// decrypted presence in the session cache is what "unlocked" means.
pub fn generate_gate_secret() -> Result<Zeroizing<String>> {
    let mut bytes = Zeroizing::new([0u8; GATE_SECRET_LENGTH]);
    fill_random(&mut *bytes)?;
    Ok(Zeroizing::new(hex::encode(bytes.as_slice())))
}

/// Generate an opaque hex identifier from the CSPRNG.
///
/// Unrelated to the PIN logic; shares the random source and its
/// availability semantics.
pub fn generate_secure_id() -> Result<String> {
    let mut bytes = [0u8; SECURE_ID_LENGTH];
    fill_random(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// Derive an AES-256 key from a PIN and salt.
///
/// Deterministic given `(pin, salt)`. The key lives only in memory and is
/// zeroized on drop.
pub fn derive_key(pin: &str, salt: &[u8]) -> Result<DerivedKey> {
    if salt.len() < SALT_LENGTH {
        return Err(Error::Validation("Salt too short".to_string()));
    }

    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    pbkdf2_hmac::<Sha256>(pin.as_bytes(), salt, KDF_ITERATIONS, &mut *key);
    Ok(DerivedKey(key))
}

/// Seal a plaintext under a PIN.
///
/// Generates a fresh salt and nonce per call; a nonce is never reused for a
/// given key because the key itself is fresh per salt.
pub fn seal_secret(plaintext: &[u8], pin: &str) -> Result<SealedSecret> {
    let salt = generate_salt()?;
    let mut iv = [0u8; NONCE_LENGTH];
    fill_random(&mut iv)?;

    let key = derive_key(pin, &salt)?;
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let data = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| Error::Encoding(e.to_string()))?;

    Ok(SealedSecret {
        iv: iv.to_vec(),
        salt: salt.to_vec(),
        data,
        version: FORMAT_VERSION,
    })
}

/// Open a sealed secret with a PIN.
///
/// Every failure mode collapses into [`Error::AuthenticationFailed`]: a
/// wrong PIN, a flipped ciphertext bit, a truncated field, and an unknown
/// version are indistinguishable, so the result cannot be used as an
/// oracle for whether the record is corrupt or the PIN is wrong.
pub fn open_secret(sealed: &SealedSecret, pin: &str) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.version != FORMAT_VERSION
        || sealed.iv.len() != NONCE_LENGTH
        || sealed.salt.len() != SALT_LENGTH
    {
        return Err(Error::AuthenticationFailed);
    }

    let key = derive_key(pin, &sealed.salt)?;
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(&sealed.iv), sealed.data.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| Error::AuthenticationFailed)
}

/// Hash a PIN into a PHC string for verify-only use cases.
///
/// Independent of the gate-secret path: this is a one-way hash, not a key
/// wrap, for callers that only ever need [`verify_pin`].
pub fn hash_pin(pin: &str) -> Result<String> {
    ensure_available()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Pbkdf2
        .hash_password_customized(
            pin.as_bytes(),
            None,
            None,
            Params {
                rounds: KDF_ITERATIONS,
                output_length: KEY_LENGTH,
            },
            &salt,
        )
        .map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a PIN against a PHC string produced by [`hash_pin`].
///
/// Comparison is constant-time inside the password-hash machinery.
pub fn verify_pin(pin: &str, phc_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(phc_hash).map_err(|e| Error::Encoding(e.to_string()))?;
    match Pbkdf2.verify_password(pin.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(pbkdf2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(Error::Encoding(e.to_string())),
    }
}
