//! Durable gate record model

use pinlock_crypto::SealedSecret;
use serde::{Deserialize, Serialize};

/// The single durable record behind the gate.
///
/// Exists iff a PIN has been configured. Persisted layout:
///
/// ```json
/// {
///   "encryptedSecret": { "iv": "...", "salt": "...", "data": "...", "version": 1 },
///   "lastUnlockTime": 1735689600000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateRecord {
    /// The gate secret sealed under the current PIN
    pub encrypted_secret: SealedSecret,
    /// Last successful unlock, epoch milliseconds
    pub last_unlock_time: Option<i64>,
}

impl GateRecord {
    /// Create a record stamped with the current time
    pub fn new(encrypted_secret: SealedSecret) -> Self {
        Self {
            encrypted_secret,
            last_unlock_time: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Whether the last unlock happened within `duration` of now.
    ///
    /// Informational only: re-authentication is always required once the
    /// session cache is cleared, regardless of this value.
    pub fn unlocked_within(&self, duration: chrono::Duration) -> bool {
        match self.last_unlock_time {
            Some(ms) => {
                let now = chrono::Utc::now().timestamp_millis();
                now.saturating_sub(ms) <= duration.num_milliseconds()
            }
            None => false,
        }
    }
}
