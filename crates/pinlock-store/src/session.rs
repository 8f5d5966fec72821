//! Volatile session cache for the decrypted gate secret
//!
//! The secret is held only for the lifetime of the current session and is
//! never written to the durable layer. Absence of a session secret while a
//! gate record exists means "locked".

use parking_lot::RwLock;
use zeroize::Zeroizing;

/// Session-scoped slot for the decrypted gate secret.
///
/// Constructed once per context and passed by handle; dropping it (or the
/// session ending) is what clears the unlock state. Contents are zeroized
/// on clear and on drop.
#[derive(Default)]
pub struct SessionCache {
    secret: RwLock<Option<Zeroizing<String>>>,
}

impl SessionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the decrypted gate secret for this session
    pub fn set(&self, secret: &str) {
        *self.secret.write() = Some(Zeroizing::new(secret.to_owned()));
    }

    /// Get the session secret, if present
    pub fn get(&self) -> Option<Zeroizing<String>> {
        self.secret
            .read()
            .as_ref()
            .map(|s| Zeroizing::new(s.to_string()))
    }

    /// Whether a secret is cached
    pub fn is_set(&self) -> bool {
        self.secret.read().is_some()
    }

    /// Drop the session secret
    pub fn clear(&self) {
        *self.secret.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear() {
        let cache = SessionCache::new();
        assert!(!cache.is_set());
        assert!(cache.get().is_none());

        cache.set("deadbeef");
        assert!(cache.is_set());
        assert_eq!(cache.get().unwrap().as_str(), "deadbeef");

        cache.clear();
        assert!(!cache.is_set());
        assert!(cache.get().is_none());
    }

    #[test]
    fn set_overwrites() {
        let cache = SessionCache::new();
        cache.set("first");
        cache.set("second");
        assert_eq!(cache.get().unwrap().as_str(), "second");
    }
}
