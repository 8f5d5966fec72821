//! Gate orchestration over the crypto engine and the two stores
//!
//! The controller is a state machine over {no-pin, locked, unlocked}:
//! no durable record means the feature is disabled and everything is
//! unlocked; a record plus an empty session cache means locked; the
//! decrypted gate secret in the session cache means unlocked.

use crate::entry::{EntryMode, PinEntryFlow};
use crate::{Error, Result};
use parking_lot::Mutex;
use pinlock_crypto::SealedSecret;
use pinlock_store::{DurableGateStore, GateRecord, SessionCache};
use std::sync::Arc;
use tokio::sync::watch;
use zeroize::Zeroizing;

/// Minimum accepted PIN length
pub const MIN_PIN_LENGTH: usize = 4;

/// Default entry-flow buffer length
pub const DEFAULT_PIN_LENGTH: usize = 4;

/// Push-based view of the gate, refreshed on every mutation and on
/// durable-store change notifications from other contexts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateStatus {
    /// A durable gate record exists
    pub pin_configured: bool,
    /// No record, or the session cache holds the decrypted secret
    pub unlocked: bool,
    /// A PIN entry flow is currently open
    pub entry_open: bool,
    /// Last successful unlock, epoch milliseconds. Informational only.
    pub last_unlock_time: Option<i64>,
}

struct ActiveEntry {
    flow: Arc<PinEntryFlow>,
    outcome_tx: watch::Sender<Option<bool>>,
}

/// The gate service.
///
/// Constructed once at application start and shared by handle; there is no
/// global instance. All mutations happen only after the corresponding
/// crypto operation has fully succeeded.
pub struct GateController {
    durable: Arc<dyn DurableGateStore>,
    session: Arc<SessionCache>,
    pin_len: usize,
    active: Mutex<Option<ActiveEntry>>,
    status_tx: watch::Sender<GateStatus>,
}

impl GateController {
    /// Create a controller with the default entry buffer length
    pub fn new(durable: Arc<dyn DurableGateStore>, session: Arc<SessionCache>) -> Arc<Self> {
        Self::build(durable, session, DEFAULT_PIN_LENGTH)
    }

    /// Create a controller with a custom entry buffer length
    pub fn with_pin_length(
        durable: Arc<dyn DurableGateStore>,
        session: Arc<SessionCache>,
        pin_len: usize,
    ) -> Result<Arc<Self>> {
        if pin_len < MIN_PIN_LENGTH {
            return Err(Error::Validation(format!(
                "PIN length must be at least {MIN_PIN_LENGTH}"
            )));
        }
        Ok(Self::build(durable, session, pin_len))
    }

    fn build(
        durable: Arc<dyn DurableGateStore>,
        session: Arc<SessionCache>,
        pin_len: usize,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(GateStatus::default());
        let controller = Arc::new(Self {
            durable,
            session,
            pin_len,
            active: Mutex::new(None),
            status_tx,
        });
        controller.refresh_status();

        // Writes from any context invalidate this context's cached view.
        let weak = Arc::downgrade(&controller);
        controller.durable.subscribe(Box::new(move || {
            if let Some(controller) = weak.upgrade() {
                controller.on_store_changed();
            }
        }));

        controller
    }

    /// Entry-flow buffer length
    pub fn pin_len(&self) -> usize {
        self.pin_len
    }

    /// Whether a PIN has been configured
    pub async fn has_pin_setup(&self) -> Result<bool> {
        Ok(self.durable.get()?.is_some())
    }

    /// Whether the gate is currently open.
    ///
    /// True when no PIN is configured at all, or when this session holds
    /// the decrypted gate secret. `lastUnlockTime` plays no part here.
    pub async fn is_unlocked(&self) -> Result<bool> {
        Ok(self.durable.get()?.is_none() || self.session.is_set())
    }

    /// Subscribe to push-based status snapshots
    pub fn watch_status(&self) -> watch::Receiver<GateStatus> {
        self.status_tx.subscribe()
    }

    /// Configure a PIN: generate a fresh gate secret, seal it under `pin`,
    /// persist the record, and cache the secret (new state: unlocked).
    ///
    /// Overwrites any prior record; callers use this for first-time setup
    /// or setup after removal, never as a change-PIN shortcut.
    pub async fn setup_pin(&self, pin: &str) -> Result<()> {
        Self::validate_pin(pin)?;

        let secret = pinlock_crypto::generate_gate_secret()?;
        let sealed = Self::seal_blocking(secret.as_bytes().to_vec(), pin.to_owned()).await?;

        self.durable.set(&GateRecord::new(sealed))?;
        self.session.set(&secret);
        tracing::info!("PIN configured, gate unlocked");
        self.refresh_status();
        Ok(())
    }

    /// Attempt to unlock with `pin`.
    ///
    /// On success caches the secret and updates `lastUnlockTime`. On
    /// authentication failure returns `false` with no state change at all;
    /// the durable record is byte-identical afterwards.
    pub async fn unlock(&self, pin: &str) -> Result<bool> {
        let record = self.durable.get()?.ok_or(Error::NoPinConfigured)?;

        let secret = match Self::open_blocking(record.encrypted_secret.clone(), pin.to_owned())
            .await
        {
            Ok(secret) => secret,
            Err(Error::Crypto(pinlock_crypto::Error::AuthenticationFailed)) => {
                tracing::debug!("Unlock rejected");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let updated = GateRecord {
            encrypted_secret: record.encrypted_secret,
            last_unlock_time: Some(chrono::Utc::now().timestamp_millis()),
        };
        self.durable.set(&updated)?;
        self.session.set(&secret);
        tracing::info!("Gate unlocked");
        self.refresh_status();
        Ok(true)
    }

    /// Re-seal the existing gate secret under a new PIN.
    ///
    /// The secret itself never changes, so an unlocked session elsewhere
    /// remains valid; the session cache is deliberately untouched.
    pub async fn change_pin(&self, old_pin: &str, new_pin: &str) -> Result<bool> {
        Self::validate_pin(new_pin)?;
        let record = self.durable.get()?.ok_or(Error::NoPinConfigured)?;

        let secret = match Self::open_blocking(record.encrypted_secret, old_pin.to_owned()).await
        {
            Ok(secret) => secret,
            Err(Error::Crypto(pinlock_crypto::Error::AuthenticationFailed)) => {
                tracing::debug!("PIN change rejected");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let sealed = Self::seal_blocking(secret.as_bytes().to_vec(), new_pin.to_owned()).await?;
        self.durable.set(&GateRecord {
            encrypted_secret: sealed,
            last_unlock_time: record.last_unlock_time,
        })?;
        tracing::info!("PIN changed");
        self.refresh_status();
        Ok(true)
    }

    /// Remove the PIN after verifying it.
    ///
    /// Trivially succeeds when no PIN is configured. On success both the
    /// durable record and the session cache are cleared (resulting state:
    /// no-pin, always unlocked).
    pub async fn remove_pin(&self, pin: &str) -> Result<bool> {
        let Some(record) = self.durable.get()? else {
            return Ok(true);
        };

        match Self::open_blocking(record.encrypted_secret, pin.to_owned()).await {
            Ok(_) => {}
            Err(Error::Crypto(pinlock_crypto::Error::AuthenticationFailed)) => {
                tracing::debug!("PIN removal rejected");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        self.durable.clear()?;
        self.session.clear();
        tracing::info!("PIN removed, gate disabled");
        self.refresh_status();
        Ok(true)
    }

    /// Drop the session secret; the durable record is untouched and the
    /// next [`require_pin`](Self::require_pin) will prompt again.
    pub async fn lock(&self) {
        self.session.clear();
        tracing::info!("Gate locked");
        self.refresh_status();
    }

    /// Gate entry point for protected surfaces.
    ///
    /// Resolves `true` immediately when no PIN is configured or the gate is
    /// already unlocked. Otherwise opens an enter-mode [`PinEntryFlow`],
    /// or, when a prompt is already pending, awaits that **same** prompt's
    /// outcome (single-flight; a second dialog is never opened). Resolves
    /// `true` on successful unlock, `false` on explicit cancellation.
    pub async fn require_pin(self: &Arc<Self>) -> Result<bool> {
        if self.is_unlocked().await? {
            return Ok(true);
        }

        let mut rx = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(entry) if entry.flow.mode() == EntryMode::Enter => {
                    entry.outcome_tx.subscribe()
                }
                Some(_) => return Err(Error::EntryInProgress),
                None => {
                    let (tx, rx) = watch::channel(None);
                    let flow = PinEntryFlow::new(Arc::downgrade(self), EntryMode::Enter, self.pin_len);
                    *active = Some(ActiveEntry {
                        flow,
                        outcome_tx: tx,
                    });
                    tracing::info!("PIN prompt opened");
                    rx
                }
            }
        };
        self.refresh_status();

        loop {
            if let Some(outcome) = *rx.borrow_and_update() {
                return Ok(outcome);
            }
            if rx.changed().await.is_err() {
                // Sender gone without a resolution; treat as cancelled.
                return Ok(false);
            }
        }
    }

    /// Open a PIN entry flow for the UI to drive.
    ///
    /// Errors with [`Error::EntryInProgress`] when any flow is already
    /// active, and with [`Error::NoPinConfigured`] for enter/change/remove
    /// without a record. Setup is allowed regardless; it idempotently
    /// overwrites (first-time setup or setup after removal).
    pub fn start_entry(self: &Arc<Self>, mode: EntryMode) -> Result<Arc<PinEntryFlow>> {
        if mode != EntryMode::Setup && self.durable.get()?.is_none() {
            return Err(Error::NoPinConfigured);
        }

        let flow = {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(Error::EntryInProgress);
            }
            let (outcome_tx, _) = watch::channel(None);
            let flow = PinEntryFlow::new(Arc::downgrade(self), mode, self.pin_len);
            *active = Some(ActiveEntry {
                flow: Arc::clone(&flow),
                outcome_tx,
            });
            flow
        };
        tracing::info!(?mode, "PIN entry flow started");
        self.refresh_status();
        Ok(flow)
    }

    /// The currently open entry flow, if any
    pub fn active_entry(&self) -> Option<Arc<PinEntryFlow>> {
        self.active.lock().as_ref().map(|e| Arc::clone(&e.flow))
    }

    /// Resolve and drop the active flow, waking `require_pin` waiters.
    pub(crate) fn resolve_entry(&self, outcome: bool) {
        if let Some(entry) = self.active.lock().take() {
            let _ = entry.outcome_tx.send(Some(outcome));
            tracing::debug!(outcome, "PIN entry flow resolved");
        }
        self.refresh_status();
    }

    fn validate_pin(pin: &str) -> Result<()> {
        if pin.len() < MIN_PIN_LENGTH {
            return Err(Error::Validation(format!(
                "PIN must be at least {MIN_PIN_LENGTH} digits"
            )));
        }
        Ok(())
    }

    fn on_store_changed(&self) {
        match self.durable.get() {
            Ok(None) => {
                // PIN removed in some context; a cached secret is stale.
                self.session.clear();
            }
            Ok(Some(_)) => {}
            Err(e) => tracing::warn!("Store change notification read failed: {e}"),
        }
        self.refresh_status();
    }

    fn refresh_status(&self) {
        let record = match self.durable.get() {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Status refresh failed: {e}");
                return;
            }
        };
        let status = GateStatus {
            pin_configured: record.is_some(),
            unlocked: record.is_none() || self.session.is_set(),
            entry_open: self.active.lock().is_some(),
            last_unlock_time: record.and_then(|r| r.last_unlock_time),
        };
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    async fn seal_blocking(plaintext: Vec<u8>, pin: String) -> Result<SealedSecret> {
        let plaintext = Zeroizing::new(plaintext);
        tokio::task::spawn_blocking(move || pinlock_crypto::seal_secret(&plaintext, &pin))
            .await
            .map_err(|e| Error::Gate(format!("Crypto task failed: {e}")))?
            .map_err(Error::from)
    }

    async fn open_blocking(sealed: SealedSecret, pin: String) -> Result<Zeroizing<String>> {
        let bytes = tokio::task::spawn_blocking(move || pinlock_crypto::open_secret(&sealed, &pin))
            .await
            .map_err(|e| Error::Gate(format!("Crypto task failed: {e}")))?
            .map_err(Error::from)?;
        // AEAD integrity passed, so this only fires on a non-UTF-8 secret,
        // which the gate never produces.
        String::from_utf8(bytes.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| Error::Gate("Gate secret is not valid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinlock_store::MemoryGateStore;

    fn controller() -> (Arc<GateController>, Arc<SessionCache>, MemoryGateStore) {
        let store = MemoryGateStore::new();
        let session = Arc::new(SessionCache::new());
        let ctrl = GateController::new(
            Arc::new(store.clone()) as Arc<dyn DurableGateStore>,
            Arc::clone(&session),
        );
        (ctrl, session, store)
    }

    #[tokio::test]
    async fn no_record_means_unlocked() {
        let (ctrl, _, _) = controller();
        assert!(!ctrl.has_pin_setup().await.unwrap());
        assert!(ctrl.is_unlocked().await.unwrap());
        assert!(ctrl.require_pin().await.unwrap());
    }

    #[tokio::test]
    async fn setup_then_unlock_roundtrip() {
        let (ctrl, session, _) = controller();
        ctrl.setup_pin("1234").await.unwrap();
        assert!(ctrl.has_pin_setup().await.unwrap());
        assert!(ctrl.is_unlocked().await.unwrap());

        ctrl.lock().await;
        assert!(!ctrl.is_unlocked().await.unwrap());
        assert!(!session.is_set());

        assert!(!ctrl.unlock("9999").await.unwrap());
        assert!(!ctrl.is_unlocked().await.unwrap());

        assert!(ctrl.unlock("1234").await.unwrap());
        assert!(ctrl.is_unlocked().await.unwrap());
    }

    #[tokio::test]
    async fn short_pin_rejected_before_any_work() {
        let (ctrl, _, store) = controller();
        assert!(matches!(
            ctrl.setup_pin("123").await,
            Err(Error::Validation(_))
        ));
        assert!(store.get().unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_unlock_leaves_record_untouched() {
        let (ctrl, _, store) = controller();
        ctrl.setup_pin("1234").await.unwrap();
        ctrl.lock().await;

        let before = store.get().unwrap().unwrap();
        assert!(!ctrl.unlock("4321").await.unwrap());
        let after = store.get().unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn unlock_without_record_is_fatal() {
        let (ctrl, _, _) = controller();
        assert!(matches!(
            ctrl.unlock("1234").await,
            Err(Error::NoPinConfigured)
        ));
    }

    #[tokio::test]
    async fn change_pin_preserves_secret_and_session() {
        let (ctrl, session, _) = controller();
        ctrl.setup_pin("1234").await.unwrap();
        let secret_before = session.get().unwrap();

        // Wrong old PIN: no mutation.
        assert!(!ctrl.change_pin("0000", "5678").await.unwrap());
        assert!(ctrl.unlock("1234").await.unwrap());

        assert!(ctrl.change_pin("1234", "5678").await.unwrap());
        // A live unlocked session stays valid; the secret is unchanged.
        assert!(session.is_set());
        assert!(!ctrl.unlock("1234").await.unwrap());
        assert!(ctrl.unlock("5678").await.unwrap());
        assert_eq!(*session.get().unwrap(), *secret_before);
    }

    #[tokio::test]
    async fn change_pin_preserves_last_unlock_time() {
        let (ctrl, _, store) = controller();
        ctrl.setup_pin("1234").await.unwrap();
        let before = store.get().unwrap().unwrap().last_unlock_time;
        assert!(ctrl.change_pin("1234", "5678").await.unwrap());
        assert_eq!(store.get().unwrap().unwrap().last_unlock_time, before);
    }

    #[tokio::test]
    async fn remove_pin_verifies_and_disables() {
        let (ctrl, _, store) = controller();
        ctrl.setup_pin("1234").await.unwrap();

        let before = store.get().unwrap().unwrap();
        assert!(!ctrl.remove_pin("9999").await.unwrap());
        assert!(ctrl.has_pin_setup().await.unwrap());
        assert_eq!(
            store.get().unwrap().unwrap().last_unlock_time,
            before.last_unlock_time
        );

        assert!(ctrl.remove_pin("1234").await.unwrap());
        assert!(!ctrl.has_pin_setup().await.unwrap());
        assert!(ctrl.is_unlocked().await.unwrap());

        // Trivially true when nothing is configured.
        assert!(ctrl.remove_pin("whatever").await.unwrap());
    }

    #[tokio::test]
    async fn status_watch_tracks_mutations() {
        let (ctrl, _, _) = controller();
        let rx = ctrl.watch_status();
        {
            let initial = rx.borrow().clone();
            assert!(!initial.pin_configured);
            assert!(initial.unlocked);
        }

        ctrl.setup_pin("1234").await.unwrap();
        let status = rx.borrow().clone();
        assert!(status.pin_configured);
        assert!(status.unlocked);
        assert!(status.last_unlock_time.is_some());

        ctrl.lock().await;
        assert!(!rx.borrow().unlocked);
    }
}
