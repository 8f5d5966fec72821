//! Durable gate-record store with cross-context change notification

use crate::record::GateRecord;
use crate::Result;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Callback fired when the durable record changes in any context
pub type ChangeListener = Box<dyn Fn() + Send + Sync>;

/// Persistent single-key store for the gate record.
///
/// Backed by whatever durable key-value mechanism the platform offers; the
/// change subscription is a generic publish/subscribe seam, deliberately
/// decoupled from any particular storage-event mechanism, so the same gate
/// works against a browser origin store, a local file, or an OS keychain.
pub trait DurableGateStore: Send + Sync {
    /// Read the record. A malformed stored value is logged and reported as
    /// absent rather than an error.
    fn get(&self) -> Result<Option<GateRecord>>;

    /// Write the record. A single atomic key write.
    fn set(&self, record: &GateRecord) -> Result<()>;

    /// Remove the record.
    fn clear(&self) -> Result<()>;

    /// Register a listener fired after every write observable from this
    /// handle's backend, including writes made through other handles.
    fn subscribe(&self, listener: ChangeListener);
}

/// Shared listener registry.
///
/// Listeners are cloned out of the registry before dispatch so a callback
/// may re-enter the store (including `subscribe`) without deadlocking.
#[derive(Clone, Default)]
struct ChangeNotifier {
    listeners: Arc<RwLock<Vec<Arc<dyn Fn() + Send + Sync>>>>,
}

impl ChangeNotifier {
    fn subscribe(&self, listener: ChangeListener) {
        self.listeners.write().push(Arc::from(listener));
    }

    fn notify(&self) {
        let snapshot: Vec<_> = self.listeners.read().iter().map(Arc::clone).collect();
        for listener in snapshot {
            listener();
        }
    }
}

fn parse_record(raw: &str) -> Option<GateRecord> {
    match serde_json::from_str(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!("Malformed gate record, treating as absent: {e}");
            None
        }
    }
}

/// In-memory durable store.
///
/// Cloned handles share one backing slot and one listener registry, which
/// models multiple execution contexts (tabs) attached to the same origin.
/// The value is kept as raw JSON so corruption behaves exactly like a
/// corrupted platform store.
#[derive(Clone, Default)]
pub struct MemoryGateStore {
    slot: Arc<RwLock<Option<String>>>,
    notifier: ChangeNotifier,
}

impl MemoryGateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableGateStore for MemoryGateStore {
    fn get(&self) -> Result<Option<GateRecord>> {
        Ok(self.slot.read().as_deref().and_then(parse_record))
    }

    fn set(&self, record: &GateRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        *self.slot.write() = Some(raw);
        self.notifier.notify();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let removed = self.slot.write().take().is_some();
        if removed {
            self.notifier.notify();
        }
        Ok(())
    }

    fn subscribe(&self, listener: ChangeListener) {
        self.notifier.subscribe(listener);
    }
}

/// File-backed durable store: one JSON document at a fixed path.
///
/// Writes go through a temporary file and rename so a crash never leaves a
/// half-written record. Change notification covers handles cloned from the
/// same instance; cross-process watching is the embedder's concern.
#[derive(Clone)]
pub struct FileGateStore {
    path: PathBuf,
    notifier: ChangeNotifier,
}

impl FileGateStore {
    /// Create a store at `path`. The file need not exist yet.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            notifier: ChangeNotifier::default(),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DurableGateStore for FileGateStore {
    fn get(&self) -> Result<Option<GateRecord>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(parse_record(&raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!("Gate record file is not valid UTF-8, treating as absent");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, record: &GateRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        self.notifier.notify();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                self.notifier.notify();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn subscribe(&self, listener: ChangeListener) {
        self.notifier.subscribe(listener);
    }
}
