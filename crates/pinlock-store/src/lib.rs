//! Storage layer for the Pinlock gate
//!
//! Provides the durable gate-record store (single key, change notification
//! to other execution contexts) and the volatile session cache that holds
//! the decrypted gate secret for the current session only.
//!
//! Two durable backends ship here: an in-memory store whose cloned handles
//! model multiple contexts sharing one origin, and a single-file JSON store
//! with atomic writes for desktop targets. A malformed stored record is
//! logged and treated as absent so the gate fails open to "no PIN
//! configured" instead of locking the user out.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod durable;
pub mod error;
pub mod record;
pub mod session;

pub use durable::{ChangeListener, DurableGateStore, FileGateStore, MemoryGateStore};
pub use error::{Error, Result};
pub use record::GateRecord;
pub use session::SessionCache;
