//! PIN gate for sensitive application surfaces
//!
//! Gates access locally, without a server round-trip, by sealing a random
//! gate secret under a PIN-derived key. The decrypted secret held in the
//! session cache is the unlock state; the durable record holds only the
//! sealed form.
//!
//! ## Gate States
//!
//! - **no-pin**: no durable record; the feature is disabled and every
//!   surface is reachable
//! - **locked**: record present, session cache empty
//! - **unlocked**: record present, decrypted secret cached for the session
//!
//! Protected surfaces call [`GateController::require_pin`]; when locked it
//! opens a single shared [`PinEntryFlow`] prompt and every concurrent
//! caller awaits the same outcome.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod controller;
pub mod entry;
pub mod error;

pub use controller::{GateController, GateStatus, DEFAULT_PIN_LENGTH, MIN_PIN_LENGTH};
pub use entry::{
    EntryError, EntryMode, EntryStep, PinEntryFlow, PinEntryState, SUBMIT_DEBOUNCE,
};
pub use error::{Error, Result};
