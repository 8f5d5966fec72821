//! Multi-step PIN entry state machine
//!
//! Sequences digit collection for the four gate flows and drives the
//! matching [`GateController`] operation when a step completes:
//!
//! - enter: single step, retry in place on a wrong PIN
//! - setup: new → confirm, mismatch returns to new
//! - change: current → new → confirm, wrong current is detected only at
//!   final submission
//! - remove: single step
//!
//! The UI observes masked snapshots (buffer lengths, never digits) and
//! feeds input through `press_digit`/`delete_last`/`clear_all`.

use crate::controller::GateController;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use zeroize::{Zeroize, Zeroizing};

/// Pause between the buffer filling and automatic submission, so the UI
/// can render the completed buffer before the slow KDF work starts.
pub const SUBMIT_DEBOUNCE: Duration = Duration::from_millis(150);

/// Entry flow mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    /// Unlock the gate (the only cancellable mode)
    Enter,
    /// Configure a PIN: new → confirm
    Setup,
    /// Change the PIN: current → new → confirm
    Change,
    /// Remove the PIN after verifying it
    Remove,
}

/// Step within a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStep {
    /// Current (or only) PIN
    Current,
    /// New PIN
    New,
    /// Confirmation of the new PIN
    Confirm,
}

/// Recoverable entry errors, surfaced to the UI verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    /// Wrong PIN in enter or remove mode
    #[error("Incorrect PIN")]
    IncorrectPin,
    /// Wrong current PIN in change mode
    #[error("Incorrect current PIN")]
    IncorrectCurrentPin,
    /// New and confirmation PINs differ
    #[error("PINs don't match")]
    Mismatch,
    /// A non-authentication failure; the flow stays open for retry
    #[error("Something went wrong, please try again")]
    Internal,
}

/// Masked snapshot of the flow for the UI.
///
/// Only the length of the active buffer is exposed; digits never leave the
/// state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinEntryState {
    /// Flow mode
    pub mode: EntryMode,
    /// Active step
    pub step: EntryStep,
    /// Digits entered into the active buffer
    pub entered: usize,
    /// Required buffer length
    pub pin_len: usize,
    /// Recoverable error from the last submission, if any
    pub error: Option<EntryError>,
    /// A submission is in flight (or debouncing)
    pub submitting: bool,
    /// The flow has resolved or been cancelled
    pub closed: bool,
}

#[derive(Default)]
struct Buffers {
    current: Zeroizing<String>,
    new: Zeroizing<String>,
    confirm: Zeroizing<String>,
}

impl Buffers {
    fn for_step(&mut self, step: EntryStep) -> &mut Zeroizing<String> {
        match step {
            EntryStep::Current => &mut self.current,
            EntryStep::New => &mut self.new,
            EntryStep::Confirm => &mut self.confirm,
        }
    }

    fn wipe(&mut self, step: EntryStep) {
        self.for_step(step).zeroize();
    }

    fn wipe_all(&mut self) {
        self.current.zeroize();
        self.new.zeroize();
        self.confirm.zeroize();
    }
}

struct Inner {
    step: EntryStep,
    buffers: Buffers,
    error: Option<EntryError>,
    submitting: bool,
    closed: bool,
}

/// One in-flight PIN collection.
///
/// Created when a prompt opens, destroyed when it resolves or is
/// cancelled; never persisted. At most one flow exists per controller.
pub struct PinEntryFlow {
    controller: Weak<GateController>,
    mode: EntryMode,
    pin_len: usize,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<PinEntryState>,
}

impl PinEntryFlow {
    pub(crate) fn new(
        controller: Weak<GateController>,
        mode: EntryMode,
        pin_len: usize,
    ) -> Arc<Self> {
        let step = match mode {
            EntryMode::Setup => EntryStep::New,
            EntryMode::Enter | EntryMode::Change | EntryMode::Remove => EntryStep::Current,
        };
        let (state_tx, _) = watch::channel(PinEntryState {
            mode,
            step,
            entered: 0,
            pin_len,
            error: None,
            submitting: false,
            closed: false,
        });
        Arc::new(Self {
            controller,
            mode,
            pin_len,
            inner: Mutex::new(Inner {
                step,
                buffers: Buffers::default(),
                error: None,
                submitting: false,
                closed: false,
            }),
            state_tx,
        })
    }

    /// Flow mode
    pub fn mode(&self) -> EntryMode {
        self.mode
    }

    /// Current masked snapshot
    pub fn state(&self) -> PinEntryState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to snapshot updates
    pub fn watch_state(&self) -> watch::Receiver<PinEntryState> {
        self.state_tx.subscribe()
    }

    /// Append a digit to the active buffer.
    ///
    /// Ignored while a submission is in flight or once the flow is closed;
    /// rejected for non-digit input. Filling the buffer triggers automatic
    /// submission after [`SUBMIT_DEBOUNCE`].
    pub async fn press_digit(&self, digit: char) -> Result<()> {
        if !digit.is_ascii_digit() {
            return Err(Error::Validation("PIN digits must be 0-9".to_string()));
        }

        let full = {
            let mut inner = self.inner.lock();
            if inner.closed || inner.submitting {
                return Ok(());
            }
            let step = inner.step;
            let buffer = inner.buffers.for_step(step);
            if buffer.len() >= self.pin_len {
                return Ok(());
            }
            buffer.push(digit);
            inner.error = None;
            let full = inner.buffers.for_step(step).len() == self.pin_len;
            if full {
                inner.submitting = true;
            }
            full
        };
        self.publish();

        if full {
            tokio::time::sleep(SUBMIT_DEBOUNCE).await;
            self.submit().await?;
        }
        Ok(())
    }

    /// Remove the last digit from the active buffer. Always available.
    pub fn delete_last(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            let step = inner.step;
            inner.buffers.for_step(step).pop();
        }
        self.publish();
    }

    /// Clear the active buffer. Always available.
    pub fn clear_all(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            let step = inner.step;
            inner.buffers.wipe(step);
        }
        self.publish();
    }

    /// Cancel the flow.
    ///
    /// Enter mode is the only flow the UI exposes Cancel for; a pending
    /// [`GateController::require_pin`] resolves `false`, without error.
    pub fn cancel(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.submitting = false;
            inner.buffers.wipe_all();
        }
        self.publish();
        tracing::info!("PIN entry cancelled");
        if let Some(controller) = self.controller.upgrade() {
            controller.resolve_entry(false);
        }
    }

    async fn submit(&self) -> Result<()> {
        // Re-read under lock: a clear_all during the debounce aborts the
        // submission instead of submitting a short buffer.
        let (step, pin) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Ok(());
            }
            let step = inner.step;
            if inner.buffers.for_step(step).len() != self.pin_len {
                inner.submitting = false;
                drop(inner);
                self.publish();
                return Ok(());
            }
            let pin = Zeroizing::new(inner.buffers.for_step(step).to_string());
            (step, pin)
        };

        match (self.mode, step) {
            (EntryMode::Enter, _) => self.submit_enter(&pin).await,
            (EntryMode::Remove, _) => self.submit_remove(&pin).await,
            (EntryMode::Setup, EntryStep::New) => {
                self.advance_to(EntryStep::Confirm);
                Ok(())
            }
            (EntryMode::Setup, _) => self.submit_setup_confirm().await,
            (EntryMode::Change, EntryStep::Current) => {
                self.advance_to(EntryStep::New);
                Ok(())
            }
            (EntryMode::Change, EntryStep::New) => {
                self.advance_to(EntryStep::Confirm);
                Ok(())
            }
            (EntryMode::Change, EntryStep::Confirm) => self.submit_change_confirm().await,
        }
    }

    async fn submit_enter(&self, pin: &str) -> Result<()> {
        let controller = self.controller()?;
        match controller.unlock(pin).await {
            Ok(true) => {
                self.close();
                controller.resolve_entry(true);
                Ok(())
            }
            Ok(false) => {
                self.recover(EntryError::IncorrectPin, EntryStep::Current, |b| {
                    b.wipe(EntryStep::Current)
                });
                Ok(())
            }
            Err(e) => {
                self.recover(EntryError::Internal, EntryStep::Current, |b| {
                    b.wipe(EntryStep::Current)
                });
                Err(e)
            }
        }
    }

    async fn submit_remove(&self, pin: &str) -> Result<()> {
        let controller = self.controller()?;
        match controller.remove_pin(pin).await {
            Ok(true) => {
                self.close();
                controller.resolve_entry(true);
                Ok(())
            }
            Ok(false) => {
                self.recover(EntryError::IncorrectPin, EntryStep::Current, |b| {
                    b.wipe(EntryStep::Current)
                });
                Ok(())
            }
            Err(e) => {
                self.recover(EntryError::Internal, EntryStep::Current, |b| {
                    b.wipe(EntryStep::Current)
                });
                Err(e)
            }
        }
    }

    async fn submit_setup_confirm(&self) -> Result<()> {
        let (new_pin, confirm_pin) = {
            let inner = self.inner.lock();
            (
                Zeroizing::new(inner.buffers.new.to_string()),
                Zeroizing::new(inner.buffers.confirm.to_string()),
            )
        };

        if *new_pin != *confirm_pin {
            self.recover(EntryError::Mismatch, EntryStep::New, Buffers::wipe_all);
            return Ok(());
        }

        let controller = self.controller()?;
        match controller.setup_pin(&new_pin).await {
            Ok(()) => {
                self.close();
                controller.resolve_entry(true);
                Ok(())
            }
            Err(e) => {
                self.recover(EntryError::Internal, EntryStep::New, Buffers::wipe_all);
                Err(e)
            }
        }
    }

    async fn submit_change_confirm(&self) -> Result<()> {
        let (current_pin, new_pin, confirm_pin) = {
            let inner = self.inner.lock();
            (
                Zeroizing::new(inner.buffers.current.to_string()),
                Zeroizing::new(inner.buffers.new.to_string()),
                Zeroizing::new(inner.buffers.confirm.to_string()),
            )
        };

        if *new_pin != *confirm_pin {
            self.recover(EntryError::Mismatch, EntryStep::New, |b| {
                b.wipe(EntryStep::New);
                b.wipe(EntryStep::Confirm);
            });
            return Ok(());
        }

        let controller = self.controller()?;
        match controller.change_pin(&current_pin, &new_pin).await {
            Ok(true) => {
                self.close();
                controller.resolve_entry(true);
                Ok(())
            }
            Ok(false) => {
                self.recover(
                    EntryError::IncorrectCurrentPin,
                    EntryStep::Current,
                    Buffers::wipe_all,
                );
                Ok(())
            }
            Err(e) => {
                self.recover(EntryError::Internal, EntryStep::Current, Buffers::wipe_all);
                Err(e)
            }
        }
    }

    fn advance_to(&self, step: EntryStep) {
        {
            let mut inner = self.inner.lock();
            inner.step = step;
            inner.submitting = false;
            inner.error = None;
        }
        self.publish();
    }

    fn recover(&self, error: EntryError, step: EntryStep, wipe: impl FnOnce(&mut Buffers)) {
        {
            let mut inner = self.inner.lock();
            wipe(&mut inner.buffers);
            inner.step = step;
            inner.error = Some(error);
            inner.submitting = false;
        }
        tracing::debug!(%error, "PIN entry retry");
        self.publish();
    }

    fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.submitting = false;
            inner.buffers.wipe_all();
        }
        self.publish();
    }

    fn controller(&self) -> Result<Arc<GateController>> {
        self.controller
            .upgrade()
            .ok_or_else(|| Error::Gate("Gate controller dropped".to_string()))
    }

    fn publish(&self) {
        let snapshot = {
            let mut inner = self.inner.lock();
            let step = inner.step;
            let entered = inner.buffers.for_step(step).len();
            PinEntryState {
                mode: self.mode,
                step,
                entered,
                pin_len: self.pin_len,
                error: inner.error,
                submitting: inner.submitting,
                closed: inner.closed,
            }
        };
        self.state_tx.send_replace(snapshot);
    }
}
