// Licensed under the Apache-2.0 license

//! Single-slot notification from the interrupt handler to the waiting
//! transfer.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One producer (interrupt context), one consumer (the transfer holding
/// the engine lock). The slot carries the latched interrupt status.
#[derive(Default)]
pub struct Completion {
    slot: Mutex<Option<u16>>,
    cond: Condvar,
}

impl Completion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<u16>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop a stale signal before a new transaction is started.
    pub fn reset(&self) {
        *self.slot() = None;
    }

    /// Publish `status` and wake the waiter.
    pub fn signal(&self, status: u16) {
        *self.slot() = Some(status);
        self.cond.notify_one();
    }

    /// Wait for a signal. `None` when `timeout` elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<u16> {
        let guard = self.slot();
        let (mut guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }
}
