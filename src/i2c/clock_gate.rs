// Licensed under the Apache-2.0 license

//! Reference-counted clock gating with the suspend interlock.

use crate::i2c::error::TransferError;
use crate::i2c::traits::{ClockControl, ClockId};
use core::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GateError {
    /// A clock of the tree failed to enable; the others were unwound.
    ClockEnable { clock: ClockId },
    /// Gate acquired while the controller is suspended.
    SuspendedAccess,
    /// Suspend refused while holders remain.
    Busy(u32),
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::ClockEnable { clock } => write!(f, "cannot enable {clock:?} clock"),
            GateError::SuspendedAccess => f.write_str("access at suspend stage"),
            GateError::Busy(holders) => write!(f, "clock gate busy ({holders} holders)"),
        }
    }
}

impl std::error::Error for GateError {}

impl From<GateError> for TransferError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::SuspendedAccess => TransferError::SuspendedAccess,
            GateError::ClockEnable { .. } | GateError::Busy(_) => TransferError::Busy,
        }
    }
}

#[derive(Default)]
struct GateState {
    count: u32,
    suspended: bool,
}

/// Clock tree of one bus: DMA, optional arbiter, main, optional PMIC.
pub struct ClockGate<C: ClockControl> {
    clocks: C,
    tree: heapless::Vec<ClockId, 4>,
    state: Mutex<GateState>,
}

impl<C: ClockControl> ClockGate<C> {
    #[must_use]
    pub fn new(clocks: C, has_arbiter: bool, has_pmic: bool) -> Self {
        let mut tree = heapless::Vec::new();
        // Capacity 4 holds every clock of the tree.
        let _ = tree.push(ClockId::Dma);
        if has_arbiter {
            let _ = tree.push(ClockId::Arbiter);
        }
        let _ = tree.push(ClockId::Main);
        if has_pmic {
            let _ = tree.push(ClockId::Pmic);
        }
        Self {
            clocks,
            tree,
            state: Mutex::new(GateState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The clock provider, for rate queries.
    pub fn clocks(&self) -> &C {
        &self.clocks
    }

    /// Enable the clock tree and take a reference.
    ///
    /// # Errors
    ///
    /// [`GateError::ClockEnable`] if a clock fails to enable,
    /// [`GateError::SuspendedAccess`] if the controller is suspended. In
    /// both cases every clock enabled by this call has been disabled again
    /// and the reference count is unchanged.
    pub fn acquire(&self) -> Result<(), GateError> {
        for (n, clock) in self.tree.iter().enumerate() {
            if let Err(e) = self.clocks.enable(*clock) {
                log::error!("cannot enable {clock:?} clock: {e:?}");
                self.tree
                    .iter()
                    .take(n)
                    .rev()
                    .for_each(|c| self.clocks.disable(*c));
                return Err(GateError::ClockEnable { clock: *clock });
            }
        }

        let suspended = {
            let mut state = self.state();
            if !state.suspended {
                state.count += 1;
            }
            state.suspended
        };

        if suspended {
            log::info!("err, access at suspend noirq stage");
            self.disable_tree();
            return Err(GateError::SuspendedAccess);
        }
        Ok(())
    }

    /// [`Self::acquire`] returning a guard that releases on drop.
    ///
    /// # Errors
    ///
    /// See [`Self::acquire`].
    pub fn acquire_guard(&self) -> Result<GateGuard<'_, C>, GateError> {
        self.acquire()?;
        Ok(GateGuard { gate: self })
    }

    /// Disable the clock tree and drop one reference.
    pub fn release(&self) {
        self.disable_tree();
        let mut state = self.state();
        if state.count == 0 {
            log::warn!("clock gate released without a holder");
        }
        state.count = state.count.saturating_sub(1);
    }

    fn disable_tree(&self) {
        self.tree.iter().rev().for_each(|c| self.clocks.disable(*c));
    }

    /// Enter the suspended state if nobody holds the gate.
    ///
    /// # Errors
    ///
    /// [`GateError::Busy`] with the current holder count otherwise.
    pub fn suspend_prepare(&self) -> Result<(), GateError> {
        let mut state = self.state();
        if state.count > 0 {
            log::info!("suspend refused, {} gate holders", state.count);
            return Err(GateError::Busy(state.count));
        }
        state.suspended = true;
        Ok(())
    }

    pub fn resume(&self) {
        self.state().suspended = false;
    }

    #[must_use]
    pub fn holders(&self) -> u32 {
        self.state().count
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.state().suspended
    }
}

/// Holds one gate reference for its lifetime.
pub struct GateGuard<'a, C: ClockControl> {
    gate: &'a ClockGate<C>,
}

impl<C: ClockControl> GateGuard<'_, C> {
    /// Keep the reference past the guard; balance with [`ClockGate::release`].
    pub fn keep(self) {
        core::mem::forget(self);
    }
}

impl<C: ClockControl> Drop for GateGuard<'_, C> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingClocks {
        events: Mutex<Vec<(bool, ClockId)>>,
        fail_on: Option<ClockId>,
    }

    impl ClockControl for RecordingClocks {
        type Error = ();

        fn enable(&self, clock: ClockId) -> Result<(), ()> {
            if self.fail_on == Some(clock) {
                return Err(());
            }
            self.events.lock().unwrap().push((true, clock));
            Ok(())
        }

        fn disable(&self, clock: ClockId) {
            self.events.lock().unwrap().push((false, clock));
        }

        fn rate_hz(&self, _clock: ClockId) -> u32 {
            0
        }
    }

    #[test]
    fn enables_in_order_and_disables_in_reverse() {
        let gate = ClockGate::new(RecordingClocks::default(), true, true);
        gate.acquire().unwrap();
        assert_eq!(gate.holders(), 1);
        gate.release();
        assert_eq!(gate.holders(), 0);

        let events = gate.clocks().events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                (true, ClockId::Dma),
                (true, ClockId::Arbiter),
                (true, ClockId::Main),
                (true, ClockId::Pmic),
                (false, ClockId::Pmic),
                (false, ClockId::Main),
                (false, ClockId::Arbiter),
                (false, ClockId::Dma),
            ]
        );
    }

    #[test]
    fn failed_enable_unwinds_enabled_clocks() {
        let clocks = RecordingClocks {
            fail_on: Some(ClockId::Main),
            ..Default::default()
        };
        let gate = ClockGate::new(clocks, true, false);
        assert_eq!(
            gate.acquire(),
            Err(GateError::ClockEnable {
                clock: ClockId::Main
            })
        );
        assert_eq!(gate.holders(), 0);
        let events = gate.clocks().events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                (true, ClockId::Dma),
                (true, ClockId::Arbiter),
                (false, ClockId::Arbiter),
                (false, ClockId::Dma),
            ]
        );
    }

    #[test]
    fn suspended_gate_refuses_access_without_counting() {
        let gate = ClockGate::new(RecordingClocks::default(), false, false);
        gate.suspend_prepare().unwrap();
        assert_eq!(gate.acquire(), Err(GateError::SuspendedAccess));
        assert_eq!(gate.holders(), 0);
        assert_eq!(
            TransferError::from(GateError::SuspendedAccess),
            TransferError::SuspendedAccess
        );

        // Clocks were switched back off.
        let events = gate.clocks().events.lock().unwrap().clone();
        assert_eq!(events.iter().filter(|(on, _)| *on).count(), 2);
        assert_eq!(events.iter().filter(|(on, _)| !*on).count(), 2);

        gate.resume();
        assert!(gate.acquire().is_ok());
        gate.release();
    }

    #[test]
    fn holders_block_suspend() {
        let gate = Arc::new(ClockGate::new(RecordingClocks::default(), false, false));
        let guard = gate.acquire_guard().unwrap();
        assert_eq!(gate.suspend_prepare(), Err(GateError::Busy(1)));
        assert!(!gate.is_suspended());
        drop(guard);
        assert!(gate.suspend_prepare().is_ok());
        assert!(gate.is_suspended());
    }

    #[test]
    fn kept_guard_holds_reference() {
        let gate = ClockGate::new(RecordingClocks::default(), false, false);
        gate.acquire_guard().unwrap().keep();
        assert_eq!(gate.holders(), 1);
        gate.release();
        assert_eq!(gate.holders(), 0);
    }
}
