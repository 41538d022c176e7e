// Licensed under the Apache-2.0 license

//! # Platform Service Traits
//!
//! The transfer engine never talks to clock providers, interrupt controllers
//! or co-processor mailboxes directly. Each collaborator is a small trait
//! with a single responsibility, and [`I2cPlatform`] bundles one
//! implementation of each so a controller can be instantiated for real
//! silicon or for a simulated bus.
//!
//! ## Trait Map
//!
//! ```text
//! I2cPlatform
//!     ├── Bus: RegisterBus        (controller + DMA-channel register windows)
//!     ├── Clocks: ClockControl    (enable/disable/rate of the bus clocks)
//!     ├── Semaphore: HwSemaphore  (cross-processor bus-ownership tokens)
//!     ├── Delay: DelayNs          (short busy or sleeping delays)
//!     └── Dma: DmaRegion          (the physically addressable bounce buffer)
//!
//! I2cMaster                       (what the adapter layer consumes)
//! ```

use crate::i2c::plan::{ExtFlags, I2cMsg};
use embedded_hal::delay::DelayNs;
use std::sync::Arc;

/// Raw access to the controller register window and its DMA channel window.
///
/// Offsets are byte offsets relative to each window's base. Controller
/// registers are 16 bits wide, DMA-channel registers 32 bits wide.
/// Implementations must perform each access exactly once and in program
/// order (volatile semantics); the engine inserts the memory barriers that
/// order register writes against DMA and transaction start.
pub trait RegisterBus: Send + Sync {
    /// Read a 16-bit controller register.
    fn read16(&self, offset: u16) -> u16;

    /// Write a 16-bit controller register.
    fn write16(&self, offset: u16, value: u16);

    /// Read a 32-bit DMA-channel register.
    fn dma_read32(&self, offset: u16) -> u32;

    /// Write a 32-bit DMA-channel register.
    fn dma_write32(&self, offset: u16, value: u32);
}

/// Clocks feeding one bus, in the order they must be enabled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClockId {
    /// DMA engine clock.
    Dma,
    /// Bus arbiter clock (only present on some buses).
    Arbiter,
    /// Controller main clock; also the timing source clock.
    Main,
    /// Clock of the PMIC-side bridge (only present on PMIC-routed buses).
    Pmic,
}

/// Clock provider for the bus clock tree.
pub trait ClockControl: Send + Sync {
    /// Provider specific failure.
    type Error: core::fmt::Debug;

    /// Prepare and enable `clock`.
    ///
    /// # Errors
    ///
    /// Returns the provider error if the clock cannot be enabled.
    fn enable(&self, clock: ClockId) -> Result<(), Self::Error>;

    /// Disable and unprepare `clock`. Balances one successful [`Self::enable`].
    fn disable(&self, clock: ClockId);

    /// Current rate of `clock` in Hz.
    fn rate_hz(&self, clock: ClockId) -> u32;
}

/// Bus-ownership tokens shared with other processors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SemaphoreToken {
    /// Token shared with the CPU DVFS processor.
    Dvfsp,
    /// Token shared with the GPU power-management core.
    GpuPm,
    /// Per-channel token shared with the sensor co-processor.
    Scp(u16),
}

/// Hardware semaphore block.
///
/// Both operations are single attempts; retry policy lives in
/// [`crate::i2c::semaphore::SemaphoreArbiter`].
pub trait HwSemaphore: Send + Sync {
    /// Try once to take `token`. Returns `true` when the token is now owned.
    fn try_acquire(&self, token: SemaphoreToken) -> bool;

    /// Return `token`. Returns `false` when the hardware refused the release.
    fn release(&self, token: SemaphoreToken) -> bool;
}

/// An access fell outside the DMA region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DmaRangeError;

/// Physically addressable memory the DMA channel reads from and writes to.
pub trait DmaRegion: Send {
    /// Bus address programmed into the DMA channel.
    fn phys_addr(&self) -> u64;

    /// Size of the region in bytes.
    fn len(&self) -> usize;

    /// `true` for a zero-sized region.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `data` into the region starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`DmaRangeError`] if the copy would run past the end of the region.
    fn copy_in(&mut self, offset: usize, data: &[u8]) -> Result<(), DmaRangeError>;

    /// Fill `out` from the region starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`DmaRangeError`] if the copy would run past the end of the region.
    fn copy_out(&self, offset: usize, out: &mut [u8]) -> Result<(), DmaRangeError>;
}

/// One implementation of every platform service a controller needs.
pub trait I2cPlatform {
    type Bus: RegisterBus;
    type Clocks: ClockControl;
    type Semaphore: HwSemaphore;
    type Delay: DelayNs + Send;
    type Dma: DmaRegion;
}

/// I2C master operations consumed by the adapter layer.
///
/// Implementations take `&self`: exclusion between concurrent callers is the
/// implementation's job, so one controller can be shared between threads.
pub trait I2cMaster {
    /// Driver error, usable through embedded-hal.
    type Error: embedded_hal::i2c::Error + core::fmt::Debug;

    /// Execute `msgs` and return how many messages were processed.
    ///
    /// # Errors
    ///
    /// Returns the driver error for invalid messages, unavailable resources
    /// or a failed bus transaction. No partial count is ever reported.
    fn transfer(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize, Self::Error>;

    /// Same as [`Self::transfer`] with per-call flags and an optional bus
    /// speed override (`0` keeps the configured speed).
    ///
    /// # Errors
    ///
    /// See [`Self::transfer`].
    fn transfer_with_extension(
        &self,
        msgs: &mut [I2cMsg<'_>],
        flags: ExtFlags,
        override_speed_hz: u32,
    ) -> Result<usize, Self::Error>;

    /// `true` for transient failures worth another attempt.
    fn should_retry(_error: &Self::Error) -> bool {
        false
    }
}

impl<T: I2cMaster + ?Sized> I2cMaster for Arc<T> {
    type Error = T::Error;

    fn transfer(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize, Self::Error> {
        (**self).transfer(msgs)
    }

    fn transfer_with_extension(
        &self,
        msgs: &mut [I2cMsg<'_>],
        flags: ExtFlags,
        override_speed_hz: u32,
    ) -> Result<usize, Self::Error> {
        (**self).transfer_with_extension(msgs, flags, override_speed_hz)
    }

    fn should_retry(error: &Self::Error) -> bool {
        T::should_retry(error)
    }
}
