// Licensed under the Apache-2.0 license

//! Bus-ownership tokens shared with co-processors.

use crate::i2c::error::TransferError;
use crate::i2c::traits::{HwSemaphore, SemaphoreToken};
use core::sync::atomic::{AtomicU32, Ordering};
use embedded_hal::delay::DelayNs;

/// Attempts per token before giving up.
pub const SEMAPHORE_RETRIES: u32 = 100;
/// Pause between two attempts.
pub const SEMAPHORE_RETRY_DELAY_US: u32 = 20;

/// Which co-processors share this bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SemaphoreSharing {
    /// Single owner; arbitration is skipped.
    NotShared,
    Shared {
        /// CPU DVFS processor (`appm`).
        dvfsp: bool,
        /// GPU power-management core.
        gpu_pm: bool,
        /// Sensor co-processor channel.
        scp_channel: Option<u16>,
    },
}

impl SemaphoreSharing {
    /// Build the sharing description from board flags. The sensor
    /// co-processor only arbitrates buses 0 and 1.
    #[must_use]
    pub fn from_flags(appm: bool, gpu_pm: bool, skip_scp_sema: bool, bus_id: u16) -> Self {
        let scp_channel = (!skip_scp_sema && bus_id <= 1).then_some(bus_id);
        if !appm && !gpu_pm && scp_channel.is_none() {
            return SemaphoreSharing::NotShared;
        }
        SemaphoreSharing::Shared {
            dvfsp: appm,
            gpu_pm,
            scp_channel,
        }
    }

    /// Tokens in acquisition order.
    #[must_use]
    pub fn tokens(&self) -> heapless::Vec<SemaphoreToken, 3> {
        let mut tokens = heapless::Vec::new();
        if let SemaphoreSharing::Shared {
            dvfsp,
            gpu_pm,
            scp_channel,
        } = *self
        {
            // At most three tokens, the pushes cannot fail.
            if dvfsp {
                let _ = tokens.push(SemaphoreToken::Dvfsp);
            }
            if gpu_pm {
                let _ = tokens.push(SemaphoreToken::GpuPm);
            }
            if let Some(ch) = scp_channel {
                let _ = tokens.push(SemaphoreToken::Scp(ch));
            }
        }
        tokens
    }

    /// `true` when the DVFS processor also drives this bus.
    #[must_use]
    pub fn uses_dvfsp(&self) -> bool {
        matches!(self, SemaphoreSharing::Shared { dvfsp: true, .. })
    }
}

pub struct SemaphoreArbiter<S: HwSemaphore> {
    hw: S,
    sharing: SemaphoreSharing,
    leaks: AtomicU32,
}

impl<S: HwSemaphore> SemaphoreArbiter<S> {
    #[must_use]
    pub fn new(hw: S, sharing: SemaphoreSharing) -> Self {
        Self {
            hw,
            sharing,
            leaks: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn sharing(&self) -> SemaphoreSharing {
        self.sharing
    }

    /// Take every configured token.
    ///
    /// # Errors
    ///
    /// [`TransferError::Busy`] when a token stays unavailable for the whole
    /// retry budget. Tokens taken before it are returned first.
    pub fn acquire<D: DelayNs>(&self, delay: &mut D) -> Result<(), TransferError> {
        let tokens = self.sharing.tokens();
        for (n, token) in tokens.iter().enumerate() {
            if !self.try_token(*token, delay) {
                log::error!("hw semaphore {token:?} time out");
                for taken in tokens.iter().take(n).rev() {
                    self.release_token(*taken);
                }
                return Err(TransferError::Busy);
            }
        }
        Ok(())
    }

    fn try_token<D: DelayNs>(&self, token: SemaphoreToken, delay: &mut D) -> bool {
        for attempt in 0..SEMAPHORE_RETRIES {
            if self.hw.try_acquire(token) {
                return true;
            }
            if attempt + 1 < SEMAPHORE_RETRIES {
                delay.delay_us(SEMAPHORE_RETRY_DELAY_US);
            }
        }
        false
    }

    /// Return every configured token, in reverse order.
    ///
    /// A refused release is logged and counted; it never fails the call.
    /// Returns `false` if any token leaked.
    pub fn release(&self) -> bool {
        let mut clean = true;
        for token in self.sharing.tokens().iter().rev() {
            clean &= self.release_token(*token);
        }
        clean
    }

    fn release_token(&self, token: SemaphoreToken) -> bool {
        if self.hw.release(token) {
            return true;
        }
        self.leaks.fetch_add(1, Ordering::Relaxed);
        log::warn!("release hw semaphore {token:?} failed");
        false
    }

    /// Number of tokens whose release the hardware refused.
    #[must_use]
    pub fn ownership_leaks(&self) -> u32 {
        self.leaks.load(Ordering::Relaxed)
    }
}
