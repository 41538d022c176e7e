// Licensed under the Apache-2.0 license

//! I2C System Setup Helper
//!
//! Attaches a controller: resolves the compatible string to its
//! capabilities, checks the board configuration against them, derives the
//! source clock and initial timing, and brings the hardware to a known idle
//! state with the clocks gated off again afterwards.

use crate::common::PAGE_SIZE;
use crate::i2c::clock_gate::GateError;
use crate::i2c::common::I2cConfig;
use crate::i2c::compat::{lookup, Capabilities};
use crate::i2c::engine::MtI2c;
use crate::i2c::error::TransferError;
use crate::i2c::timing::TimingRegisters;
use crate::i2c::traits::{ClockControl, ClockId, DmaRegion, I2cPlatform};
use core::fmt;

/// Platform services handed to a controller at attach time.
pub struct PlatformParts<P: I2cPlatform> {
    pub bus: P::Bus,
    pub clocks: P::Clocks,
    pub semaphore: P::Semaphore,
    pub delay: P::Delay,
    pub dma: P::Dma,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttachError {
    /// No table entry for the compatible string.
    UnknownCompatible,
    /// `clk_src_div` of zero.
    InvalidClockDivider,
    /// The bounce buffer is smaller than the channel layout needs.
    DmaBufferTooSmall { required: usize, actual: usize },
    /// The configured speed has no divider pair at this source clock.
    UnsupportedSpeed,
    /// Clocks could not be enabled for the initial reset.
    Clock(GateError),
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::UnknownCompatible => f.write_str("unknown compatible"),
            AttachError::InvalidClockDivider => f.write_str("clock-div is 0"),
            AttachError::DmaBufferTooSmall { required, actual } => {
                write!(f, "DMA buffer of {actual} bytes, {required} required")
            }
            AttachError::UnsupportedSpeed => f.write_str("failed to set the speed"),
            AttachError::Clock(e) => write!(f, "clock enable failed: {e}"),
        }
    }
}

impl std::error::Error for AttachError {}

impl From<GateError> for AttachError {
    fn from(err: GateError) -> Self {
        AttachError::Clock(err)
    }
}

/// Helper for controller attach.
pub struct I2cSystemSetup;

impl I2cSystemSetup {
    /// Rate of the timing source clock: the PMIC bridge clock on
    /// PMIC-routed buses, the main clock otherwise, divided by
    /// `clk_src_div`.
    #[must_use]
    pub fn source_clock_hz<C: ClockControl>(clocks: &C, config: &I2cConfig) -> u32 {
        let parent = if config.have_pmic {
            ClockId::Pmic
        } else {
            ClockId::Main
        };
        clocks.rate_hz(parent) / config.clk_src_div.max(1)
    }

    /// Bounce buffer size the configuration needs: two pages for
    /// multi-channel controllers, one otherwise.
    #[must_use]
    pub fn required_dma_len(config: &I2cConfig) -> usize {
        if config.ch_offset_default != 0 {
            2 * PAGE_SIZE
        } else {
            PAGE_SIZE
        }
    }

    /// Attach a controller described by `compatible` and `config`.
    ///
    /// # Errors
    ///
    /// [`AttachError`] when the configuration does not fit the hardware, or
    /// the clocks cannot be enabled for the initial reset.
    pub fn attach<P: I2cPlatform>(
        compatible: &str,
        config: I2cConfig,
        parts: PlatformParts<P>,
    ) -> Result<MtI2c<P>, AttachError> {
        let caps: &'static Capabilities = lookup(compatible).ok_or_else(|| {
            log::error!("i2c{}: no capabilities for {compatible}", config.id);
            AttachError::UnknownCompatible
        })?;

        if config.clk_src_div == 0 {
            return Err(AttachError::InvalidClockDivider);
        }

        let required = Self::required_dma_len(&config);
        if parts.dma.len() < required {
            return Err(AttachError::DmaBufferTooSmall {
                required,
                actual: parts.dma.len(),
            });
        }

        let clock_hz = Self::source_clock_hz(&parts.clocks, &config);
        let timing = TimingRegisters::compute(clock_hz, config.speed.raw(), caps, config.hs_only)
            .map_err(|e: TransferError| {
                log::error!("i2c{}: {e} at {} Hz", config.id, config.speed.raw());
                AttachError::UnsupportedSpeed
            })?;

        log::info!(
            "[I2C] id : {}, freq : {}, div : {}, ch_offset : {:#x}, dma_ch_offset : {:#x}",
            config.id,
            config.speed.raw(),
            config.clk_src_div,
            config.ch_offset_default,
            config.dma_ch_offset_default
        );

        let controller = MtI2c::new(config, caps, parts, timing);
        controller.initialize()?;
        Ok(controller)
    }
}
