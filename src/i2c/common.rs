// Licensed under the Apache-2.0 license

//! Common configuration types for the I2C controller driver.
//!
//! This module provides the bus configuration consumed at attach time and by
//! the adapter layer: speed presets, transfer path selection and the
//! builder used to assemble an [`I2cConfig`].

use crate::i2c::semaphore::SemaphoreSharing;
use fugit::{ExtU32, HertzU32, MillisDurationU32, RateExtU32};

/// Default bus speed when none is configured.
pub const DEFAULT_SPEED_HZ: u32 = 100_000;
/// Highest fast-mode speed; above this the high-speed phase is used.
pub const MAX_FS_MODE_SPEED_HZ: u32 = 400_000;
/// Highest high-speed-mode speed.
pub const MAX_HS_MODE_SPEED_HZ: u32 = 3_400_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
    High = 3_400_000,
}

impl I2cSpeed {
    #[must_use]
    pub fn rate(self) -> HertzU32 {
        (self as u32).Hz()
    }
}

/// Data path selected for one transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum I2cXferMode {
    /// Bytes go through the data-port FIFO.
    Fifo,
    /// Bytes go through the DMA channel and the bounce buffer.
    Dma,
}

#[derive(Copy, Clone, Debug)]
pub struct I2cConfig {
    /// Bus number; selects the co-processor semaphore channel.
    pub id: u16,
    pub speed: HertzU32,
    /// Source clock divider, `clock-div` in the board description.
    pub clk_src_div: u32,
    /// Completion wait budget of one transaction.
    pub timeout: MillisDurationU32,
    /// Adapter-level retries on `Busy` and `Timeout`.
    pub retries: u8,
    pub ch_offset_default: u16,
    pub dma_ch_offset_default: u16,
    /// Register channel used by the camera co-processor, if any.
    pub ccu_offset: Option<u16>,
    pub aed: u8,
    pub have_pmic: bool,
    pub have_dcm: bool,
    pub has_arbiter_clock: bool,
    pub use_push_pull: bool,
    pub hs_only: bool,
    pub buffer_mode: bool,
    pub semaphores: SemaphoreSharing,
}

pub struct I2cConfigBuilder {
    id: u16,
    speed: HertzU32,
    clk_src_div: u32,
    timeout: MillisDurationU32,
    retries: u8,
    ch_offset_default: u16,
    dma_ch_offset_default: u16,
    ccu_offset: Option<u16>,
    aed: u8,
    have_pmic: bool,
    have_dcm: bool,
    has_arbiter_clock: bool,
    use_push_pull: bool,
    hs_only: bool,
    buffer_mode: bool,
    semaphores: SemaphoreSharing,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: 0,
            speed: DEFAULT_SPEED_HZ.Hz(),
            clk_src_div: 1,
            timeout: 2000.millis(),
            retries: 1,
            ch_offset_default: 0,
            dma_ch_offset_default: 0,
            ccu_offset: None,
            aed: 0,
            have_pmic: false,
            have_dcm: false,
            has_arbiter_clock: false,
            use_push_pull: false,
            hs_only: false,
            buffer_mode: false,
            semaphores: SemaphoreSharing::NotShared,
        }
    }
    #[must_use]
    pub fn id(mut self, id: u16) -> Self {
        self.id = id;
        self
    }
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed.rate();
        self
    }
    #[must_use]
    pub fn speed_hz(mut self, speed: HertzU32) -> Self {
        self.speed = speed;
        self
    }
    #[must_use]
    pub fn clk_src_div(mut self, div: u32) -> Self {
        self.clk_src_div = div;
        self
    }
    #[must_use]
    pub fn timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.timeout = timeout;
        self
    }
    #[must_use]
    pub fn retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }
    #[must_use]
    pub fn channel_offsets(mut self, ch_offset: u16, dma_ch_offset: u16) -> Self {
        self.ch_offset_default = ch_offset;
        self.dma_ch_offset_default = dma_ch_offset;
        self
    }
    #[must_use]
    pub fn ccu_offset(mut self, offset: u16) -> Self {
        self.ccu_offset = Some(offset);
        self
    }
    #[must_use]
    pub fn aed(mut self, aed: u8) -> Self {
        self.aed = aed;
        self
    }
    #[must_use]
    pub fn have_pmic(mut self, enabled: bool) -> Self {
        self.have_pmic = enabled;
        self
    }
    #[must_use]
    pub fn have_dcm(mut self, enabled: bool) -> Self {
        self.have_dcm = enabled;
        self
    }
    #[must_use]
    pub fn has_arbiter_clock(mut self, enabled: bool) -> Self {
        self.has_arbiter_clock = enabled;
        self
    }
    #[must_use]
    pub fn use_push_pull(mut self, enabled: bool) -> Self {
        self.use_push_pull = enabled;
        self
    }
    #[must_use]
    pub fn hs_only(mut self, enabled: bool) -> Self {
        self.hs_only = enabled;
        self
    }
    #[must_use]
    pub fn buffer_mode(mut self, enabled: bool) -> Self {
        self.buffer_mode = enabled;
        self
    }
    #[must_use]
    pub fn semaphores(mut self, sharing: SemaphoreSharing) -> Self {
        self.semaphores = sharing;
        self
    }
    #[must_use]
    pub fn build(self) -> I2cConfig {
        I2cConfig {
            id: self.id,
            speed: self.speed,
            clk_src_div: self.clk_src_div,
            timeout: self.timeout,
            retries: self.retries,
            ch_offset_default: self.ch_offset_default,
            dma_ch_offset_default: self.dma_ch_offset_default,
            ccu_offset: self.ccu_offset,
            aed: self.aed,
            have_pmic: self.have_pmic,
            have_dcm: self.have_dcm,
            has_arbiter_clock: self.has_arbiter_clock,
            use_push_pull: self.use_push_pull,
            hs_only: self.hs_only,
            buffer_mode: self.buffer_mode,
            semaphores: self.semaphores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_adapter_defaults() {
        let config = I2cConfigBuilder::new().build();
        assert_eq!(config.speed.raw(), DEFAULT_SPEED_HZ);
        assert_eq!(config.timeout.ticks(), 2000);
        assert_eq!(config.retries, 1);
        assert_eq!(config.clk_src_div, 1);
        assert_eq!(config.semaphores, SemaphoreSharing::NotShared);
        assert!(config.ccu_offset.is_none());
    }

    #[test]
    fn builder_applies_settings() {
        let config = I2cConfigBuilder::new()
            .id(3)
            .speed(I2cSpeed::Fast)
            .clk_src_div(5)
            .channel_offsets(0x100, 0x80)
            .ccu_offset(0x200)
            .buffer_mode(true)
            .build();
        assert_eq!(config.id, 3);
        assert_eq!(config.speed.raw(), 400_000);
        assert_eq!(config.clk_src_div, 5);
        assert_eq!(config.ch_offset_default, 0x100);
        assert_eq!(config.dma_ch_offset_default, 0x80);
        assert_eq!(config.ccu_offset, Some(0x200));
        assert!(config.buffer_mode);
    }
}
