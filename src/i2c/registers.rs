// Licensed under the Apache-2.0 license

//! Register map, revision indirection and bit definitions.
//!
//! Registers are named logically ([`Reg`], [`DmaReg`]) and resolved to a
//! byte offset through the revision table. A register that does not exist
//! on a revision resolves to `None`: writes to it are dropped and reads
//! return zero, which is what the hardware-neutral code paths expect.

use crate::i2c::compat::HwRevision;
use crate::i2c::traits::RegisterBus;

/// Controller registers (16 bits wide).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg {
    DataPort,
    SlaveAddr,
    IntrMask,
    IntrStat,
    Control,
    TransferLen,
    TransacLen,
    DelayLen,
    Timing,
    Start,
    ExtConf,
    LTiming,
    FifoStat,
    FifoThresh,
    FifoAddrClr,
    IoConfig,
    Hs,
    SoftReset,
    DcmEn,
    PathDir,
    DebugStat,
    DebugCtrl,
    TransferLenAux,
    ClockDiv,
    HwTimeout,
    McuIntr,
    Rollback,
    MultiDma,
}

impl Reg {
    /// `(V1 offset, V2 offset)`.
    const fn offsets(self) -> (Option<u16>, Option<u16>) {
        match self {
            Reg::DataPort => (Some(0x00), Some(0x00)),
            Reg::SlaveAddr => (Some(0x04), Some(0x94)),
            Reg::IntrMask => (Some(0x08), Some(0x08)),
            Reg::IntrStat => (Some(0x0c), Some(0x0c)),
            Reg::Control => (Some(0x10), Some(0x10)),
            Reg::TransferLen => (Some(0x14), Some(0x14)),
            Reg::TransacLen => (Some(0x18), Some(0x18)),
            Reg::DelayLen => (Some(0x1c), Some(0x1c)),
            Reg::Timing => (Some(0x20), Some(0x20)),
            Reg::Start => (Some(0x24), Some(0x24)),
            Reg::ExtConf => (Some(0x28), Some(0x28)),
            Reg::LTiming => (Some(0x2c), Some(0x2c)),
            Reg::FifoStat => (Some(0x30), Some(0xf4)),
            Reg::FifoThresh => (Some(0x34), Some(0xf8)),
            Reg::FifoAddrClr => (Some(0x38), Some(0x38)),
            Reg::IoConfig => (Some(0x40), Some(0x34)),
            Reg::Hs => (Some(0x48), Some(0x30)),
            Reg::SoftReset => (Some(0x50), Some(0x50)),
            Reg::DcmEn => (Some(0x54), None),
            Reg::PathDir => (Some(0x60), None),
            Reg::DebugStat => (Some(0x64), Some(0xe4)),
            Reg::DebugCtrl => (Some(0x68), Some(0xe8)),
            Reg::TransferLenAux => (Some(0x6c), Some(0x44)),
            Reg::ClockDiv => (Some(0x70), Some(0x48)),
            Reg::HwTimeout => (None, Some(0x98)),
            Reg::McuIntr => (None, Some(0x58)),
            Reg::Rollback => (None, Some(0x5c)),
            Reg::MultiDma => (None, Some(0x8c)),
        }
    }

    /// Byte offset of this register on `revision`, if it exists there.
    #[must_use]
    pub const fn offset(self, revision: HwRevision) -> Option<u16> {
        let (v1, v2) = self.offsets();
        match revision {
            HwRevision::V1 => v1,
            HwRevision::V2 => v2,
        }
    }
}

/// DMA-channel registers (32 bits wide). Same layout on every revision.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum DmaReg {
    IntFlag = 0x00,
    IntEn = 0x04,
    En = 0x08,
    Rst = 0x0c,
    Stop = 0x10,
    Flush = 0x14,
    Con = 0x18,
    TxMemAddr = 0x1c,
    RxMemAddr = 0x20,
    TxLen = 0x24,
    RxLen = 0x28,
    IntBufSize = 0x38,
    DebugSta = 0x50,
    TxMemAddr2 = 0x54,
    RxMemAddr2 = 0x58,
}

bitflags::bitflags! {
    /// `CONTROL` bits.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Control: u16 {
        /// Also the `PATH_DIR` routing bit on PMIC buses.
        const WRAPPER = 1 << 0;
        const RS = 1 << 1;
        const DMA_EN = 1 << 2;
        const CLK_EXT_EN = 1 << 3;
        const DIR_CHANGE = 1 << 4;
        const ACKERR_DET_EN = 1 << 5;
        const TRANSFER_LEN_CHANGE = 1 << 6;
        const DMAACK_EN = 1 << 8;
        const ASYNC_MODE = 1 << 9;
    }
}

bitflags::bitflags! {
    /// `INTR_STAT` / `INTR_MASK` bits.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Intr: u16 {
        const TRANSAC_COMP = 1 << 0;
        const ACKERR = 1 << 1;
        const HS_NACKERR = 1 << 2;
        const ARB_LOST = 1 << 3;
        /// V2 only.
        const MAS_ERR = 1 << 8;
        /// V2 only: SCL held low past `HW_TIMEOUT`.
        const TIMEOUT = 1 << 9;
        const ALL = Self::TRANSAC_COMP.bits()
            | Self::ACKERR.bits()
            | Self::HS_NACKERR.bits()
            | Self::ARB_LOST.bits()
            | Self::MAS_ERR.bits()
            | Self::TIMEOUT.bits();
        /// Flags that make a completed transaction a failure.
        const ERRORS = Self::ACKERR.bits()
            | Self::HS_NACKERR.bits()
            | Self::ARB_LOST.bits()
            | Self::MAS_ERR.bits()
            | Self::TIMEOUT.bits();
    }
}

/// `START` bits.
pub mod start {
    pub const TRANSAC_START: u16 = 1 << 0;
    pub const RESUME_ARBIT: u16 = 1 << 1;
}

/// `FIFO_ADDR_CLR` bits.
pub mod fifo {
    pub const ADDR_CLR: u16 = 1 << 0;
    pub const ADDR_CLR_MCH: u16 = 1 << 2;
    /// Receive count field of `FIFO_STAT`.
    pub const RX_COUNT_SHIFT: u16 = 4;
    pub const RX_COUNT_MASK: u16 = 0x000f;
    /// Depth of the data-port FIFO; longer payloads go through DMA.
    pub const DEPTH: usize = 8;
}

/// Miscellaneous controller register values.
pub mod value {
    pub const SOFT_RST: u16 = 0x0001;
    pub const IO_CONFIG_OPEN_DRAIN: u16 = 0x0003;
    pub const IO_CONFIG_PUSH_PULL: u16 = 0x0000;
    pub const IO_CONFIG_AED_MASK: u16 = 0x0070;
    pub const DCM_DISABLE: u16 = 0x0000;
    pub const DCM_ENABLE: u16 = 0x0001;
    pub const DELAY_LEN: u16 = 0x000a;
    pub const ST_START_CON: u16 = 0x8001;
    pub const FS_START_CON: u16 = 0x1800;
    pub const MCU_INTR_EN: u16 = 0x0001;
    pub const SHADOW_REG_MODE: u16 = 0x0001;
    /// `TIMING` bit enabling the V2 SCL timeout counter.
    pub const TIMEOUT_EN: u16 = 1 << 15;
}

/// DMA-channel register values.
pub mod dma {
    pub const INT_FLAG_NONE: u32 = 0x0000;
    pub const CON_TX: u32 = 0x0000;
    pub const CON_RX: u32 = 0x0001;
    pub const START_EN: u32 = 0x0001;
    pub const WARM_RST: u32 = 0x0001;
    pub const HARD_RST: u32 = 0x0002;
    pub const CLR_FLAG: u32 = 0x0000;
}

/// View of one controller channel through the revision table.
pub struct Regs<'a, B: RegisterBus> {
    bus: &'a B,
    revision: HwRevision,
    ch_offset: u16,
    dma_ch_offset: u16,
}

impl<B: RegisterBus> Clone for Regs<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: RegisterBus> Copy for Regs<'_, B> {}

impl<'a, B: RegisterBus> Regs<'a, B> {
    #[must_use]
    pub fn new(bus: &'a B, revision: HwRevision, ch_offset: u16, dma_ch_offset: u16) -> Self {
        Self {
            bus,
            revision,
            ch_offset,
            dma_ch_offset,
        }
    }

    /// The same controller seen through its shadow (channel 0) registers.
    #[must_use]
    pub fn shadow(self) -> Self {
        self.at_channel(0)
    }

    /// The same controller seen through another channel offset.
    #[must_use]
    pub fn at_channel(self, ch_offset: u16) -> Self {
        Self { ch_offset, ..self }
    }

    #[must_use]
    pub fn ch_offset(&self) -> u16 {
        self.ch_offset
    }

    #[must_use]
    pub fn read(&self, reg: Reg) -> u16 {
        match reg.offset(self.revision) {
            Some(offset) => self.bus.read16(self.ch_offset.wrapping_add(offset)),
            None => 0,
        }
    }

    pub fn write(&self, reg: Reg, value: u16) {
        if let Some(offset) = reg.offset(self.revision) {
            self.bus.write16(self.ch_offset.wrapping_add(offset), value);
        }
    }

    #[must_use]
    pub fn dma_read(&self, reg: DmaReg) -> u32 {
        self.bus
            .dma_read32(self.dma_ch_offset.wrapping_add(reg as u16))
    }

    pub fn dma_write(&self, reg: DmaReg, value: u32) {
        self.bus
            .dma_write32(self.dma_ch_offset.wrapping_add(reg as u16), value);
    }
}

/// Volatile access to real register windows.
pub struct MmioBus {
    base: *mut u8,
    dma_base: *mut u8,
}

// SAFETY: the pointers address device memory which is valid from any thread;
// every access is a single volatile load or store.
unsafe impl Send for MmioBus {}
// SAFETY: see `Send`; concurrent accesses are serialised by the engine's locks.
unsafe impl Sync for MmioBus {}

impl MmioBus {
    /// # Safety
    ///
    /// `base` must map the controller register window and `dma_base` the DMA
    /// channel window, both for the lifetime of the returned value, and no
    /// other code may assume exclusive ownership of those windows.
    #[must_use]
    pub unsafe fn new(base: *mut u8, dma_base: *mut u8) -> Self {
        Self { base, dma_base }
    }
}

impl RegisterBus for MmioBus {
    fn read16(&self, offset: u16) -> u16 {
        // SAFETY: `new` guarantees the window is mapped; offsets come from the
        // register table.
        unsafe {
            core::ptr::read_volatile(self.base.add(usize::from(offset)).cast::<u16>())
        }
    }

    fn write16(&self, offset: u16, value: u16) {
        // SAFETY: as for `read16`.
        unsafe {
            core::ptr::write_volatile(self.base.add(usize::from(offset)).cast::<u16>(), value);
        }
    }

    fn dma_read32(&self, offset: u16) -> u32 {
        // SAFETY: as for `read16`, on the DMA window.
        unsafe {
            core::ptr::read_volatile(self.dma_base.add(usize::from(offset)).cast::<u32>())
        }
    }

    fn dma_write32(&self, offset: u16, value: u32) {
        // SAFETY: as for `read16`, on the DMA window.
        unsafe {
            core::ptr::write_volatile(
                self.dma_base.add(usize::from(offset)).cast::<u32>(),
                value,
            );
        }
    }
}
