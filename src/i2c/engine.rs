// Licensed under the Apache-2.0 license

//! # Transfer engine
//!
//! [`MtI2c`] owns one controller: its register windows, DMA bounce buffer,
//! clock gate and semaphore arbiter. Every public entry point follows the
//! same ordering:
//!
//! ```text
//! gate acquire -> transfer lock -> plan -> semaphore acquire
//!     -> program -> trigger -> wait -> classify / resync
//! semaphore release -> transfer lock release -> gate release
//! ```
//!
//! The interrupt handler ([`MtI2c::handle_interrupt`]) never takes the
//! transfer lock. Everything it touches is either atomic or the
//! [`Completion`] slot.

use crate::i2c::clock_gate::{ClockGate, GateError};
use crate::i2c::common::{I2cConfig, I2cXferMode, DEFAULT_SPEED_HZ, MAX_FS_MODE_SPEED_HZ};
use crate::i2c::compat::{Capabilities, HwRevision};
use crate::i2c::completion::Completion;
use crate::i2c::diagnostics::{
    DmaSnapshot, History, OpRecord, RegisterSnapshot, StatusSnapshot,
};
use crate::i2c::error::{RemoteFault, TransferError};
use crate::i2c::plan::{ExtFlags, I2cMsg, OpMode, Payload, Transaction, TransmissionPlan};
use crate::i2c::registers::{dma, fifo, start, value, Control, DmaReg, Intr, Reg, Regs};
use crate::i2c::semaphore::SemaphoreArbiter;
use crate::i2c::system_setup::PlatformParts;
use crate::i2c::timing::{hw_timeout_value, TimingRegisters};
use crate::i2c::traits::{ClockControl, ClockId, DmaRegion, I2cMaster, I2cPlatform};
use core::sync::atomic::{fence, AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};
use embedded_hal::delay::DelayNs;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Largest source clock divider the `CLOCK_DIV` register encodes.
pub const MAX_CLOCK_DIV: u32 = 256;

const POLL_TRIES: u32 = 100;
const POLL_INTERVAL_MS: u32 = 20;
const DMA_HARD_RESET_US: u32 = 50;
const RESYNC_SETTLE_US: u32 = 5;
const CCU_DUMMY_ADDR: u16 = 0x1;

/// Where the engine currently is in a transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferState {
    Idle = 0,
    Planning,
    Programming,
    Triggered,
    Waiting,
    Completed,
    TimedOut,
    RemoteError,
}

impl TransferState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TransferState::Planning,
            2 => TransferState::Programming,
            3 => TransferState::Triggered,
            4 => TransferState::Waiting,
            5 => TransferState::Completed,
            6 => TransferState::TimedOut,
            7 => TransferState::RemoteError,
            _ => TransferState::Idle,
        }
    }
}

/// Who starts a programmed transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    /// An external hardware event (buffer mode).
    HwEvent,
    /// The camera co-processor.
    Ccu,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// The engine asserts the start bit and waits for completion.
    SelfTriggered,
    /// The engine only programs the controller.
    ExternallyTriggered(TriggerSource),
}

#[derive(Copy, Clone)]
struct CallOptions {
    flags: ExtFlags,
    override_speed_hz: u32,
    trigger: Trigger,
    ch_offset: u16,
    dma_ch_offset: u16,
}

/// State only a lock holder touches.
struct EngineInner<P: I2cPlatform> {
    dma: P::Dma,
    delay: P::Delay,
    /// Timing registers last programmed; reapplied on resync.
    timing: TimingRegisters,
}

/// One MediaTek I2C controller.
pub struct MtI2c<P: I2cPlatform> {
    config: I2cConfig,
    caps: &'static Capabilities,
    bus: P::Bus,
    gate: ClockGate<P::Clocks>,
    semaphore: SemaphoreArbiter<P::Semaphore>,
    completion: Completion,
    inner: Mutex<EngineInner<P>>,
    diag: Mutex<History>,
    epoch: Instant,
    // Shared with the interrupt handler.
    ch_offset: AtomicU16,
    dma_ch_offset: AtomicU16,
    last_addr: AtomicU16,
    irq_stat: AtomicU16,
    hw_trigger: AtomicBool,
    needs_resync: AtomicBool,
    state: AtomicU8,
    // Diagnostics and entry-point bookkeeping.
    speed_hz: AtomicU32,
    last_nack_addr: AtomicU16,
    ccu_channel: AtomicU16,
    ccu_active: AtomicBool,
}

impl<P: I2cPlatform> MtI2c<P> {
    pub(crate) fn new(
        config: I2cConfig,
        caps: &'static Capabilities,
        parts: PlatformParts<P>,
        timing: TimingRegisters,
    ) -> Self {
        Self {
            gate: ClockGate::new(parts.clocks, config.has_arbiter_clock, config.have_pmic),
            semaphore: SemaphoreArbiter::new(parts.semaphore, config.semaphores),
            bus: parts.bus,
            completion: Completion::new(),
            inner: Mutex::new(EngineInner {
                dma: parts.dma,
                delay: parts.delay,
                timing,
            }),
            diag: Mutex::new(History::new()),
            epoch: Instant::now(),
            ch_offset: AtomicU16::new(config.ch_offset_default),
            dma_ch_offset: AtomicU16::new(config.dma_ch_offset_default),
            last_addr: AtomicU16::new(0),
            irq_stat: AtomicU16::new(0),
            hw_trigger: AtomicBool::new(false),
            needs_resync: AtomicBool::new(false),
            state: AtomicU8::new(TransferState::Idle as u8),
            speed_hz: AtomicU32::new(config.speed.raw()),
            last_nack_addr: AtomicU16::new(0),
            ccu_channel: AtomicU16::new(0),
            ccu_active: AtomicBool::new(false),
            caps,
            config,
        }
    }

    #[must_use]
    pub fn id(&self) -> u16 {
        self.config.id
    }

    #[must_use]
    pub fn config(&self) -> &I2cConfig {
        &self.config
    }

    #[must_use]
    pub fn capabilities(&self) -> &'static Capabilities {
        self.caps
    }

    #[must_use]
    pub fn state(&self) -> TransferState {
        TransferState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn gate(&self) -> &ClockGate<P::Clocks> {
        &self.gate
    }

    /// Semaphore tokens the hardware refused to take back.
    #[must_use]
    pub fn ownership_leaks(&self) -> u32 {
        self.semaphore.ownership_leaks()
    }

    fn set_state(&self, state: TransferState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn lock_inner(&self) -> MutexGuard<'_, EngineInner<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.diag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn regs(&self, ch_offset: u16, dma_ch_offset: u16) -> Regs<'_, P::Bus> {
        Regs::new(&self.bus, self.caps.revision, ch_offset, dma_ch_offset)
    }

    fn clock_in_hz(&self) -> u32 {
        self.gate.clocks().rate_hz(ClockId::Main) / self.config.clk_src_div.max(1)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.timeout.to_millis()))
    }

    fn default_options(&self) -> CallOptions {
        CallOptions {
            flags: ExtFlags::empty(),
            override_speed_hz: 0,
            trigger: Trigger::SelfTriggered,
            ch_offset: self.config.ch_offset_default,
            dma_ch_offset: self.config.dma_ch_offset_default,
        }
    }

    /// Gate the clocks on and bring the controller to its idle state.
    pub(crate) fn initialize(&self) -> Result<(), GateError> {
        let _gate = self.gate.acquire_guard()?;
        let mut inner = self.lock_inner();
        self.init_hw(&mut inner);
        Ok(())
    }

    /// Execute `msgs` at the configured speed.
    ///
    /// Returns the number of messages processed, which is always
    /// `msgs.len()` on success.
    ///
    /// # Errors
    ///
    /// Any [`TransferError`]. Hardware-observed failures leave the
    /// controller resynchronised.
    pub fn transfer(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize, TransferError> {
        self.transfer_with_extension(msgs, ExtFlags::empty(), 0)
    }

    /// [`Self::transfer`] with per-call flags and a speed override
    /// (`0` keeps the configured speed).
    ///
    /// While hardware triggering is armed the call only programs the
    /// controller, as [`Self::hw_trigger_transfer`] does.
    ///
    /// # Errors
    ///
    /// See [`Self::transfer`].
    pub fn transfer_with_extension(
        &self,
        msgs: &mut [I2cMsg<'_>],
        flags: ExtFlags,
        override_speed_hz: u32,
    ) -> Result<usize, TransferError> {
        let _gate = self.gate.acquire_guard().map_err(|e| {
            log::warn!("i2c{}: {e}", self.config.id);
            TransferError::from(e)
        })?;
        let mut inner = self.lock_inner();
        let trigger = if self.hw_trigger.load(Ordering::Acquire) {
            Trigger::ExternallyTriggered(TriggerSource::HwEvent)
        } else {
            Trigger::SelfTriggered
        };
        let opts = CallOptions {
            flags,
            override_speed_hz,
            trigger,
            ..self.default_options()
        };
        self.run(&mut inner, msgs, opts)
    }

    fn run(
        &self,
        inner: &mut EngineInner<P>,
        msgs: &mut [I2cMsg<'_>],
        opts: CallOptions,
    ) -> Result<usize, TransferError> {
        self.resync_if_flagged(inner);
        self.set_state(TransferState::Planning);
        let result = self
            .plan(msgs, inner.dma.len(), opts.override_speed_hz)
            .and_then(|plan| self.execute_plan(inner, &plan, msgs, opts));
        self.set_state(TransferState::Idle);
        result.map(|()| msgs.len())
    }

    fn plan(
        &self,
        msgs: &[I2cMsg<'_>],
        dma_capacity: usize,
        override_speed_hz: u32,
    ) -> Result<TransmissionPlan, TransferError> {
        let speed_hz = if override_speed_hz != 0 {
            override_speed_hz
        } else {
            self.config.speed.raw()
        };
        if self.caps.set_dt_div && self.config.clk_src_div > MAX_CLOCK_DIV {
            log::error!("i2c{}: clock div error", self.config.id);
            return Err(TransferError::InvalidArgument);
        }
        let timing = TimingRegisters::compute(self.clock_in_hz(), speed_hz, self.caps, self.config.hs_only)
            .inspect_err(|_| log::error!("i2c{}: failed to set the speed {speed_hz}", self.config.id))?;
        TransmissionPlan::new(msgs, dma_capacity, timing, speed_hz)
    }

    fn execute_plan(
        &self,
        inner: &mut EngineInner<P>,
        plan: &TransmissionPlan,
        msgs: &mut [I2cMsg<'_>],
        opts: CallOptions,
    ) -> Result<(), TransferError> {
        self.semaphore
            .acquire(&mut inner.delay)
            .inspect_err(|_| log::error!("i2c{}: get hw semaphore failed", self.config.id))?;
        self.speed_hz.store(plan.speed_hz, Ordering::Relaxed);

        let mut result = Ok(());
        for t in &plan.transactions {
            result = self.execute(inner, plan, t, msgs, opts);
            if result.is_err() {
                break;
            }
        }

        if !self.semaphore.release() {
            log::warn!(
                "i2c{}: hw semaphore leaked, {} so far",
                self.config.id,
                self.semaphore.ownership_leaks()
            );
        }
        result
    }

    fn execute(
        &self,
        inner: &mut EngineInner<P>,
        plan: &TransmissionPlan,
        t: &Transaction,
        msgs: &mut [I2cMsg<'_>],
        opts: CallOptions,
    ) -> Result<(), TransferError> {
        let regs = self.regs(opts.ch_offset, opts.dma_ch_offset);
        let ccu = opts.trigger == Trigger::ExternallyTriggered(TriggerSource::Ccu);

        self.ch_offset.store(opts.ch_offset, Ordering::Release);
        self.dma_ch_offset.store(opts.dma_ch_offset, Ordering::Release);
        self.last_addr.store(t.addr, Ordering::Relaxed);
        self.irq_stat.store(0, Ordering::Relaxed);
        self.completion.reset();

        if t.path == I2cXferMode::Dma && !ccu {
            stage_writes(&mut inner.dma, t, msgs)?;
        }

        self.set_state(TransferState::Programming);
        self.program(inner, &regs, plan, t, msgs, opts.trigger);
        fence(Ordering::SeqCst);

        if let Trigger::ExternallyTriggered(source) = opts.trigger {
            self.set_state(TransferState::Triggered);
            log::info!("i2c{}: {source:?} trigger armed", self.config.id);
            return Ok(());
        }
        regs.write(Reg::Start, start::TRANSAC_START);
        self.set_state(TransferState::Triggered);

        self.set_state(TransferState::Waiting);
        let status = self.completion.wait_timeout(self.timeout());
        self.record(&regs, status);

        match status {
            None => Err(self.on_timeout(inner, &regs, t)),
            Some(stat) if Intr::from_bits_retain(stat).intersects(Intr::ERRORS) => {
                Err(self.on_remote_error(inner, &regs, t, stat, opts.flags))
            }
            Some(stat) => self.on_complete(inner, &regs, t, msgs, stat),
        }
    }

    fn program(
        &self,
        inner: &mut EngineInner<P>,
        regs: &Regs<'_, P::Bus>,
        plan: &TransmissionPlan,
        t: &Transaction,
        msgs: &[I2cMsg<'_>],
        trigger: Trigger,
    ) {
        let caps = self.caps;
        let config = &self.config;
        let is_dma = t.path == I2cXferMode::Dma;
        let ccu = trigger == Trigger::ExternallyTriggered(TriggerSource::Ccu);

        if is_dma && regs.dma_read(DmaReg::En) != 0 {
            log::info!("i2c{}: DMA hard reset before start", config.id);
            regs.dma_write(DmaReg::Rst, dma::HARD_RST);
            inner.delay.delay_us(DMA_HARD_RESET_US);
            regs.dma_write(DmaReg::Rst, dma::CLR_FLAG);
        }

        inner.timing = plan.timing;
        if caps.revision == HwRevision::V2 && plan.timing.ltiming != 0 {
            regs.write(
                Reg::HwTimeout,
                hw_timeout_value(self.clock_in_hz(), plan.timing.ltiming),
            );
        }

        if caps.set_dt_div {
            let div = u16::try_from(config.clk_src_div.saturating_sub(1)).unwrap_or(0xff);
            regs.write(Reg::ClockDiv, div << 8 | div);
        }

        if config.have_pmic {
            regs.write(Reg::PathDir, Control::WRAPPER.bits());
        }

        let mut control = Control::ACKERR_DET_EN | Control::CLK_EXT_EN;
        if is_dma {
            control |= Control::DMA_EN | Control::DMAACK_EN | Control::ASYNC_MODE;
        }
        if plan.speed_hz > MAX_FS_MODE_SPEED_HZ {
            control |= Control::RS;
        }
        if t.mode == OpMode::WriteRead {
            control |= Control::DIR_CHANGE | Control::RS;
        }
        regs.write(Reg::Control, control.bits());

        let ext_conf = if plan.speed_hz <= DEFAULT_SPEED_HZ {
            value::ST_START_CON
        } else if caps.ext_time_config != 0 {
            caps.ext_time_config
        } else {
            value::FS_START_CON
        };
        regs.write(Reg::ExtConf, ext_conf);
        if !control.contains(Control::RS) {
            regs.write(Reg::DelayLen, value::DELAY_LEN);
        }

        regs.write(Reg::IoConfig, self.io_config(true));
        self.write_timing(regs, &plan.timing);
        if config.have_dcm {
            regs.write(Reg::DcmEn, value::DCM_ENABLE);
        }

        let mut addr_reg = t.addr << 1;
        if t.mode == OpMode::Read {
            addr_reg |= 0x1;
        }
        regs.write(Reg::SlaveAddr, addr_reg);

        let mut int_mask = Intr::HS_NACKERR | Intr::ACKERR | Intr::TRANSAC_COMP | Intr::ARB_LOST;
        if caps.revision == HwRevision::V2 {
            int_mask |= Intr::MAS_ERR | Intr::TIMEOUT;
        }
        if regs.ch_offset() != 0 {
            int_mask.remove(Intr::HS_NACKERR | Intr::ACKERR);
        }
        regs.write(Reg::IntrStat, Intr::ALL.bits());
        clear_fifo(regs);
        regs.write(Reg::IntrMask, int_mask.bits());

        match t.mode {
            OpMode::WriteRead => {
                if self.semaphore.sharing().uses_dvfsp() && caps.idvfs_i2c {
                    regs.write(
                        Reg::TransferLen,
                        (t.msg_len & 0xff) | ((t.aux_len << 8) & 0x1f00),
                    );
                } else {
                    regs.write(Reg::TransferLen, t.msg_len);
                    regs.write(Reg::TransferLenAux, t.aux_len);
                }
            }
            OpMode::Write | OpMode::Read | OpMode::MultiWrite => {
                regs.write(Reg::TransferLen, t.msg_len);
            }
        }
        regs.write(Reg::TransacLen, t.transac_count());

        if ccu {
            // The co-processor supplies its own data.
        } else if is_dma {
            self.program_dma(inner, regs, t);
        } else if t.mode != OpMode::Read {
            for msg in write_msgs(t, msgs) {
                if let Payload::Write(data) = &msg.payload {
                    data.iter()
                        .for_each(|b| regs.write(Reg::DataPort, u16::from(*b)));
                }
            }
        }

        if caps.revision == HwRevision::V2 && !ccu {
            regs.write(Reg::McuIntr, value::MCU_INTR_EN);
        }
    }

    fn program_dma(&self, inner: &EngineInner<P>, regs: &Regs<'_, P::Bus>, t: &Transaction) {
        let paddr = inner.dma.phys_addr();
        let low = (paddr & 0xffff_ffff) as u32;
        let high = (paddr >> 32) as u32;
        let high_addr = self.caps.dma.has_high_address();
        let total = u32::try_from(t.total_len).unwrap_or(u32::MAX);

        match t.mode {
            OpMode::Read => {
                regs.dma_write(DmaReg::IntFlag, dma::INT_FLAG_NONE);
                regs.dma_write(DmaReg::Con, dma::CON_RX);
                regs.dma_write(DmaReg::RxMemAddr, low);
                if high_addr {
                    regs.dma_write(DmaReg::RxMemAddr2, high);
                }
                regs.dma_write(DmaReg::RxLen, u32::from(t.msg_len));
            }
            OpMode::Write | OpMode::MultiWrite => {
                regs.dma_write(DmaReg::IntFlag, dma::INT_FLAG_NONE);
                regs.dma_write(DmaReg::Con, dma::CON_TX);
                regs.dma_write(DmaReg::TxMemAddr, low);
                if high_addr {
                    regs.dma_write(DmaReg::TxMemAddr2, high);
                }
                regs.dma_write(DmaReg::TxLen, total);
            }
            OpMode::WriteRead => {
                regs.dma_write(DmaReg::IntFlag, dma::INT_FLAG_NONE);
                regs.dma_write(DmaReg::Con, dma::CON_TX);
                regs.dma_write(DmaReg::TxMemAddr, low);
                regs.dma_write(DmaReg::RxMemAddr, low);
                if high_addr {
                    regs.dma_write(DmaReg::TxMemAddr2, high);
                    regs.dma_write(DmaReg::RxMemAddr2, high);
                }
                regs.dma_write(DmaReg::TxLen, u32::from(t.msg_len));
                regs.dma_write(DmaReg::RxLen, u32::from(t.aux_len));
            }
        }

        self.history().record_dma(DmaSnapshot::capture(regs));
        fence(Ordering::SeqCst);
        regs.dma_write(DmaReg::En, dma::START_EN);
    }

    fn io_config(&self, with_aed: bool) -> u16 {
        if self.config.use_push_pull {
            return value::IO_CONFIG_PUSH_PULL;
        }
        let mut io = value::IO_CONFIG_OPEN_DRAIN;
        if with_aed && self.caps.set_aed {
            io |= (u16::from(self.config.aed) << 4) & value::IO_CONFIG_AED_MASK;
        }
        io
    }

    fn write_timing(&self, regs: &Regs<'_, P::Bus>, timing: &TimingRegisters) {
        if self.caps.revision == HwRevision::V2 {
            regs.write(Reg::Timing, timing.timing | value::TIMEOUT_EN);
        } else {
            regs.write(Reg::Timing, timing.timing);
        }
        if self.caps.set_ltiming {
            regs.write(Reg::LTiming, timing.ltiming);
        }
        regs.write(Reg::Hs, timing.high_speed);
    }

    fn record(&self, regs: &Regs<'_, P::Bus>, status: Option<u16>) {
        let record = OpRecord::capture(
            regs,
            status.unwrap_or_else(|| self.irq_stat.load(Ordering::Relaxed)),
            status.is_none(),
            self.epoch.elapsed(),
        );
        self.history().record(record);
    }

    fn on_complete(
        &self,
        inner: &mut EngineInner<P>,
        regs: &Regs<'_, P::Bus>,
        t: &Transaction,
        msgs: &mut [I2cMsg<'_>],
        stat: u16,
    ) -> Result<(), TransferError> {
        self.set_state(TransferState::Completed);
        if stat == 0 {
            log::warn!("i2c{}: addr: {:x}, irq stat 0", self.config.id, t.addr);
            self.snapshot(regs).log();
        }

        match (t.path, t.read_msg()) {
            (I2cXferMode::Fifo, Some(idx)) => self.drain_fifo(regs, t, msgs, idx),
            (I2cXferMode::Dma, read) => {
                self.wait_dma_idle(inner, regs);
                if let Some(idx) = read {
                    copy_read_data(&inner.dma, msgs, idx)?;
                }
            }
            (I2cXferMode::Fifo, None) => {}
        }

        log::debug!("i2c{}: transfer done", self.config.id);
        Ok(())
    }

    fn drain_fifo(&self, regs: &Regs<'_, P::Bus>, t: &Transaction, msgs: &mut [I2cMsg<'_>], idx: usize) {
        // Secondary channels report the programmed length, not the FIFO fill.
        let count = if regs.ch_offset() != 0 {
            usize::from(if t.mode == OpMode::WriteRead {
                t.aux_len
            } else {
                t.msg_len
            })
        } else {
            usize::from((regs.read(Reg::FifoStat) >> fifo::RX_COUNT_SHIFT) & fifo::RX_COUNT_MASK)
        };

        if let Some(I2cMsg {
            payload: Payload::Read(buf),
            ..
        }) = msgs.get_mut(idx)
        {
            if count != buf.len() {
                log::warn!(
                    "i2c{}: fifo holds {count} bytes for a {} byte read",
                    self.config.id,
                    buf.len()
                );
            }
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = if i < count {
                    (regs.read(Reg::DataPort) & 0xff) as u8
                } else {
                    0
                };
            }
        }
    }

    fn on_timeout(&self, inner: &mut EngineInner<P>, regs: &Regs<'_, P::Bus>, t: &Transaction) -> TransferError {
        self.set_state(TransferState::TimedOut);
        log::error!("i2c{}: addr: {:x}, transfer timeout", self.config.id, t.addr);

        let start_reg = regs.read(Reg::Start);
        self.snapshot(regs).log();
        clear_fifo(regs);
        log::info!(
            "i2c{}: SLAVE_ADDR={:x} (shadow RG)",
            self.config.id,
            regs.shadow().read(Reg::SlaveAddr)
        );
        self.resync(inner, regs);

        if start_reg & start::TRANSAC_START != 0 {
            log::error!("i2c{}: bus tied low/high", self.config.id);
            TransferError::BusStuck
        } else {
            TransferError::Timeout
        }
    }

    fn on_remote_error(
        &self,
        inner: &mut EngineInner<P>,
        regs: &Regs<'_, P::Bus>,
        t: &Transaction,
        stat: u16,
        flags: ExtFlags,
    ) -> TransferError {
        self.set_state(TransferState::RemoteError);
        let fault = classify(stat);
        if fault == RemoteFault::SclTimeout {
            log::info!("i2c{}: addr: {:x}, scl timeout error", self.config.id, t.addr);
        } else if self.last_nack_addr.swap(t.addr, Ordering::Relaxed) != t.addr {
            log::info!("i2c{}: addr: {:x}, transfer {fault}", self.config.id, t.addr);
        } else {
            log::debug!("i2c{}: addr: {:x}, transfer {fault}", self.config.id, t.addr);
        }

        clear_fifo(regs);
        if !flags.contains(ExtFlags::FILTER_MSG) {
            self.snapshot(regs).log();
        }

        let latched = Intr::from_bits_retain(stat);
        let completed = latched.contains(Intr::TRANSAC_COMP)
            && regs.ch_offset() != 0
            && !latched.contains(Intr::MAS_ERR);
        self.resync(inner, regs);

        if completed {
            log::info!(
                "i2c{}: addr: {:x}, trans done with err {stat:x}",
                self.config.id,
                t.addr
            );
            TransferError::CompletedWithError
        } else {
            TransferError::RemoteError(fault)
        }
    }

    fn resync(&self, inner: &mut EngineInner<P>, regs: &Regs<'_, P::Bus>) {
        self.init_hw(inner);
        if regs.ch_offset() != 0 {
            regs.shadow().write(Reg::Start, start::RESUME_ARBIT);
        }
    }

    fn resync_if_flagged(&self, inner: &mut EngineInner<P>) {
        if self.needs_resync.swap(false, Ordering::AcqRel) {
            log::info!("i2c{}: resync after hardware-triggered ack error", self.config.id);
            self.init_hw(inner);
        }
    }

    /// Soft reset and reapply the static configuration through the shadow
    /// registers.
    fn init_hw(&self, inner: &mut EngineInner<P>) {
        let shadow = self.regs(0, self.dma_ch_offset.load(Ordering::Acquire));

        shadow.write(Reg::IntrMask, 0);
        let stat = shadow.read(Reg::IntrStat);
        shadow.write(Reg::IntrStat, stat);

        shadow.write(Reg::SoftReset, value::SOFT_RST);
        shadow.write(Reg::IoConfig, self.io_config(false));
        if self.config.have_dcm {
            shadow.write(Reg::DcmEn, value::DCM_DISABLE);
        }
        self.write_timing(&shadow, &inner.timing);

        shadow.dma_write(DmaReg::Rst, dma::WARM_RST);
        inner.delay.delay_us(RESYNC_SETTLE_US);
        if shadow.dma_read(DmaReg::En) != 0 {
            log::error!("i2c{}: DMA bus hang", self.config.id);
        }
    }

    fn wait_dma_idle(&self, inner: &mut EngineInner<P>, regs: &Regs<'_, P::Bus>) {
        if regs.dma_read(DmaReg::En) == 0 {
            return;
        }
        log::info!("i2c{}: wait AP DMA done", self.config.id);
        for _ in 0..POLL_TRIES {
            inner.delay.delay_ms(POLL_INTERVAL_MS);
            if regs.dma_read(DmaReg::En) == 0 {
                return;
            }
        }
        log::info!("i2c{}: complete with DMA still active", self.config.id);
        self.snapshot(regs).log();
    }

    /// Poll the start bit of `ch_offset` until the running transaction ends.
    fn wait_done(&self, inner: &mut EngineInner<P>, ch_offset: u16) {
        let regs = self.regs(ch_offset, self.dma_ch_offset.load(Ordering::Acquire));
        if regs.read(Reg::Start) & start::TRANSAC_START == 0 {
            return;
        }
        log::error!("i2c{}: wait transfer done before cg off", self.config.id);
        for _ in 0..POLL_TRIES {
            inner.delay.delay_ms(POLL_INTERVAL_MS);
            if regs.read(Reg::Start) & start::TRANSAC_START == 0 {
                return;
            }
        }
        log::error!("i2c{}: wait transfer timeout", self.config.id);
        self.snapshot(&regs).log();
    }

    /// Interrupt handler. Masks and acknowledges the controller interrupt
    /// and wakes the waiting transfer.
    pub fn handle_interrupt(&self) {
        let regs = self.regs(
            self.ch_offset.load(Ordering::Acquire),
            self.dma_ch_offset.load(Ordering::Acquire),
        );
        regs.write(Reg::IntrMask, 0);
        let stat = regs.read(Reg::IntrStat);
        regs.write(Reg::IntrStat, stat);
        self.irq_stat.store(stat, Ordering::Relaxed);

        if self.hw_trigger.load(Ordering::Acquire) {
            if Intr::from_bits_retain(stat).intersects(Intr::HS_NACKERR | Intr::ACKERR) {
                log::error!(
                    "i2c{}: addr: {:x}, transfer ACK error",
                    self.config.id,
                    self.last_addr.load(Ordering::Relaxed)
                );
                self.needs_resync.store(true, Ordering::Release);
            }
        } else {
            self.completion.signal(stat);
        }
    }

    fn require_buffer_mode(&self) -> Result<(), TransferError> {
        if self.config.buffer_mode {
            Ok(())
        } else {
            Err(TransferError::InvalidArgument)
        }
    }

    /// Arm hardware-triggered transfers. Holds a gate reference until
    /// [`Self::disable_hw_trigger`].
    ///
    /// # Errors
    ///
    /// [`TransferError::InvalidArgument`] outside buffer mode, or the gate
    /// failure.
    pub fn enable_hw_trigger(&self) -> Result<(), TransferError> {
        self.require_buffer_mode()?;
        let guard = self.gate.acquire_guard()?;
        let _inner = self.lock_inner();
        if !self.hw_trigger.swap(true, Ordering::AcqRel) {
            guard.keep();
        }
        Ok(())
    }

    /// Disarm hardware-triggered transfers, wait for the last one to end
    /// and drop the gate reference.
    ///
    /// # Errors
    ///
    /// [`TransferError::InvalidArgument`] outside buffer mode or when not
    /// armed.
    pub fn disable_hw_trigger(&self) -> Result<(), TransferError> {
        self.require_buffer_mode()?;
        let mut inner = self.lock_inner();
        if !self.hw_trigger.swap(false, Ordering::AcqRel) {
            return Err(TransferError::InvalidArgument);
        }
        self.resync_if_flagged(&mut inner);
        self.wait_done(&mut inner, 0);
        drop(inner);
        self.gate.release();
        Ok(())
    }

    /// Program `msgs` for an external hardware trigger. Returns once the
    /// controller is programmed.
    ///
    /// # Errors
    ///
    /// [`TransferError::InvalidArgument`] outside buffer mode or when not
    /// armed, otherwise as [`Self::transfer`].
    pub fn hw_trigger_transfer(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize, TransferError> {
        self.require_buffer_mode()?;
        let mut inner = self.lock_inner();
        if !self.hw_trigger.load(Ordering::Acquire) {
            log::warn!("i2c{}: hardware trigger not enabled", self.config.id);
            return Err(TransferError::InvalidArgument);
        }
        let opts = CallOptions {
            trigger: Trigger::ExternallyTriggered(TriggerSource::HwEvent),
            ..self.default_options()
        };
        self.run(&mut inner, msgs, opts)
    }

    /// Hand the bus to the camera co-processor on channel `ch_offset`.
    /// The gate stays held until [`Self::disable_ccu`].
    ///
    /// # Errors
    ///
    /// Gate failures, or an engine error while programming the channel.
    pub fn enable_ccu(&self, ch_offset: u16) -> Result<(), TransferError> {
        let guard = self.gate.acquire_guard()?;
        let ch = if ch_offset == 0 {
            log::info!("i2c{}: wrong channel offset for multi-channel", self.config.id);
            self.config.ccu_offset.unwrap_or(0)
        } else {
            ch_offset
        };

        let mut dummy = [0u8; 1];
        let mut msgs = [I2cMsg::read(CCU_DUMMY_ADDR, &mut dummy)];
        let opts = CallOptions {
            trigger: Trigger::ExternallyTriggered(TriggerSource::Ccu),
            ch_offset: ch,
            ..self.default_options()
        };
        {
            let mut inner = self.lock_inner();
            self.run(&mut inner, &mut msgs, opts)?;
        }

        self.ccu_channel.store(ch, Ordering::Relaxed);
        self.ccu_active.store(true, Ordering::Release);
        guard.keep();
        Ok(())
    }

    /// Take the bus back from the camera co-processor.
    ///
    /// # Errors
    ///
    /// [`TransferError::InvalidArgument`] if the co-processor does not hold
    /// the bus.
    pub fn disable_ccu(&self) -> Result<(), TransferError> {
        if !self.ccu_active.swap(false, Ordering::AcqRel) {
            return Err(TransferError::InvalidArgument);
        }
        let ch = self.ccu_channel.load(Ordering::Relaxed);
        {
            let mut inner = self.lock_inner();
            self.wait_done(&mut inner, ch);
        }
        self.gate.release();
        Ok(())
    }

    /// Power-management suspend hook.
    ///
    /// # Errors
    ///
    /// [`TransferError::Busy`] while any gate holder exists.
    pub fn suspend_prepare(&self) -> Result<(), TransferError> {
        self.gate.suspend_prepare().map_err(TransferError::from)
    }

    /// Power-management resume hook. Multi-channel controllers get rollback
    /// mode disabled and shadow multi-DMA mode re-enabled.
    pub fn resume(&self) {
        self.gate.resume();
        if self.config.ch_offset_default == 0 {
            return;
        }
        match self.gate.acquire_guard() {
            Ok(_gate) => {
                let shadow = self.regs(0, self.config.dma_ch_offset_default);
                shadow.write(Reg::Rollback, 0);
                shadow.write(Reg::MultiDma, value::SHADOW_REG_MODE);
            }
            Err(e) => log::info!("i2c{}: resume enable clock failed: {e}", self.config.id),
        }
    }

    fn snapshot(&self, regs: &Regs<'_, P::Bus>) -> StatusSnapshot {
        let history = self.history();
        StatusSnapshot {
            id: self.config.id,
            speed_hz: self.speed_hz.load(Ordering::Relaxed),
            state: self.state(),
            irq_stat: self.irq_stat.load(Ordering::Relaxed),
            gate_holders: self.gate.holders(),
            ch_offset: regs.ch_offset(),
            ch_offset_default: self.config.ch_offset_default,
            registers: RegisterSnapshot::capture(regs),
            ccu_registers: self
                .config
                .ccu_offset
                .filter(|off| *off != 0)
                .map(|off| RegisterSnapshot::capture(&regs.at_channel(off))),
            dma: DmaSnapshot::capture(regs),
            dma_before_start: history.last_dma(),
            history: if self.config.buffer_mode {
                Vec::new()
            } else {
                history.newest_first()
            },
        }
    }

    /// Gate the clocks on, capture and log registers, DMA state and the
    /// history ring, then gate them off. Transfer state is left untouched.
    pub fn dump_status(&self) -> StatusSnapshot {
        let guard = self.gate.acquire_guard();
        if let Err(e) = &guard {
            log::warn!("i2c{}: dump without clocks: {e}", self.config.id);
        }
        let regs = self.regs(
            self.ch_offset.load(Ordering::Acquire),
            self.dma_ch_offset.load(Ordering::Acquire),
        );
        let snapshot = self.snapshot(&regs);
        snapshot.log();
        drop(guard);
        snapshot
    }
}

impl<P: I2cPlatform> I2cMaster for MtI2c<P> {
    type Error = TransferError;

    fn transfer(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize, TransferError> {
        MtI2c::transfer(self, msgs)
    }

    fn transfer_with_extension(
        &self,
        msgs: &mut [I2cMsg<'_>],
        flags: ExtFlags,
        override_speed_hz: u32,
    ) -> Result<usize, TransferError> {
        MtI2c::transfer_with_extension(self, msgs, flags, override_speed_hz)
    }

    fn should_retry(error: &TransferError) -> bool {
        matches!(error, TransferError::Busy | TransferError::Timeout)
    }
}

fn classify(stat: u16) -> RemoteFault {
    let stat = Intr::from_bits_retain(stat);
    if stat.contains(Intr::TIMEOUT) {
        RemoteFault::SclTimeout
    } else if stat.contains(Intr::MAS_ERR) {
        RemoteFault::MasterError
    } else if stat.contains(Intr::HS_NACKERR) {
        RemoteFault::HsNack
    } else if stat.contains(Intr::ACKERR) {
        RemoteFault::Nack
    } else {
        RemoteFault::ArbitrationLost
    }
}

fn clear_fifo<B: crate::i2c::traits::RegisterBus>(regs: &Regs<'_, B>) {
    if regs.ch_offset() != 0 {
        regs.write(Reg::FifoAddrClr, fifo::ADDR_CLR_MCH | fifo::ADDR_CLR);
    } else {
        regs.write(Reg::FifoAddrClr, fifo::ADDR_CLR);
    }
}

/// Messages whose payload goes out in the primary direction.
fn write_msgs<'m, 'a>(t: &Transaction, msgs: &'m [I2cMsg<'a>]) -> impl Iterator<Item = &'m I2cMsg<'a>> {
    let count = match t.mode {
        OpMode::WriteRead => 1,
        OpMode::Read => 0,
        OpMode::Write | OpMode::MultiWrite => t.msg_count,
    };
    msgs.iter().skip(t.first_msg).take(count)
}

fn stage_writes<D: DmaRegion>(dma: &mut D, t: &Transaction, msgs: &[I2cMsg<'_>]) -> Result<(), TransferError> {
    let mut offset = 0;
    for msg in write_msgs(t, msgs) {
        if let Payload::Write(data) = &msg.payload {
            dma.copy_in(offset, data)
                .map_err(|_| TransferError::InvalidArgument)?;
            offset += data.len();
        }
    }
    Ok(())
}

fn copy_read_data<D: DmaRegion>(dma: &D, msgs: &mut [I2cMsg<'_>], idx: usize) -> Result<(), TransferError> {
    if let Some(I2cMsg {
        payload: Payload::Read(buf),
        ..
    }) = msgs.get_mut(idx)
    {
        dma.copy_out(0, buf)
            .map_err(|_| TransferError::InvalidArgument)?;
    }
    Ok(())
}
