// Licensed under the Apache-2.0 license

//! Simulated controller, clocks, semaphore and DMA memory for unit tests.
//!
//! [`MockBus`] keeps a register file and reacts to the start bit the way
//! the controller would: it moves data through the FIFO or the shared DMA
//! memory, latches an interrupt status and calls the registered interrupt
//! handler synchronously. Each start consumes one scripted [`Behaviour`].

use crate::i2c::common::{I2cConfig, I2cConfigBuilder};
use crate::i2c::compat::{lookup, HwRevision};
use crate::i2c::engine::MtI2c;
use crate::i2c::registers::{dma, fifo, start, value, Control, DmaReg, Intr, Reg};
use crate::i2c::system_setup::{I2cSystemSetup, PlatformParts};
use crate::i2c::traits::{
    ClockControl, ClockId, DmaRangeError, DmaRegion, HwSemaphore, I2cPlatform, RegisterBus,
    SemaphoreToken,
};
use embedded_hal::delay::DelayNs;
use fugit::ExtU32;
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

pub const MAIN_CLOCK_HZ: u32 = 10_000_000;
pub const PMIC_CLOCK_HZ: u32 = 26_000_000;
pub const DMA_PHYS_ADDR: u64 = 0x1_4000_0000;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Reaction to one start bit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Behaviour {
    Complete,
    Nack,
    /// Target NACKed after the controller already flagged completion.
    NackAfterComplete,
    ArbitrationLost,
    /// Interrupt with an empty status register.
    ZeroStatus,
    /// No interrupt. The bus stays wedged until a soft reset.
    NeverFire { start_stays_set: bool },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Context {
    Thread(ThreadId),
    Irq,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegWrite {
    pub ctx: Context,
    pub offset: u16,
    pub value: u32,
    pub dma: bool,
}

/// What went over the wire for one start.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WireTransaction {
    pub addr: u16,
    pub written: Vec<u8>,
    pub read_len: usize,
}

thread_local! {
    static IN_IRQ: Cell<bool> = const { Cell::new(false) };
}

type IrqHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct BusState {
    regs: HashMap<u16, u16>,
    dma_regs: HashMap<u16, u32>,
    writes: Vec<RegWrite>,
    script: VecDeque<Behaviour>,
    wedged: bool,
    fifo_tx: Vec<u8>,
    fifo_rx: VecDeque<u8>,
    read_data: Vec<u8>,
    short_read: Option<usize>,
    wire: Vec<WireTransaction>,
}

struct Shared {
    revision: HwRevision,
    ch: u16,
    dma_ch: u16,
    state: Mutex<BusState>,
    irq: Mutex<Option<IrqHandler>>,
    mem: Arc<Mutex<Vec<u8>>>,
}

#[derive(Clone)]
pub struct MockBus(Arc<Shared>);

impl MockBus {
    fn new(revision: HwRevision, ch: u16, dma_ch: u16, mem: Arc<Mutex<Vec<u8>>>) -> Self {
        Self(Arc::new(Shared {
            revision,
            ch,
            dma_ch,
            state: Mutex::new(BusState::default()),
            irq: Mutex::new(None),
            mem,
        }))
    }

    fn at(&self, ch: u16, reg: Reg) -> Option<u16> {
        reg.offset(self.0.revision).map(|off| ch + off)
    }

    fn is(&self, offset: u16, reg: Reg) -> bool {
        self.at(self.0.ch, reg) == Some(offset)
    }

    fn dma_at(&self, reg: DmaReg) -> u16 {
        self.0.dma_ch + reg as u16
    }

    pub fn set_irq_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.0.irq.lock().unwrap() = Some(Arc::new(handler));
    }

    pub fn script(&self, behaviours: impl IntoIterator<Item = Behaviour>) {
        self.0.state.lock().unwrap().script.extend(behaviours);
    }

    /// Bytes targets return, cycled from the start for every read.
    pub fn set_read_data(&self, data: &[u8]) {
        self.0.state.lock().unwrap().read_data = data.to_vec();
    }

    /// Make the next FIFO read deliver only `len` bytes.
    pub fn short_read(&self, len: usize) {
        self.0.state.lock().unwrap().short_read = Some(len);
    }

    pub fn clear_log(&self) {
        let mut st = self.0.state.lock().unwrap();
        st.writes.clear();
        st.wire.clear();
    }

    pub fn writes(&self) -> Vec<RegWrite> {
        self.0.state.lock().unwrap().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.0.state.lock().unwrap().writes.len()
    }

    pub fn wire(&self) -> Vec<WireTransaction> {
        self.0.state.lock().unwrap().wire.clone()
    }

    /// Start-bit writes on the active channel.
    pub fn start_count(&self) -> usize {
        self.writes()
            .iter()
            .filter(|w| {
                !w.dma
                    && self.is(w.offset, Reg::Start)
                    && w.value & u32::from(start::TRANSAC_START) != 0
            })
            .count()
    }

    pub fn soft_resets(&self) -> usize {
        let shadow = self.at(0, Reg::SoftReset);
        let channel = self.at(self.0.ch, Reg::SoftReset);
        self.writes()
            .iter()
            .filter(|w| !w.dma && (Some(w.offset) == shadow || Some(w.offset) == channel))
            .count()
    }

    /// Last value written to `reg` on the active channel.
    pub fn last_write(&self, reg: Reg) -> Option<u16> {
        let offset = self.at(self.0.ch, reg)?;
        self.writes()
            .iter()
            .rev()
            .find(|w| !w.dma && w.offset == offset)
            .map(|w| w.value as u16)
    }

    /// Last value written to `reg` through the shadow registers.
    pub fn last_shadow_write(&self, reg: Reg) -> Option<u16> {
        let offset = self.at(0, reg)?;
        self.writes()
            .iter()
            .rev()
            .find(|w| !w.dma && w.offset == offset)
            .map(|w| w.value as u16)
    }

    pub fn last_dma_write(&self, reg: DmaReg) -> Option<u32> {
        let offset = self.dma_at(reg);
        self.writes()
            .iter()
            .rev()
            .find(|w| w.dma && w.offset == offset)
            .map(|w| w.value)
    }

    /// Latch `stat` and run the interrupt handler, as an externally
    /// triggered transaction would.
    pub fn raise_interrupt(&self, stat: u16) {
        {
            let mut st = self.0.state.lock().unwrap();
            self.set_reg(&mut st, Reg::IntrStat, stat);
        }
        self.fire();
    }

    fn fire(&self) {
        let handler = self.0.irq.lock().unwrap().clone();
        if let Some(handler) = handler {
            IN_IRQ.set(true);
            handler();
            IN_IRQ.set(false);
        }
    }

    pub fn reg_value(&self, reg: Reg) -> u16 {
        let st = self.0.state.lock().unwrap();
        self.at(self.0.ch, reg)
            .and_then(|off| st.regs.get(&off).copied())
            .unwrap_or(0)
    }

    fn reg(&self, st: &BusState, reg: Reg) -> u16 {
        self.at(self.0.ch, reg)
            .and_then(|off| st.regs.get(&off).copied())
            .unwrap_or(0)
    }

    fn set_reg(&self, st: &mut BusState, reg: Reg, value: u16) {
        if let Some(off) = self.at(self.0.ch, reg) {
            st.regs.insert(off, value);
        }
    }

    /// Run one transaction; `true` when the interrupt fires.
    fn on_start(&self, st: &mut BusState) -> bool {
        let behaviour = if st.wedged {
            Behaviour::NeverFire {
                start_stays_set: true,
            }
        } else {
            st.script.pop_front().unwrap_or(Behaviour::Complete)
        };

        let stat = match behaviour {
            Behaviour::NeverFire { start_stays_set } => {
                st.wedged = true;
                self.set_reg(st, Reg::Start, u16::from(start_stays_set));
                return false;
            }
            Behaviour::Complete => {
                self.move_data(st);
                Intr::TRANSAC_COMP.bits()
            }
            Behaviour::Nack => Intr::ACKERR.bits(),
            Behaviour::NackAfterComplete => (Intr::ACKERR | Intr::TRANSAC_COMP).bits(),
            Behaviour::ArbitrationLost => Intr::ARB_LOST.bits(),
            Behaviour::ZeroStatus => {
                self.move_data(st);
                0
            }
        };

        self.set_reg(st, Reg::IntrStat, stat);
        self.set_reg(st, Reg::Start, 0);
        st.dma_regs.insert(self.dma_at(DmaReg::En), 0);
        true
    }

    fn move_data(&self, st: &mut BusState) {
        let control = Control::from_bits_retain(self.reg(st, Reg::Control));
        let slave = self.reg(st, Reg::SlaveAddr);
        let dma_on = control.contains(Control::DMA_EN);
        let wrrd = control.contains(Control::DIR_CHANGE);
        let read_only = slave & 1 != 0;

        let read_len = if wrrd {
            usize::from(self.reg(st, Reg::TransferLenAux))
        } else if read_only {
            usize::from(self.reg(st, Reg::TransferLen))
        } else {
            0
        };

        let written = if read_only {
            Vec::new()
        } else if dma_on {
            let tx_len = st
                .dma_regs
                .get(&self.dma_at(DmaReg::TxLen))
                .copied()
                .unwrap_or(0) as usize;
            self.0.mem.lock().unwrap()[..tx_len].to_vec()
        } else {
            std::mem::take(&mut st.fifo_tx)
        };

        let data: Vec<u8> = (0..read_len)
            .map(|i| match st.read_data.len() {
                0 => i as u8,
                n => st.read_data[i % n],
            })
            .collect();
        if read_len > 0 {
            if dma_on {
                self.0.mem.lock().unwrap()[..read_len].copy_from_slice(&data);
            } else {
                let delivered = st.short_read.take().map_or(read_len, |n| n.min(read_len));
                st.fifo_rx = data.into_iter().take(delivered).collect();
                let count = (delivered.min(0xf) as u16) << fifo::RX_COUNT_SHIFT;
                self.set_reg(st, Reg::FifoStat, count);
            }
        }

        st.wire.push(WireTransaction {
            addr: slave >> 1,
            written,
            read_len,
        });
    }
}

impl RegisterBus for MockBus {
    fn read16(&self, offset: u16) -> u16 {
        let mut st = self.0.state.lock().unwrap();
        if self.is(offset, Reg::DataPort) {
            return st.fifo_rx.pop_front().map_or(0, u16::from);
        }
        st.regs.get(&offset).copied().unwrap_or(0)
    }

    fn write16(&self, offset: u16, data: u16) {
        let ctx = if IN_IRQ.get() {
            Context::Irq
        } else {
            Context::Thread(thread::current().id())
        };
        let fire = {
            let mut st = self.0.state.lock().unwrap();
            st.writes.push(RegWrite {
                ctx,
                offset,
                value: u32::from(data),
                dma: false,
            });

            if self.is(offset, Reg::IntrStat) {
                let latched = st.regs.entry(offset).or_insert(0);
                *latched &= !data;
                false
            } else if self.is(offset, Reg::DataPort) {
                st.fifo_tx.push(data as u8);
                false
            } else if self.is(offset, Reg::FifoAddrClr) {
                st.fifo_tx.clear();
                false
            } else if self.at(0, Reg::SoftReset) == Some(offset) || self.is(offset, Reg::SoftReset) {
                st.regs.insert(offset, data);
                if data & value::SOFT_RST != 0 {
                    st.wedged = false;
                    self.set_reg(&mut st, Reg::Start, 0);
                }
                false
            } else if self.is(offset, Reg::Start) && data & start::TRANSAC_START != 0 {
                st.regs.insert(offset, data);
                self.on_start(&mut st)
            } else {
                st.regs.insert(offset, data);
                false
            }
        };

        if fire {
            self.fire();
        }
    }

    fn dma_read32(&self, offset: u16) -> u32 {
        let st = self.0.state.lock().unwrap();
        st.dma_regs.get(&offset).copied().unwrap_or(0)
    }

    fn dma_write32(&self, offset: u16, value: u32) {
        let ctx = if IN_IRQ.get() {
            Context::Irq
        } else {
            Context::Thread(thread::current().id())
        };
        let mut st = self.0.state.lock().unwrap();
        st.writes.push(RegWrite {
            ctx,
            offset,
            value,
            dma: true,
        });
        if offset == self.dma_at(DmaReg::Rst) && value == dma::HARD_RST {
            st.dma_regs.insert(self.dma_at(DmaReg::En), 0);
        }
        st.dma_regs.insert(offset, value);
    }
}

/// Per-clock enable counts.
#[derive(Clone, Default)]
pub struct MockClocks {
    enabled: Arc<Mutex<HashMap<ClockId, i32>>>,
    fail: Arc<AtomicBool>,
}

impl MockClocks {
    pub fn fail_enable(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Clocks currently enabled at least once.
    pub fn enabled_now(&self) -> usize {
        self.enabled
            .lock()
            .unwrap()
            .values()
            .filter(|n| **n > 0)
            .count()
    }
}

impl ClockControl for MockClocks {
    type Error = ();

    fn enable(&self, clock: ClockId) -> Result<(), ()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(());
        }
        *self.enabled.lock().unwrap().entry(clock).or_insert(0) += 1;
        Ok(())
    }

    fn disable(&self, clock: ClockId) {
        *self.enabled.lock().unwrap().entry(clock).or_insert(0) -= 1;
    }

    fn rate_hz(&self, clock: ClockId) -> u32 {
        match clock {
            ClockId::Pmic => PMIC_CLOCK_HZ,
            _ => MAIN_CLOCK_HZ,
        }
    }
}

#[derive(Clone, Default)]
pub struct MockSemaphore {
    refuse: Arc<AtomicBool>,
    refuse_release: Arc<AtomicBool>,
    held: Arc<AtomicU32>,
}

impl MockSemaphore {
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn refuse_release(&self, refuse: bool) {
        self.refuse_release.store(refuse, Ordering::SeqCst);
    }

    pub fn held(&self) -> u32 {
        self.held.load(Ordering::SeqCst)
    }
}

impl HwSemaphore for MockSemaphore {
    fn try_acquire(&self, _token: SemaphoreToken) -> bool {
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        self.held.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn release(&self, _token: SemaphoreToken) -> bool {
        if self.refuse_release.load(Ordering::SeqCst) {
            return false;
        }
        self.held.fetch_sub(1, Ordering::SeqCst);
        true
    }
}

#[derive(Default)]
pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Bounce buffer shared with [`MockBus`].
pub struct MockDma {
    mem: Arc<Mutex<Vec<u8>>>,
}

impl DmaRegion for MockDma {
    fn phys_addr(&self) -> u64 {
        DMA_PHYS_ADDR
    }

    fn len(&self) -> usize {
        self.mem.lock().unwrap().len()
    }

    fn copy_in(&mut self, offset: usize, data: &[u8]) -> Result<(), DmaRangeError> {
        let mut mem = self.mem.lock().unwrap();
        mem.get_mut(offset..offset + data.len())
            .ok_or(DmaRangeError)?
            .copy_from_slice(data);
        Ok(())
    }

    fn copy_out(&self, offset: usize, out: &mut [u8]) -> Result<(), DmaRangeError> {
        let mem = self.mem.lock().unwrap();
        out.copy_from_slice(mem.get(offset..offset + out.len()).ok_or(DmaRangeError)?);
        Ok(())
    }
}

pub struct MockPlatform;

impl I2cPlatform for MockPlatform {
    type Bus = MockBus;
    type Clocks = MockClocks;
    type Semaphore = MockSemaphore;
    type Delay = NoopDelay;
    type Dma = MockDma;
}

/// Test-side handles onto the services moved into a controller.
#[derive(Clone)]
pub struct Handles {
    pub bus: MockBus,
    pub clocks: MockClocks,
    pub semaphore: MockSemaphore,
}

pub fn platform_parts(
    revision: HwRevision,
    ch_offset: u16,
    dma_ch_offset: u16,
    dma_len: usize,
) -> (PlatformParts<MockPlatform>, Handles) {
    init_logger();
    let mem = Arc::new(Mutex::new(vec![0u8; dma_len]));
    let bus = MockBus::new(revision, ch_offset, dma_ch_offset, Arc::clone(&mem));
    let clocks = MockClocks::default();
    let semaphore = MockSemaphore::default();
    let parts = PlatformParts {
        bus: bus.clone(),
        clocks: clocks.clone(),
        semaphore: semaphore.clone(),
        delay: NoopDelay,
        dma: MockDma { mem },
    };
    (
        parts,
        Handles {
            bus,
            clocks,
            semaphore,
        },
    )
}

/// Configuration used by most tests: bus 2, 50 ms completion budget.
pub fn config() -> I2cConfigBuilder {
    I2cConfigBuilder::new().id(2).timeout(50.millis())
}

/// Attach a controller on the simulated bus with its interrupt wired up and
/// the attach-time writes cleared from the log.
pub fn attach(compatible: &str, config: I2cConfig) -> (Arc<MtI2c<MockPlatform>>, Handles) {
    let revision = lookup(compatible).unwrap().revision;
    let (parts, handles) = platform_parts(
        revision,
        config.ch_offset_default,
        config.dma_ch_offset_default,
        I2cSystemSetup::required_dma_len(&config),
    );
    let controller = Arc::new(I2cSystemSetup::attach(compatible, config, parts).unwrap());
    let weak = Arc::downgrade(&controller);
    handles.bus.set_irq_handler(move || {
        if let Some(controller) = weak.upgrade() {
            controller.handle_interrupt();
        }
    });
    handles.bus.clear_log();
    (controller, handles)
}
