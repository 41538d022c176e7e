// Licensed under the Apache-2.0 license

//! Register snapshots and the recent-transfer history used for postmortem
//! dumps.

use crate::i2c::registers::{DmaReg, Reg, Regs};
use crate::i2c::traits::RegisterBus;
use heapless::HistoryBuffer;
use std::time::Duration;

/// Number of transfers kept in the history ring.
pub const RECORD_LEN: usize = 10;

/// State of the controller right after one transaction ended.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OpRecord {
    pub slave_addr: u16,
    pub intr_stat: u16,
    pub control: u16,
    pub fifo_stat: u16,
    pub debug_stat: u16,
    pub timed_out: bool,
    /// Time since the controller was attached.
    pub end_time: Duration,
}

impl OpRecord {
    pub(crate) fn capture<B: RegisterBus>(
        regs: &Regs<'_, B>,
        intr_stat: u16,
        timed_out: bool,
        end_time: Duration,
    ) -> Self {
        Self {
            slave_addr: regs.read(Reg::SlaveAddr),
            intr_stat,
            control: regs.read(Reg::Control),
            fifo_stat: regs.read(Reg::FifoStat),
            debug_stat: regs.read(Reg::DebugStat),
            timed_out,
            end_time,
        }
    }
}

/// DMA channel registers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DmaSnapshot {
    pub int_flag: u32,
    pub int_en: u32,
    pub en: u32,
    pub rst: u32,
    pub stop: u32,
    pub flush: u32,
    pub con: u32,
    pub tx_mem_addr: u32,
    pub rx_mem_addr: u32,
    pub tx_len: u32,
    pub rx_len: u32,
    pub int_buf_size: u32,
    pub debug_sta: u32,
    pub tx_mem_addr2: u32,
    pub rx_mem_addr2: u32,
}

impl DmaSnapshot {
    pub(crate) fn capture<B: RegisterBus>(regs: &Regs<'_, B>) -> Self {
        Self {
            int_flag: regs.dma_read(DmaReg::IntFlag),
            int_en: regs.dma_read(DmaReg::IntEn),
            en: regs.dma_read(DmaReg::En),
            rst: regs.dma_read(DmaReg::Rst),
            stop: regs.dma_read(DmaReg::Stop),
            flush: regs.dma_read(DmaReg::Flush),
            con: regs.dma_read(DmaReg::Con),
            tx_mem_addr: regs.dma_read(DmaReg::TxMemAddr),
            rx_mem_addr: regs.dma_read(DmaReg::RxMemAddr),
            tx_len: regs.dma_read(DmaReg::TxLen),
            rx_len: regs.dma_read(DmaReg::RxLen),
            int_buf_size: regs.dma_read(DmaReg::IntBufSize),
            debug_sta: regs.dma_read(DmaReg::DebugSta),
            tx_mem_addr2: regs.dma_read(DmaReg::TxMemAddr2),
            rx_mem_addr2: regs.dma_read(DmaReg::RxMemAddr2),
        }
    }
}

/// Controller registers of one channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub slave_addr: u16,
    pub intr_mask: u16,
    pub intr_stat: u16,
    pub control: u16,
    pub transfer_len: u16,
    pub transac_len: u16,
    pub delay_len: u16,
    pub timing: u16,
    pub ltiming: u16,
    pub start: u16,
    pub fifo_stat: u16,
    pub io_config: u16,
    pub hs: u16,
    pub dcm_en: u16,
    pub debug_stat: u16,
    pub ext_conf: u16,
    pub transfer_len_aux: u16,
}

impl RegisterSnapshot {
    pub(crate) fn capture<B: RegisterBus>(regs: &Regs<'_, B>) -> Self {
        Self {
            slave_addr: regs.read(Reg::SlaveAddr),
            intr_mask: regs.read(Reg::IntrMask),
            intr_stat: regs.read(Reg::IntrStat),
            control: regs.read(Reg::Control),
            transfer_len: regs.read(Reg::TransferLen),
            transac_len: regs.read(Reg::TransacLen),
            delay_len: regs.read(Reg::DelayLen),
            timing: regs.read(Reg::Timing),
            ltiming: regs.read(Reg::LTiming),
            start: regs.read(Reg::Start),
            fifo_stat: regs.read(Reg::FifoStat),
            io_config: regs.read(Reg::IoConfig),
            hs: regs.read(Reg::Hs),
            dcm_en: regs.read(Reg::DcmEn),
            debug_stat: regs.read(Reg::DebugStat),
            ext_conf: regs.read(Reg::ExtConf),
            transfer_len_aux: regs.read(Reg::TransferLenAux),
        }
    }
}

/// History ring plus the DMA programming of the last DMA transaction.
pub struct History {
    records: HistoryBuffer<OpRecord, RECORD_LEN>,
    last_dma: Option<DmaSnapshot>,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: HistoryBuffer::new(),
            last_dma: None,
        }
    }

    pub fn record(&mut self, record: OpRecord) {
        self.records.write(record);
    }

    pub fn record_dma(&mut self, snapshot: DmaSnapshot) {
        self.last_dma = Some(snapshot);
    }

    /// Records, newest first.
    #[must_use]
    pub fn newest_first(&self) -> Vec<OpRecord> {
        let mut records: Vec<_> = self.records.oldest_ordered().copied().collect();
        records.reverse();
        records
    }

    #[must_use]
    pub fn last_dma(&self) -> Option<DmaSnapshot> {
        self.last_dma
    }
}

/// Everything `dump_status` reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub id: u16,
    pub speed_hz: u32,
    pub state: crate::i2c::engine::TransferState,
    pub irq_stat: u16,
    pub gate_holders: u32,
    pub ch_offset: u16,
    pub ch_offset_default: u16,
    pub registers: RegisterSnapshot,
    /// Camera co-processor channel, when configured.
    pub ccu_registers: Option<RegisterSnapshot>,
    pub dma: DmaSnapshot,
    /// DMA registers as programmed before the last DMA start.
    pub dma_before_start: Option<DmaSnapshot>,
    /// Newest first; empty in buffer mode.
    pub history: Vec<OpRecord>,
}

impl StatusSnapshot {
    /// Emit the snapshot through the `log` facade at error level.
    pub fn log(&self) {
        let r = &self.registers;
        log::error!(
            "i2c{} state={:?} irq_stat={:#x} speed={} cg_cnt={} ch_offset={:#x} ch_offset_default={:#x}",
            self.id,
            self.state,
            self.irq_stat,
            self.speed_hz,
            self.gate_holders,
            self.ch_offset,
            self.ch_offset_default
        );
        log::error!(
            "SLAVE_ADDR={:x},INTR_MASK={:x},INTR_STAT={:x},CONTROL={:x},TRANSFER_LEN={:x}",
            r.slave_addr,
            r.intr_mask,
            r.intr_stat,
            r.control,
            r.transfer_len
        );
        log::error!(
            "TRANSAC_LEN={:x},DELAY_LEN={:x},TIMING={:x},LTIMING={:x},START={:x},FIFO_STAT={:x}",
            r.transac_len,
            r.delay_len,
            r.timing,
            r.ltiming,
            r.start,
            r.fifo_stat
        );
        log::error!(
            "IO_CONFIG={:x},HS={:x},DCM_EN={:x},DEBUGSTAT={:x},EXT_CONF={:x},TRANSFER_LEN_AUX={:x}",
            r.io_config,
            r.hs,
            r.dcm_en,
            r.debug_stat,
            r.ext_conf,
            r.transfer_len_aux
        );
        if let Some(before) = &self.dma_before_start {
            log::error!("before enable DMA register: {before:x?}");
        }
        log::error!("DMA register: {:x?}", self.dma);
        if let Some(ccu) = &self.ccu_registers {
            log::error!("I2C CCU register: {ccu:x?}");
        }
        for (n, rec) in self.history.iter().enumerate() {
            log::error!(
                "[{n:02}] [{}.{:06}] SLAVE_ADDR={:x},INTR_STAT={:x},CONTROL={:x},FIFO_STAT={:x},DEBUGSTAT={:x}, tmo={}",
                rec.end_time.as_secs(),
                rec.end_time.subsec_micros(),
                rec.slave_addr,
                rec.intr_stat,
                rec.control,
                rec.fifo_stat,
                rec.debug_stat,
                rec.timed_out
            );
        }
    }
}
