// Licensed under the Apache-2.0 license

//! Message descriptors and the per-call transmission plan.
//!
//! A call's messages are validated and folded into transactions in one
//! pass, before the controller is touched:
//!
//! * a write followed by a read of the same target becomes one
//!   repeated-start [`OpMode::WriteRead`] transaction,
//! * consecutive equal-length writes to the same target become one
//!   [`OpMode::MultiWrite`] transaction,
//! * everything else is a single [`OpMode::Write`] or [`OpMode::Read`].
//!
//! Combining wins over batching: a write that can pair with the read after
//! it is never absorbed into a batch.

use crate::i2c::common::I2cXferMode;
use crate::i2c::error::TransferError;
use crate::i2c::registers::fifo;
use crate::i2c::timing::TimingRegisters;

/// Largest payload one message may carry.
pub const MAX_TRANSFER_LEN: usize = 65535;
/// A read longer than this is never combined with the preceding write.
pub const MAX_COMBINED_READ_LEN: usize = 4096;
/// Most segments one batch may hold; `TRANSAC_LEN` is 16 bits wide.
pub const MAX_BATCH_LEN: usize = u16::MAX as usize;

bitflags::bitflags! {
    /// Per-call extension flags.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ExtFlags: u32 {
        /// Suppress the diagnostics dump on remote errors.
        const FILTER_MSG = 1 << 0;
    }
}

/// Direction and data of one message.
#[derive(Debug, PartialEq, Eq)]
pub enum Payload<'a> {
    Write(&'a [u8]),
    Read(&'a mut [u8]),
}

/// One I2C message. The driver copies data in and out during the call and
/// keeps no reference afterwards.
#[derive(Debug, PartialEq, Eq)]
pub struct I2cMsg<'a> {
    pub addr: u16,
    pub ten_bit: bool,
    pub payload: Payload<'a>,
}

impl<'a> I2cMsg<'a> {
    #[must_use]
    pub fn write(addr: u16, data: &'a [u8]) -> Self {
        Self {
            addr,
            ten_bit: false,
            payload: Payload::Write(data),
        }
    }

    #[must_use]
    pub fn read(addr: u16, buf: &'a mut [u8]) -> Self {
        Self {
            addr,
            ten_bit: false,
            payload: Payload::Read(buf),
        }
    }

    /// Mark the address as 10-bit.
    #[must_use]
    pub fn ten_bit(mut self) -> Self {
        self.ten_bit = true;
        self
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self.payload, Payload::Read(_))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Write(data) => data.len(),
            Payload::Read(buf) => buf.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn same_target(&self, other: &Self) -> bool {
        self.addr == other.addr && self.ten_bit == other.ten_bit
    }
}

/// Controller operation for one transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpMode {
    Write,
    Read,
    WriteRead,
    MultiWrite,
}

/// One hardware transaction folded from one or more messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub mode: OpMode,
    pub addr: u16,
    /// Index of the first message folded into this transaction.
    pub first_msg: usize,
    pub msg_count: usize,
    /// Segment length: the message length, or each batched write's length.
    pub msg_len: u16,
    /// Read length of a write-read; zero otherwise.
    pub aux_len: u16,
    /// Bytes moved in the primary direction (all segments of a batch).
    pub total_len: usize,
    pub path: I2cXferMode,
}

impl Transaction {
    /// Value for `TRANSAC_LEN`.
    #[must_use]
    pub fn transac_count(&self) -> u16 {
        match self.mode {
            OpMode::WriteRead => 2,
            // build_plan caps batches at MAX_BATCH_LEN.
            OpMode::MultiWrite => u16::try_from(self.msg_count).unwrap_or(u16::MAX),
            OpMode::Write | OpMode::Read => 1,
        }
    }

    /// Index of the message that receives read data, if any.
    #[must_use]
    pub fn read_msg(&self) -> Option<usize> {
        match self.mode {
            OpMode::Read => Some(self.first_msg),
            OpMode::WriteRead => Some(self.first_msg + 1),
            OpMode::Write | OpMode::MultiWrite => None,
        }
    }

    fn new(mode: OpMode, addr: u16, first_msg: usize, msg_count: usize, msg_len: usize, aux_len: usize) -> Self {
        let total_len = if mode == OpMode::MultiWrite {
            msg_len * msg_count
        } else {
            msg_len
        };
        let path = if total_len > fifo::DEPTH || aux_len > fifo::DEPTH {
            I2cXferMode::Dma
        } else {
            I2cXferMode::Fifo
        };
        // Lengths were checked against MAX_TRANSFER_LEN.
        Self {
            mode,
            addr,
            first_msg,
            msg_count,
            msg_len: u16::try_from(msg_len).unwrap_or(u16::MAX),
            aux_len: u16::try_from(aux_len).unwrap_or(u16::MAX),
            total_len,
            path,
        }
    }
}

/// Everything decided for one call before the controller is programmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransmissionPlan {
    pub transactions: Vec<Transaction>,
    pub timing: TimingRegisters,
    pub speed_hz: u32,
}

impl TransmissionPlan {
    /// Validate and fold `msgs`; `timing` is the register set for `speed_hz`.
    ///
    /// # Errors
    ///
    /// See [`build_plan`].
    pub fn new(
        msgs: &[I2cMsg<'_>],
        dma_capacity: usize,
        timing: TimingRegisters,
        speed_hz: u32,
    ) -> Result<Self, TransferError> {
        Ok(Self {
            transactions: build_plan(msgs, dma_capacity)?,
            timing,
            speed_hz,
        })
    }
}

fn validate(msg: &I2cMsg<'_>, dma_capacity: usize) -> Result<(), TransferError> {
    let addr_limit = if msg.ten_bit { 0x3ff } else { 0x7f };
    if msg.addr == 0 || msg.addr > addr_limit {
        log::debug!("addr {:#x} is invalid", msg.addr);
        return Err(TransferError::InvalidArgument);
    }
    if msg.is_empty() {
        log::debug!("data buffer is empty");
        return Err(TransferError::InvalidArgument);
    }
    if msg.len() > MAX_TRANSFER_LEN || msg.len() > dma_capacity {
        log::debug!("message data length {} is too long", msg.len());
        return Err(TransferError::InvalidArgument);
    }
    Ok(())
}

fn should_combine(msg: &I2cMsg<'_>, next: &I2cMsg<'_>) -> bool {
    !msg.is_read() && next.is_read() && msg.same_target(next) && next.len() < MAX_COMBINED_READ_LEN
}

fn should_batch(prev: &I2cMsg<'_>, next: &I2cMsg<'_>) -> bool {
    !prev.is_read() && !next.is_read() && prev.same_target(next) && prev.len() == next.len()
}

/// Validate every message and fold them into transactions.
///
/// # Errors
///
/// [`TransferError::InvalidArgument`] for an empty message list, a zero or
/// out-of-range address, an empty payload, or a payload longer than
/// [`MAX_TRANSFER_LEN`] or the DMA buffer.
pub fn build_plan(msgs: &[I2cMsg<'_>], dma_capacity: usize) -> Result<Vec<Transaction>, TransferError> {
    if msgs.is_empty() {
        return Err(TransferError::InvalidArgument);
    }
    for msg in msgs {
        validate(msg, dma_capacity)?;
    }

    let mut transactions = Vec::new();
    let mut i = 0;
    while let Some(msg) = msgs.get(i) {
        let next = msgs.get(i + 1);

        if let Some(read) = next.filter(|n| should_combine(msg, n)) {
            transactions.push(Transaction::new(OpMode::WriteRead, msg.addr, i, 2, msg.len(), read.len()));
            i += 2;
            continue;
        }

        if msg.is_read() {
            transactions.push(Transaction::new(OpMode::Read, msg.addr, i, 1, msg.len(), 0));
            i += 1;
            continue;
        }

        let mut count = 1;
        while let Some(candidate) = msgs.get(i + count) {
            let prev = msgs.get(i + count - 1);
            let combines = msgs
                .get(i + count + 1)
                .is_some_and(|after| should_combine(candidate, after));
            let fits = count < MAX_BATCH_LEN && (count + 1) * msg.len() <= dma_capacity;
            if !prev.is_some_and(|p| should_batch(p, candidate)) || combines || !fits {
                break;
            }
            count += 1;
        }

        let mode = if count > 1 { OpMode::MultiWrite } else { OpMode::Write };
        transactions.push(Transaction::new(mode, msg.addr, i, count, msg.len(), 0));
        i += count;
    }

    Ok(transactions)
}
