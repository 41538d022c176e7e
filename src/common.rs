// Licensed under the Apache-2.0 license

//! Shared helpers: DMA-capable memory and a thread-sleeping delay provider.

use crate::i2c::traits::{DmaRangeError, DmaRegion};
use embedded_hal::delay::DelayNs;
use std::time::Duration;

/// Size of one DMA page; the controller's bounce buffer is one page per channel.
pub const PAGE_SIZE: usize = 4096;

/// Owned, physically addressable memory shared with the DMA engine.
///
/// The platform allocates the backing memory (for example a coherent mapping)
/// and hands it over together with its bus address. The driver only ever
/// copies caller payloads into and out of it.
pub struct CoherentBuffer {
    mem: Box<[u8]>,
    paddr: u64,
}

impl CoherentBuffer {
    /// Wrap memory that is already visible to the DMA engine at `paddr`.
    #[must_use]
    pub fn from_parts(mem: Box<[u8]>, paddr: u64) -> Self {
        Self { mem, paddr }
    }

    /// Allocate `len` zeroed bytes and record `paddr` as their bus address.
    #[must_use]
    pub fn zeroed(len: usize, paddr: u64) -> Self {
        Self::from_parts(vec![0u8; len].into_boxed_slice(), paddr)
    }
}

impl DmaRegion for CoherentBuffer {
    fn phys_addr(&self) -> u64 {
        self.paddr
    }

    fn len(&self) -> usize {
        self.mem.len()
    }

    fn copy_in(&mut self, offset: usize, data: &[u8]) -> Result<(), DmaRangeError> {
        let end = offset.checked_add(data.len()).ok_or(DmaRangeError)?;
        self.mem
            .get_mut(offset..end)
            .ok_or(DmaRangeError)?
            .copy_from_slice(data);
        Ok(())
    }

    fn copy_out(&self, offset: usize, out: &mut [u8]) -> Result<(), DmaRangeError> {
        let end = offset.checked_add(out.len()).ok_or(DmaRangeError)?;
        out.copy_from_slice(self.mem.get(offset..end).ok_or(DmaRangeError)?);
        Ok(())
    }
}

/// Delay provider backed by `std::thread::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}
