// Licensed under the Apache-2.0 license

// Keep panic-prone patterns out of production code; tests may use them freely.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::indexing_slicing))]
#![cfg_attr(not(test), warn(clippy::expect_used))]

//! Transfer engine for MediaTek-style I2C bus controllers.
//!
//! The crate drives I2C master transactions through a memory-mapped
//! controller, optionally offloading payloads to a dedicated DMA channel,
//! and coordinates interrupt completion, clock gating and cross-processor
//! hardware semaphores. Platform services (register access, clocks,
//! semaphores, delays and DMA memory) are injected through
//! [`i2c::traits::I2cPlatform`].

pub mod common;
pub mod i2c;
