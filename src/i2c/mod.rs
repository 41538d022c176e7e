// Licensed under the Apache-2.0 license

//! MediaTek I2C master driver.
//!
//! The [`engine`] drives transfers on one controller; everything else either
//! feeds it (configuration, capability table, timing, planning) or wraps it
//! (embedded-hal adapter, registry, attach helper).

pub mod clock_gate;
pub mod common;
pub mod compat;
pub mod completion;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod i2c_controller;
pub mod plan;
pub mod registers;
pub mod registry;
pub mod semaphore;
pub mod system_setup;
pub mod timing;
pub mod traits;

#[cfg(test)]
pub(crate) mod mock;
