// Licensed under the Apache-2.0 license

//! # Controller registry
//!
//! Attached controllers indexed by bus id, so collaborators that only know
//! a bus number (a debug console, a co-processor handover, a power-state
//! walker) can reach the controller.
//!
//! ```rust,ignore
//! let mut registry = I2cRegistry::new();
//! registry.register(Arc::new(controller))?;
//!
//! if let Some(i2c) = registry.get(3) {
//!     i2c.transfer(&mut [I2cMsg::write(0x50, &[0x00])])?;
//! }
//! registry.dump_status(3);
//! ```
//!
//! All controllers share one platform type, so the table is homogeneous and
//! needs no wrapper enum.

use crate::i2c::diagnostics::StatusSnapshot;
use crate::i2c::engine::MtI2c;
use crate::i2c::traits::I2cPlatform;
use core::fmt;
use std::sync::Arc;

/// Highest number of buses one registry tracks.
pub const I2C_MAX_CHANNEL: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// Bus id at or above [`I2C_MAX_CHANNEL`].
    InvalidId(u16),
    /// A controller is already registered under this id.
    Occupied(u16),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::InvalidId(id) => write!(f, "invalid I2C channel id {id}"),
            RegistryError::Occupied(id) => write!(f, "I2C channel {id} already registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

pub struct I2cRegistry<P: I2cPlatform> {
    controllers: [Option<Arc<MtI2c<P>>>; I2C_MAX_CHANNEL],
}

impl<P: I2cPlatform> Default for I2cRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: I2cPlatform> I2cRegistry<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            controllers: core::array::from_fn(|_| None),
        }
    }

    fn slot(&mut self, id: u16) -> Result<&mut Option<Arc<MtI2c<P>>>, RegistryError> {
        self.controllers
            .get_mut(usize::from(id))
            .ok_or(RegistryError::InvalidId(id))
    }

    /// Register `controller` under its configured bus id.
    ///
    /// # Errors
    ///
    /// [`RegistryError`] for an out-of-range or already used id.
    pub fn register(&mut self, controller: Arc<MtI2c<P>>) -> Result<(), RegistryError> {
        let id = controller.id();
        let slot = self.slot(id)?;
        if slot.is_some() {
            return Err(RegistryError::Occupied(id));
        }
        *slot = Some(controller);
        Ok(())
    }

    /// Drop the registration of bus `id`.
    pub fn remove(&mut self, id: u16) -> Option<Arc<MtI2c<P>>> {
        self.slot(id).ok().and_then(Option::take)
    }

    #[must_use]
    pub fn get(&self, id: u16) -> Option<&Arc<MtI2c<P>>> {
        self.controllers
            .get(usize::from(id))
            .and_then(Option::as_ref)
    }

    /// Registered controllers in bus order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<MtI2c<P>>> {
        self.controllers.iter().flatten()
    }

    /// Dump the status of bus `id`; `None` if nothing is registered there.
    pub fn dump_status(&self, id: u16) -> Option<StatusSnapshot> {
        if usize::from(id) >= I2C_MAX_CHANNEL {
            log::error!("invalid para: i2c dump_status id {id}");
            return None;
        }
        let Some(controller) = self.get(id) else {
            log::error!("cannot find i2c{id}");
            return None;
        };
        Some(controller.dump_status())
    }
}
