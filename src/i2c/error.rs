// Licensed under the Apache-2.0 license

use core::fmt;
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

/// Error flags reported by the controller for a finished transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RemoteFault {
    /// The target did not acknowledge its address or a data byte.
    Nack,
    /// No acknowledge to the high-speed master code.
    HsNack,
    /// Controller-side protocol error (revision 2).
    MasterError,
    ArbitrationLost,
    /// SCL held low past the hardware timeout (revision 2).
    SclTimeout,
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RemoteFault::Nack => "ack error",
            RemoteFault::HsNack => "high-speed master code not acknowledged",
            RemoteFault::MasterError => "master error",
            RemoteFault::ArbitrationLost => "arbitration lost",
            RemoteFault::SclTimeout => "scl timeout",
        };
        f.write_str(text)
    }
}

/// Outcome of a failed transfer call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferError {
    /// Bad length, address or buffer. Nothing was written to the controller.
    InvalidArgument,
    /// Clock gate or bus semaphore unavailable.
    Busy,
    /// No completion signal within the configured budget.
    Timeout,
    /// Timed out with the start bit still asserted.
    BusStuck,
    RemoteError(RemoteFault),
    /// Secondary channel finished the transaction but also flagged an error.
    CompletedWithError,
    /// The controller is power-suspended.
    SuspendedAccess,
    /// No divider pair reaches the requested bus speed.
    UnsupportedSpeed,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::InvalidArgument => f.write_str("invalid argument"),
            TransferError::Busy => f.write_str("bus busy"),
            TransferError::Timeout => f.write_str("transfer timeout"),
            TransferError::BusStuck => f.write_str("bus tied low/high"),
            TransferError::RemoteError(fault) => write!(f, "remote i/o error: {fault}"),
            TransferError::CompletedWithError => f.write_str("transfer done with error"),
            TransferError::SuspendedAccess => f.write_str("access while suspended"),
            TransferError::UnsupportedSpeed => f.write_str("unsupported bus speed"),
        }
    }
}

impl std::error::Error for TransferError {}

impl embedded_hal::i2c::Error for TransferError {
    fn kind(&self) -> ErrorKind {
        match self {
            TransferError::RemoteError(RemoteFault::Nack | RemoteFault::HsNack) => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown)
            }
            TransferError::RemoteError(RemoteFault::ArbitrationLost) => {
                ErrorKind::ArbitrationLoss
            }
            TransferError::RemoteError(RemoteFault::MasterError | RemoteFault::SclTimeout)
            | TransferError::BusStuck
            | TransferError::CompletedWithError => ErrorKind::Bus,
            _ => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::Error as _;

    #[test]
    fn nack_maps_to_no_acknowledge() {
        let err = TransferError::RemoteError(RemoteFault::Nack);
        assert_eq!(
            err.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown)
        );
        assert_eq!(
            TransferError::RemoteError(RemoteFault::ArbitrationLost).kind(),
            ErrorKind::ArbitrationLoss
        );
        assert_eq!(TransferError::Timeout.kind(), ErrorKind::Other);
    }

    #[test]
    fn display_names_the_fault() {
        let text = TransferError::RemoteError(RemoteFault::SclTimeout).to_string();
        assert_eq!(text, "remote i/o error: scl timeout");
    }
}
