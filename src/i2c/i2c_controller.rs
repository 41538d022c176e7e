// Licensed under the Apache-2.0 license

//! High-level I2C controller abstraction.
//!
//! Wraps any [`I2cMaster`] in the embedded-hal 1.0 [`I2c`] trait. Each
//! embedded-hal operation list becomes one message list for the master, so
//! a write followed by a read of the same target still goes out as a single
//! repeated-start transaction. Adjacent operations of one direction are
//! joined into one message first: they share a bus segment with no start
//! condition between them. Transient failures are retried up to the
//! configured count.

use crate::i2c::common::I2cConfig;
use crate::i2c::plan::I2cMsg;
use crate::i2c::traits::I2cMaster;
use embedded_hal::i2c::{I2c, Operation, SevenBitAddress, TenBitAddress};

pub struct I2cController<H: I2cMaster> {
    pub hardware: H,
    pub config: I2cConfig,
}

impl<H: I2cMaster> I2cController<H> {
    #[must_use]
    pub fn new(hardware: H, config: I2cConfig) -> Self {
        Self { hardware, config }
    }

    /// Run `msgs`, retrying while the master reports a transient failure.
    fn run(&self, msgs: &mut [I2cMsg<'_>]) -> Result<(), H::Error> {
        let mut attempt = 0;
        loop {
            match self.hardware.transfer(msgs) {
                Ok(_) => return Ok(()),
                Err(e) if H::should_retry(&e) && attempt < self.config.retries => {
                    attempt += 1;
                    log::debug!("i2c{}: retry {attempt} after {e:?}", self.config.id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run_operations(
        &self,
        addr: u16,
        ten_bit: bool,
        operations: &mut [Operation<'_>],
    ) -> Result<(), H::Error> {
        // (is_read, operation count) per bus segment.
        let mut groups: Vec<(bool, usize)> = Vec::new();
        for op in operations.iter() {
            let is_read = matches!(op, Operation::Read(_));
            match groups.last_mut() {
                Some((read, count)) if *read == is_read => *count += 1,
                _ => groups.push((is_read, 1)),
            }
        }

        let mut segments: Vec<Vec<u8>> = Vec::with_capacity(groups.len());
        let mut ops = operations.iter();
        for &(_, count) in &groups {
            let mut segment = Vec::new();
            for op in ops.by_ref().take(count) {
                match op {
                    Operation::Write(data) => segment.extend_from_slice(data),
                    Operation::Read(buf) => segment.resize(segment.len() + buf.len(), 0),
                }
            }
            segments.push(segment);
        }

        let mut msgs: Vec<I2cMsg<'_>> = segments
            .iter_mut()
            .zip(&groups)
            .map(|(segment, &(is_read, _))| {
                let msg = if is_read {
                    I2cMsg::read(addr, segment)
                } else {
                    I2cMsg::write(addr, segment)
                };
                if ten_bit {
                    msg.ten_bit()
                } else {
                    msg
                }
            })
            .collect();
        self.run(&mut msgs)?;
        drop(msgs);

        let mut ops = operations.iter_mut();
        for (segment, &(is_read, count)) in segments.iter().zip(&groups) {
            let mut rest = segment.as_slice();
            for op in ops.by_ref().take(count) {
                if let (true, Operation::Read(buf)) = (is_read, op) {
                    if let Some((head, tail)) = rest.split_at_checked(buf.len()) {
                        buf.copy_from_slice(head);
                        rest = tail;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<H: I2cMaster> embedded_hal::i2c::ErrorType for I2cController<H> {
    type Error = H::Error;
}

impl<H: I2cMaster> I2c<SevenBitAddress> for I2cController<H> {
    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.run(&mut [I2cMsg::read(u16::from(addr), buffer)])
    }

    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        self.run(&mut [I2cMsg::write(u16::from(addr), bytes)])
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        let addr = u16::from(addr);
        self.run(&mut [I2cMsg::write(addr, bytes), I2cMsg::read(addr, buffer)])
    }

    fn transaction(
        &mut self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run_operations(u16::from(addr), false, operations)
    }
}

impl<H: I2cMaster> I2c<TenBitAddress> for I2cController<H> {
    fn transaction(
        &mut self,
        addr: TenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run_operations(addr, true, operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::error::TransferError;
    use crate::i2c::mock::{self, Behaviour};
    use crate::i2c::plan::{ExtFlags, Payload};
    use embedded_hal::i2c::{Error, ErrorKind, NoAcknowledgeSource};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Master that replays scripted results and records message shapes.
    #[derive(Default)]
    struct ScriptedMaster {
        results: Mutex<VecDeque<Result<usize, TransferError>>>,
        calls: Mutex<Vec<Vec<(u16, bool, bool, usize)>>>,
        written: Mutex<Vec<Vec<u8>>>,
    }

    impl I2cMaster for ScriptedMaster {
        type Error = TransferError;

        fn transfer(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize, TransferError> {
            self.calls.lock().unwrap().push(
                msgs.iter()
                    .map(|m| (m.addr, m.ten_bit, m.is_read(), m.len()))
                    .collect(),
            );
            for msg in msgs.iter_mut() {
                match &mut msg.payload {
                    Payload::Read(buf) => {
                        for (i, byte) in buf.iter_mut().enumerate() {
                            *byte = 0x50 + i as u8;
                        }
                    }
                    Payload::Write(data) => self.written.lock().unwrap().push(data.to_vec()),
                }
            }
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(msgs.len()))
        }

        fn transfer_with_extension(
            &self,
            msgs: &mut [I2cMsg<'_>],
            _flags: ExtFlags,
            _override_speed_hz: u32,
        ) -> Result<usize, TransferError> {
            self.transfer(msgs)
        }

        fn should_retry(error: &TransferError) -> bool {
            matches!(error, TransferError::Busy | TransferError::Timeout)
        }
    }

    fn controller(retries: u8, results: Vec<Result<usize, TransferError>>) -> I2cController<ScriptedMaster> {
        let master = ScriptedMaster::default();
        master.results.lock().unwrap().extend(results);
        I2cController::new(master, mock::config().retries(retries).build())
    }

    #[test]
    fn write_read_is_one_message_list() {
        let mut i2c = controller(0, vec![]);
        let mut buf = [0u8; 3];
        I2c::<SevenBitAddress>::write_read(&mut i2c, 0x50, &[0x01], &mut buf).unwrap();
        assert_eq!(buf, [0x50, 0x51, 0x52]);
        let calls = i2c.hardware.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[vec![(0x50, false, false, 1), (0x50, false, true, 3)]]);
    }

    #[test]
    fn adjacent_operations_of_one_direction_share_a_segment() {
        let mut i2c = controller(0, vec![]);
        let mut first = [0u8; 2];
        let mut second = [0u8; 3];
        let mut ops = [
            Operation::Write(&[1, 2]),
            Operation::Write(&[3, 4, 5]),
            Operation::Read(&mut first),
            Operation::Read(&mut second),
            Operation::Write(&[6]),
        ];
        I2c::<TenBitAddress>::transaction(&mut i2c, 0x2a5, &mut ops).unwrap();
        drop(ops);

        let calls = i2c.hardware.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[vec![(0x2a5, true, false, 5), (0x2a5, true, true, 5), (0x2a5, true, false, 1)]]
        );
        assert_eq!(
            i2c.hardware.written.lock().unwrap().as_slice(),
            &[vec![1, 2, 3, 4, 5], vec![6]]
        );
        assert_eq!(first, [0x50, 0x51]);
        assert_eq!(second, [0x52, 0x53, 0x54]);
    }

    #[test]
    fn joined_writes_need_a_single_start() {
        let (engine, hw) = mock::attach("mediatek,mt6775-i2c", mock::config().build());
        let mut i2c = I2cController::new(engine, mock::config().build());
        let mut ops = [Operation::Write(&[1, 2]), Operation::Write(&[3, 4, 5])];
        I2c::<SevenBitAddress>::transaction(&mut i2c, 0x50, &mut ops).unwrap();

        assert_eq!(hw.bus.start_count(), 1);
        let wire = hw.bus.wire();
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].written, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn transient_errors_are_retried_up_to_the_limit() {
        let mut i2c = controller(2, vec![Err(TransferError::Busy), Err(TransferError::Timeout)]);
        I2c::<SevenBitAddress>::write(&mut i2c, 0x50, &[0x00]).unwrap();
        assert_eq!(i2c.hardware.calls.lock().unwrap().len(), 3);

        let mut i2c = controller(1, vec![Err(TransferError::Busy), Err(TransferError::Busy)]);
        assert_eq!(I2c::<SevenBitAddress>::write(&mut i2c, 0x50, &[0x00]), Err(TransferError::Busy));
        assert_eq!(i2c.hardware.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn remote_errors_are_not_retried() {
        let mut i2c = controller(
            3,
            vec![Err(TransferError::RemoteError(
                crate::i2c::error::RemoteFault::Nack,
            ))],
        );
        let err = I2c::<SevenBitAddress>::read(&mut i2c, 0x50, &mut [0u8; 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown));
        assert_eq!(i2c.hardware.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn drives_the_engine_through_embedded_hal() {
        let (engine, hw) = mock::attach("mediatek,mt6775-i2c", mock::config().build());
        hw.bus.set_read_data(&[0x11, 0x22]);
        hw.bus.script([Behaviour::NeverFire {
            start_stays_set: false,
        }]);

        let mut i2c = I2cController::new(engine, mock::config().retries(1).build());
        let mut buf = [0u8; 2];
        I2c::<SevenBitAddress>::write_read(&mut i2c, 0x50, &[0x07], &mut buf).unwrap();
        assert_eq!(buf, [0x11, 0x22]);
        assert_eq!(hw.bus.start_count(), 2);
    }
}
