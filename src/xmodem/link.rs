// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte-level link to the sender.
//!
//! Wraps any `embedded_hal` serial port and gives every read and write a
//! deadline from the injected clock. The port itself is expected to be
//! non-blocking (`nb::Error::WouldBlock` when there's nothing to do).

use embedded_hal::serial;

use super::Error;
use crate::time::{Duration, Monotonic};

pub struct Link<'a, S, M> {
    port: &'a mut S,
    clock: &'a mut M,
}

impl<'a, S, M> Link<'a, S, M>
where
    S: serial::Read<u8> + serial::Write<u8>,
    M: Monotonic,
{
    pub fn new(port: &'a mut S, clock: &'a mut M) -> Self {
        Self { port, clock }
    }

    /// Waits up to `timeout` for a byte. `Ok(None)` means nothing arrived.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<u8>, Error> {
        let deadline = self.clock.deadline(timeout);
        loop {
            match self.port.read() {
                Ok(byte) => return Ok(Some(byte)),
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(_)) => {
                    warn!("serial receive error");
                    return Err(Error::Transport);
                }
            }
            if self.clock.expired(deadline) {
                return Ok(None);
            }
        }
    }

    /// Like `poll`, but running out of time is an error.
    pub fn get(&mut self, timeout: Duration) -> Result<u8, Error> {
        self.poll(timeout)?.ok_or(Error::Timeout)
    }

    pub fn put(&mut self, byte: u8, timeout: Duration) -> Result<(), Error> {
        let deadline = self.clock.deadline(timeout);
        loop {
            match self.port.write(byte) {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(_)) => {
                    warn!("serial transmit error");
                    return Err(Error::Transport);
                }
            }
            if self.clock.expired(deadline) {
                return Err(Error::Timeout);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakePort;
    use super::*;
    use crate::time::test_clock::SteppingClock;

    #[test]
    fn get_returns_queued_byte() {
        let mut port = FakePort::with_input(&[0x42]);
        let mut clock = SteppingClock::new(Duration::millis(1));
        let mut link = Link::new(&mut port, &mut clock);
        assert_eq!(link.get(Duration::millis(5)), Ok(0x42));
    }

    #[test]
    fn get_times_out_on_silence() {
        let mut port = FakePort::default();
        let mut clock = SteppingClock::new(Duration::millis(1));
        let mut link = Link::new(&mut port, &mut clock);
        assert_eq!(link.get(Duration::millis(5)), Err(Error::Timeout));
        assert!(clock.elapsed() >= Duration::millis(5));
    }

    #[test]
    fn poll_reports_silence_as_none() {
        let mut port = FakePort::default();
        let mut clock = SteppingClock::new(Duration::millis(1));
        let mut link = Link::new(&mut port, &mut clock);
        assert_eq!(link.poll(Duration::millis(5)), Ok(None));
    }

    #[test]
    fn port_errors_are_transport_errors() {
        let mut port = FakePort {
            broken: true,
            ..FakePort::default()
        };
        let mut clock = SteppingClock::new(Duration::millis(1));
        let mut link = Link::new(&mut port, &mut clock);
        assert_eq!(link.get(Duration::millis(5)), Err(Error::Transport));
    }
}
