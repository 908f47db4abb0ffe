// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! XMODEM-CRC file receiver.
//!
//! The receiver asks for CRC mode by sending `'C'` until the sender starts
//! talking, then takes 128-byte blocks into a caller-supplied buffer until
//! the sender signals end of transmission.
//!
//! By default a block that fails its CRC or sequence check cancels the
//! whole transfer: the sender gets a single `CAN` and the caller gets the
//! fault. `Recovery::Nak` turns on the usual retransmit-on-NAK behavior for
//! senders that support it.

use embedded_hal::serial;

use crate::time::{Duration, Monotonic};

pub mod link;
pub mod packet;

use link::Link;
use packet::{read_packet, Packet, PacketFault, PAYLOAD_LEN};

/// Start of a 128-byte block.
pub const SOH: u8 = 0x01;
/// End of transmission.
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
/// Cancel. We send it to abort; the sender may send it to give up.
pub const CAN: u8 = 0x18;
pub const ESC: u8 = 0x1B;
/// Sent by the receiver to request a transfer with CRC-16 trailers.
pub const CRC_MODE: u8 = b'C';

/// What to do about a block that fails validation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Recovery {
    /// Send `CAN` and fail the transfer.
    Cancel,
    /// Ask for the block again with `NAK`, up to `max_retries` times in a
    /// row before cancelling. A repeat of the block we just acknowledged is
    /// acknowledged again and dropped.
    Nak { max_retries: u8 },
}

#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// How long to wait for the sender after each `'C'`.
    pub handshake_interval: Duration,
    /// Give up after this many unanswered `'C'`s. `None` waits forever.
    pub handshake_attempts: Option<u32>,
    /// Limit on the gap between bytes inside a block, and on each byte we
    /// send.
    pub byte_timeout: Duration,
    /// Limit on the wait for the control byte that starts the next block.
    pub block_timeout: Duration,
    pub recovery: Recovery,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handshake_interval: Duration::secs(1),
            handshake_attempts: None,
            byte_timeout: Duration::secs(1),
            block_timeout: Duration::secs(10),
            recovery: Recovery::Cancel,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Error {
    #[error("timed out waiting for the sender")]
    Timeout,
    #[error("serial port error")]
    Transport,
    #[error("no answer to CRC-mode request")]
    HandshakeTimeout,
    #[error("transfer cancelled by sender")]
    Cancelled,
    #[error("unexpected control byte {0:#04x}")]
    UnexpectedByte(u8),
    #[error("bad block: {0}")]
    Packet(#[from] PacketFault),
    #[error("file does not fit in {capacity} bytes")]
    BufferFull { capacity: usize },
}

/// Receives one file into `dest`, returning the number of bytes written.
///
/// The count is always a multiple of 128; XMODEM has no notion of file
/// length, so any padding the sender added to the last block is kept. An
/// immediate `EOT` is a successful empty transfer, `Ok(0)`.
///
/// `dest` is only ever written with blocks that passed validation. On error
/// its contents past the last acknowledged block are untouched.
pub fn receive<S, M>(
    port: &mut S,
    clock: &mut M,
    config: &Config,
    dest: &mut [u8],
) -> Result<usize, Error>
where
    S: serial::Read<u8> + serial::Write<u8>,
    M: Monotonic,
{
    let mut link = Link::new(port, clock);
    let mut control = handshake(&mut link, config)?;
    let mut session = Session::new(dest);

    loop {
        match control {
            SOH => session.receive_block(&mut link, config)?,
            EOT => {
                link.put(ACK, config.byte_timeout)?;
                info!("transfer complete, {} bytes", session.offset);
                return Ok(session.offset);
            }
            CAN | ESC => {
                info!("sender cancelled after {} bytes", session.offset);
                return Err(Error::Cancelled);
            }
            other => {
                warn!("unexpected control byte {=u8:#x}", other);
                return Err(Error::UnexpectedByte(other));
            }
        }
        control = link.get(config.block_timeout)?;
    }
}

/// Requests CRC mode until the sender answers, and returns the sender's
/// first byte.
fn handshake<S, M>(link: &mut Link<'_, S, M>, config: &Config) -> Result<u8, Error>
where
    S: serial::Read<u8> + serial::Write<u8>,
    M: Monotonic,
{
    let mut attempts = 0u32;
    loop {
        if config.handshake_attempts.is_some_and(|limit| attempts >= limit) {
            warn!("no sender after {} requests", attempts);
            return Err(Error::HandshakeTimeout);
        }
        link.put(CRC_MODE, config.byte_timeout)?;
        attempts += 1;

        if let Some(byte) = link.poll(config.handshake_interval)? {
            debug!("sender answered after {} requests", attempts);
            return Ok(byte);
        }
    }
}

struct Session<'d> {
    dest: &'d mut [u8],
    offset: usize,
    /// Sequence number of the next block. Starts at 1 and wraps.
    sequence: u8,
    /// Consecutive rejected blocks, for `Recovery::Nak`.
    retries: u8,
}

impl<'d> Session<'d> {
    fn new(dest: &'d mut [u8]) -> Self {
        Self {
            dest,
            offset: 0,
            sequence: 1,
            retries: 0,
        }
    }

    /// Handles one block, whose `SOH` has been consumed.
    fn receive_block<S, M>(
        &mut self,
        link: &mut Link<'_, S, M>,
        config: &Config,
    ) -> Result<(), Error>
    where
        S: serial::Read<u8> + serial::Write<u8>,
        M: Monotonic,
    {
        let (packet, computed) = read_packet(link, config.byte_timeout)?;
        match packet.validate(computed, self.sequence) {
            Ok(()) => {
                self.retries = 0;
                self.commit(link, &packet, config)
            }
            Err(fault) => {
                warn!("rejected block: {}", fault);
                self.recover(link, fault, config)
            }
        }
    }

    fn commit<S, M>(
        &mut self,
        link: &mut Link<'_, S, M>,
        packet: &Packet,
        config: &Config,
    ) -> Result<(), Error>
    where
        S: serial::Read<u8> + serial::Write<u8>,
        M: Monotonic,
    {
        let capacity = self.dest.len();
        let end = self.offset + PAYLOAD_LEN;
        let Some(dest) = self.dest.get_mut(self.offset..end) else {
            error!("block {} overflows {} byte buffer", packet.sequence, capacity);
            return Err(cancel(link, config, Error::BufferFull { capacity }));
        };
        dest.copy_from_slice(&packet.payload);

        self.offset = end;
        self.sequence = self.sequence.wrapping_add(1);
        trace!("accepted block {}", packet.sequence);
        link.put(ACK, config.byte_timeout)
    }

    fn recover<S, M>(
        &mut self,
        link: &mut Link<'_, S, M>,
        fault: PacketFault,
        config: &Config,
    ) -> Result<(), Error>
    where
        S: serial::Read<u8> + serial::Write<u8>,
        M: Monotonic,
    {
        let Recovery::Nak { max_retries } = config.recovery else {
            return Err(cancel(link, config, fault.into()));
        };

        match fault {
            // Our ACK for the previous block got lost and the sender is
            // repeating it.
            PacketFault::Sequence { received, .. }
                if self.offset > 0 && received == self.sequence.wrapping_sub(1) =>
            {
                debug!("dropping repeat of block {}", received);
                link.put(ACK, config.byte_timeout)
            }
            // Any other sequence error means we've lost sync with the sender,
            // and asking again won't help.
            PacketFault::Sequence { .. } => Err(cancel(link, config, fault.into())),
            PacketFault::Crc { .. } | PacketFault::Complement { .. } => {
                if self.retries >= max_retries {
                    error!("giving up after {} retries", self.retries);
                    return Err(cancel(link, config, fault.into()));
                }
                self.retries += 1;
                link.put(NAK, config.byte_timeout)
            }
        }
    }
}

/// Tells the sender we're giving up, and returns `error`. Failing to send
/// the `CAN` doesn't change what went wrong, so that's only logged.
fn cancel<S, M>(link: &mut Link<'_, S, M>, config: &Config, error: Error) -> Error
where
    S: serial::Read<u8> + serial::Write<u8>,
    M: Monotonic,
{
    if let Err(e) = link.put(CAN, config.byte_timeout) {
        warn!("could not send CAN: {}", e);
    }
    error
}
