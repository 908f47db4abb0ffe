// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! XMODEM-CRC block layout and reader.
//!
//! On the wire a block is `SOH seq ~seq payload[128] crc_hi crc_lo`. The
//! control byte has already been consumed by the time we get here, which
//! leaves the 132 bytes described by `Packet`.

use crc_catalog::CRC_16_XMODEM;
use embedded_hal::serial;
use static_assertions::assert_eq_size;
use tinycrc::Crc16;
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{AsBytes, FromBytes};

use super::link::Link;
use super::Error;
use crate::time::{Duration, Monotonic};

/// Payload bytes carried by each block.
pub const PAYLOAD_LEN: usize = 128;

#[derive(Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct Packet {
    pub sequence: u8,
    pub sequence_complement: u8,
    pub payload: [u8; PAYLOAD_LEN],
    /// CRC-16/XMODEM of `payload` as sent, most significant byte first.
    pub crc: U16<BigEndian>,
}

assert_eq_size!(Packet, [u8; 132]);

/// Reasons a fully received block is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum PacketFault {
    #[error("CRC mismatch (computed {computed:#06x}, received {received:#06x})")]
    Crc { computed: u16, received: u16 },
    #[error("sequence complement {complement:#04x} does not match {sequence:#04x}")]
    Complement { sequence: u8, complement: u8 },
    #[error("expected block {expected}, got block {received}")]
    Sequence { expected: u8, received: u8 },
}

impl Packet {
    /// Checks a received block against the CRC computed while its payload
    /// came in, and against the sequence number the session expects.
    ///
    /// The CRC is checked first, then the complement, then the sequence
    /// number, so a `Sequence` fault always describes an intact block.
    pub fn validate(&self, computed_crc: u16, expected: u8) -> Result<(), PacketFault> {
        let received = self.crc.get();
        if received != computed_crc {
            return Err(PacketFault::Crc {
                computed: computed_crc,
                received,
            });
        }
        if self.sequence_complement != !self.sequence {
            return Err(PacketFault::Complement {
                sequence: self.sequence,
                complement: self.sequence_complement,
            });
        }
        if self.sequence != expected {
            return Err(PacketFault::Sequence {
                expected,
                received: self.sequence,
            });
        }
        Ok(())
    }
}

/// Fills `buf` from the link one byte at a time, folding each byte into a
/// CRC-16/XMODEM, and returns the CRC.
///
/// A link error abandons the read; whatever made it into `buf` is garbage.
pub fn read_payload<S, M>(
    link: &mut Link<'_, S, M>,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<u16, Error>
where
    S: serial::Read<u8> + serial::Write<u8>,
    M: Monotonic,
{
    let mut crc = Crc16::new(&CRC_16_XMODEM);
    for dest in buf {
        let byte = link.get(timeout)?;
        crc.update(&[byte]);
        *dest = byte;
    }
    Ok(crc.finish())
}

/// Reads the remainder of a block after its `SOH`, returning the block and
/// the CRC computed over its payload. Nothing is validated here.
pub fn read_packet<S, M>(
    link: &mut Link<'_, S, M>,
    timeout: Duration,
) -> Result<(Packet, u16), Error>
where
    S: serial::Read<u8> + serial::Write<u8>,
    M: Monotonic,
{
    let mut packet = Packet::new_zeroed();

    packet.sequence = link.get(timeout)?;
    packet.sequence_complement = link.get(timeout)?;
    let computed = read_payload(link, &mut packet.payload, timeout)?;
    // The trailer is big-endian on the wire and in `Packet`, so its bytes go
    // straight in, in arrival order.
    for byte in packet.crc.as_bytes_mut() {
        *byte = link.get(timeout)?;
    }

    Ok((packet, computed))
}
