// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mailbox transfer descriptors.
//!
//! A `MailboxTransfer` holds the register values for one hardware mailbox.
//! It's owned by the caller and handed to the driver by reference; the
//! driver copies it into the mailbox and never keeps it.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::{
    CanError, MAX_FRAME_LEN, MCR_MDLC_SHIFT, MID_EXTENDED_MASK, MID_MIDE, MID_MIDVA_SHIFT,
    MMR_MOT_SHIFT, MMR_PRIOR_SHIFT,
};

/// Mailbox object type, the `MOT` field of the mailbox mode register.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum MailboxMode {
    Disabled = 0,
    Receive = 1,
    /// Receive, letting a new frame overwrite an unread one.
    ReceiveOverwrite = 2,
    Transmit = 3,
    /// Sends a remote frame and receives the answer.
    Consumer = 4,
    /// Answers remote frames with the mailbox contents.
    Producer = 5,
}

impl MailboxMode {
    /// Decodes the object type from a mode register value. `None` for the
    /// reserved encodings.
    pub fn from_mmr(mmr: u32) -> Option<Self> {
        Self::from_u32((mmr >> MMR_MOT_SHIFT) & 0b111)
    }

    pub fn mmr(self) -> u32 {
        (self as u32) << MMR_MOT_SHIFT
    }

    /// Whether a completed transfer on this mailbox leaves a frame to be
    /// read out.
    pub fn receives(self) -> bool {
        matches!(
            self,
            Self::Receive | Self::ReceiveOverwrite | Self::Consumer
        )
    }
}

/// CAN 2.0 frame identifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CanId {
    /// 11-bit identifier (CAN 2.0A).
    Standard(u16),
    /// 29-bit identifier (CAN 2.0B).
    Extended(u32),
}

impl CanId {
    /// Encodes the identifier for the mailbox ID register. Bits above the
    /// identifier's width are dropped.
    pub fn mid(self) -> u32 {
        match self {
            Self::Standard(id) => u32::from(id & 0x7FF) << MID_MIDVA_SHIFT,
            Self::Extended(id) => (id & MID_EXTENDED_MASK) | MID_MIDE,
        }
    }

    pub fn from_mid(mid: u32) -> Self {
        if mid & MID_MIDE != 0 {
            Self::Extended(mid & MID_EXTENDED_MASK)
        } else {
            Self::Standard(((mid >> MID_MIDVA_SHIFT) & 0x7FF) as u16)
        }
    }

    /// Encodes `mask` for the acceptance mask register, using this
    /// identifier's format.
    pub fn mask(self, mask: u32) -> u32 {
        match self {
            Self::Standard(_) => (mask & 0x7FF) << MID_MIDVA_SHIFT,
            Self::Extended(_) => (mask & MID_EXTENDED_MASK) | MID_MIDE,
        }
    }
}

/// Register image for one mailbox. `Default` is all zeroes, which leaves a
/// mailbox disabled.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct MailboxTransfer {
    pub mailbox: u8,
    /// `MMR`: object type and priority.
    pub mode: u32,
    /// `MAM`
    pub acceptance_mask: u32,
    /// `MID`
    pub identifier: u32,
    /// `MDL`: data bytes 0 to 3, byte 0 in the low bits.
    pub data_low: u32,
    /// `MDH`: data bytes 4 to 7.
    pub data_high: u32,
    /// `MCR`
    pub control: u32,
    /// Frame length in bytes, 0 to 8.
    pub size: u8,
}

impl MailboxTransfer {
    /// Describes a data frame to send from `mailbox`.
    pub fn transmit(mailbox: u8, id: CanId, data: &[u8]) -> Result<Self, CanError> {
        if data.len() > MAX_FRAME_LEN {
            return Err(CanError::FrameTooLong(data.len()));
        }
        let mut bytes = [0; MAX_FRAME_LEN];
        bytes[..data.len()].copy_from_slice(data);
        let (low, high) = bytes.split_at(4);
        let size = data.len() as u8;

        Ok(Self {
            mailbox,
            mode: MailboxMode::Transmit.mmr(),
            acceptance_mask: 0,
            identifier: id.mid(),
            data_low: u32::from_le_bytes([low[0], low[1], low[2], low[3]]),
            data_high: u32::from_le_bytes([high[0], high[1], high[2], high[3]]),
            control: u32::from(size) << MCR_MDLC_SHIFT,
            size,
        })
    }

    /// Describes a mailbox that accepts frames whose identifier matches `id`
    /// in the bits set in `mask`.
    pub fn receive(mailbox: u8, id: CanId, mask: u32) -> Self {
        Self {
            mailbox,
            mode: MailboxMode::Receive.mmr(),
            acceptance_mask: id.mask(mask),
            identifier: id.mid(),
            ..Self::default()
        }
    }

    pub fn disabled(mailbox: u8) -> Self {
        Self {
            mailbox,
            ..Self::default()
        }
    }

    /// Sets the transmit priority. 0 is the highest.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.mode &= !(0xF << MMR_PRIOR_SHIFT);
        self.mode |= u32::from(priority & 0xF) << MMR_PRIOR_SHIFT;
        self
    }

    pub fn object_type(&self) -> Option<MailboxMode> {
        MailboxMode::from_mmr(self.mode)
    }

    /// Clears every field, including the mailbox number.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A frame taken out of a reception mailbox.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct ReceivedFrame {
    pub mailbox: u8,
    pub id: CanId,
    pub data: [u8; MAX_FRAME_LEN],
    pub len: u8,
}

impl ReceivedFrame {
    pub(crate) const EMPTY: Self = Self {
        mailbox: 0,
        id: CanId::Standard(0),
        data: [0; MAX_FRAME_LEN],
        len: 0,
    };

    pub(crate) fn from_registers(mailbox: u8, mid: u32, msr: u32, mdl: u32, mdh: u32) -> Self {
        let mut data = [0; MAX_FRAME_LEN];
        data[..4].copy_from_slice(&mdl.to_le_bytes());
        data[4..].copy_from_slice(&mdh.to_le_bytes());
        Self {
            mailbox,
            id: CanId::from_mid(mid),
            data,
            len: ((msr >> MCR_MDLC_SHIFT) & 0xF) as u8,
        }
    }

    /// The data bytes actually carried by the frame. A DLC above 8 still
    /// means 8 bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len).min(MAX_FRAME_LEN)]
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn standard_id_lives_in_midva() {
        assert_eq!(CanId::Standard(0x7E0).mid(), 0x7E0 << 18);
        assert_eq!(CanId::from_mid(0x7E0 << 18), CanId::Standard(0x7E0));
        // MIDvB is ignored for standard frames.
        assert_eq!(CanId::from_mid((0x123 << 18) | 0x3FFFF), CanId::Standard(0x123));
    }

    #[test]
    fn extended_id_keeps_all_29_bits() {
        let id = CanId::Extended(0x1ABC_DEF5);
        assert_eq!(id.mid(), 0x1ABC_DEF5 | MID_MIDE);
        assert_eq!(CanId::from_mid(id.mid()), id);
        assert_eq!(CanId::from_mid(0x3FFF_FFFF), CanId::Extended(0x1FFF_FFFF));
    }

    #[test]
    fn transmit_packs_data_little_endian() {
        let t = MailboxTransfer::transmit(2, CanId::Standard(0x100), &hex!("01 02 03 04 05"))
            .unwrap();
        assert_eq!(t.mailbox, 2);
        assert_eq!(t.object_type(), Some(MailboxMode::Transmit));
        assert_eq!(t.data_low, 0x0403_0201);
        assert_eq!(t.data_high, 0x0000_0005);
        assert_eq!(t.size, 5);
        assert_eq!(t.control, 5 << 16);
    }

    #[test]
    fn transmit_rejects_long_frames() {
        assert_eq!(
            MailboxTransfer::transmit(0, CanId::Standard(1), &[0; 9]),
            Err(CanError::FrameTooLong(9))
        );
    }

    #[test]
    fn receive_mask_follows_id_format() {
        let t = MailboxTransfer::receive(1, CanId::Extended(0x1234), 0xFFFF_FFFF);
        assert_eq!(t.object_type(), Some(MailboxMode::Receive));
        assert_eq!(t.acceptance_mask, MID_EXTENDED_MASK | MID_MIDE);

        let t = MailboxTransfer::receive(1, CanId::Standard(0x7E0), 0x7F0);
        assert_eq!(t.acceptance_mask, 0x7F0 << 18);
    }

    #[test]
    fn priority_replaces_previous() {
        let t = MailboxTransfer::transmit(0, CanId::Standard(1), &[])
            .unwrap()
            .with_priority(9)
            .with_priority(3);
        assert_eq!((t.mode >> 16) & 0xF, 3);
        assert_eq!(t.object_type(), Some(MailboxMode::Transmit));
    }

    #[test]
    fn reset_clears_everything() {
        let mut t = MailboxTransfer::transmit(5, CanId::Extended(7), &[1, 2, 3]).unwrap();
        t.reset();
        assert_eq!(t, MailboxTransfer::default());
        assert_eq!(t.object_type(), Some(MailboxMode::Disabled));
    }

    #[test]
    fn reserved_object_types_decode_to_none() {
        assert_eq!(MailboxMode::from_mmr(6 << 24), None);
        assert_eq!(MailboxMode::from_mmr(7 << 24), None);
        assert_eq!(MailboxMode::from_mmr(5 << 24), Some(MailboxMode::Producer));
    }

    #[test]
    fn received_frame_unpacks_registers() {
        let frame = ReceivedFrame::from_registers(3, 0x55 << 18, 3 << 16, 0x0403_0201, 0);
        assert_eq!(frame.id, CanId::Standard(0x55));
        assert_eq!(frame.payload(), &hex!("01 02 03"));

        let frame = ReceivedFrame::from_registers(3, 0, 0xF << 16, 0, 0);
        assert_eq!(frame.payload().len(), 8);
    }
}
