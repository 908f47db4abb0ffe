// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Serial image loading and CAN signalling for SAM3X boards.
//!
//! The two halves are independent: `xmodem` receives a file over any
//! `embedded_hal` serial port, and `can` drives the controller's mailboxes.
//! The `loader` binary ties them together.

#![cfg_attr(not(test), no_std)]

// Must come first, so the macros are visible to every other module.
#[macro_use]
mod log;

pub mod bsp;
pub mod can;
pub mod pmc;
pub mod time;
pub mod uart;
pub mod vectors;
pub mod xmodem;

use can::{CanError, CanId, MailboxTransfer};

/// Identifier the loader announces finished transfers on.
pub const ANNOUNCE_ID: CanId = CanId::Standard(0x7E0);

/// Builds the frame announcing that `len` bytes arrived: the length as a
/// little-endian `u32`, saturating.
pub fn announcement(mailbox: u8, len: usize) -> Result<MailboxTransfer, CanError> {
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    MailboxTransfer::transmit(mailbox, ANNOUNCE_ID, &len.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_carries_length() {
        let t = announcement(0, 0x0001_0080).unwrap();
        assert_eq!(t.identifier, 0x7E0 << 18);
        assert_eq!(t.size, 4);
        assert_eq!(t.data_low, 0x0001_0080);
        assert_eq!(t.data_high, 0);
    }

    #[test]
    fn announcement_saturates() {
        let t = announcement(0, usize::MAX).unwrap();
        assert_eq!(t.data_low, u32::MAX);
    }
}
