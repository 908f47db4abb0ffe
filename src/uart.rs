// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The SAM3X debug UART, as a non-blocking `embedded_hal` serial port.

use embedded_hal::serial;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

use crate::pmc;
use crate::vectors::Interrupt;

const UART_BASE: usize = 0x400E_0800;

register_structs! {
    UartRegisters {
        (0x00 => cr: WriteOnly<u32, CR::Register>),
        (0x04 => mr: ReadWrite<u32, MR::Register>),
        (0x08 => _reserved0),
        (0x0C => idr: WriteOnly<u32>),
        (0x10 => _reserved1),
        (0x14 => sr: ReadOnly<u32, SR::Register>),
        (0x18 => rhr: ReadOnly<u32>),
        (0x1C => thr: WriteOnly<u32>),
        (0x20 => brgr: ReadWrite<u32>),
        (0x24 => @END),
    }
}

register_bitfields![u32,
    CR [
        RSTRX OFFSET(2) NUMBITS(1) [],
        RSTTX OFFSET(3) NUMBITS(1) [],
        RXEN OFFSET(4) NUMBITS(1) [],
        RXDIS OFFSET(5) NUMBITS(1) [],
        TXEN OFFSET(6) NUMBITS(1) [],
        TXDIS OFFSET(7) NUMBITS(1) [],
        /// Clears the latched error bits in SR
        RSTSTA OFFSET(8) NUMBITS(1) []
    ],
    MR [
        PAR OFFSET(9) NUMBITS(3) [
            Even = 0,
            Odd = 1,
            Space = 2,
            Mark = 3,
            NoParity = 4
        ],
        CHMODE OFFSET(14) NUMBITS(2) [
            Normal = 0,
            LocalLoopback = 2
        ]
    ],
    SR [
        RXRDY OFFSET(0) NUMBITS(1) [],
        TXRDY OFFSET(1) NUMBITS(1) [],
        OVRE OFFSET(5) NUMBITS(1) [],
        FRAME OFFSET(6) NUMBITS(1) [],
        PARE OFFSET(7) NUMBITS(1) [],
        TXEMPTY OFFSET(9) NUMBITS(1) []
    ]
];

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum UartError {
    #[error("receive overrun")]
    Overrun,
    #[error("framing error")]
    Framing,
    #[error("parity error")]
    Parity,
    #[error("can't make {baud} baud from {master_clock_hz} Hz")]
    Baud { master_clock_hz: u32, baud: u32 },
}

/// Baud rate generator divisor for `baud`, or `None` if it can't be
/// represented.
pub fn clock_divisor(master_clock_hz: u32, baud: u32) -> Option<u16> {
    let cd = master_clock_hz.checked_div(baud.checked_mul(16)?)?;
    u16::try_from(cd).ok().filter(|&cd| cd != 0)
}

pub struct Uart {
    regs: &'static UartRegisters,
}

impl Uart {
    /// # Safety
    ///
    /// There must be only one `Uart` at a time.
    pub unsafe fn steal() -> Self {
        Self {
            // Safety: the UART is always mapped at this address.
            regs: unsafe { &*(UART_BASE as *const UartRegisters) },
        }
    }

    /// Turns the UART on at `baud`, 8N1, with interrupts off. The pins have
    /// to be handed to the UART separately.
    pub fn init(&mut self, master_clock_hz: u32, baud: u32) -> Result<(), UartError> {
        let cd = clock_divisor(master_clock_hz, baud).ok_or(UartError::Baud {
            master_clock_hz,
            baud,
        })?;

        pmc::enable_peripheral(Interrupt::Uart);
        self.regs
            .cr
            .write(CR::RSTRX::SET + CR::RSTTX::SET + CR::RXDIS::SET + CR::TXDIS::SET);
        self.regs.idr.set(u32::MAX);
        self.regs.mr.write(MR::PAR::NoParity + MR::CHMODE::Normal);
        self.regs.brgr.set(u32::from(cd));
        self.regs.cr.write(CR::RXEN::SET + CR::TXEN::SET);
        Ok(())
    }
}

impl serial::Read<u8> for Uart {
    type Error = UartError;

    fn read(&mut self) -> nb::Result<u8, UartError> {
        let sr = self.regs.sr.extract();
        let error = if sr.is_set(SR::OVRE) {
            Some(UartError::Overrun)
        } else if sr.is_set(SR::FRAME) {
            Some(UartError::Framing)
        } else if sr.is_set(SR::PARE) {
            Some(UartError::Parity)
        } else {
            None
        };
        if let Some(error) = error {
            self.regs.cr.write(CR::RSTSTA::SET);
            return Err(nb::Error::Other(error));
        }

        if sr.is_set(SR::RXRDY) {
            Ok(self.regs.rhr.get() as u8)
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl serial::Write<u8> for Uart {
    type Error = UartError;

    fn write(&mut self, word: u8) -> nb::Result<(), UartError> {
        if self.regs.sr.is_set(SR::TXRDY) {
            self.regs.thr.set(u32::from(word));
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    fn flush(&mut self) -> nb::Result<(), UartError> {
        if self.regs.sr.is_set(SR::TXEMPTY) {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_for_common_rates() {
        assert_eq!(clock_divisor(84_000_000, 115_200), Some(45));
        assert_eq!(clock_divisor(84_000_000, 9_600), Some(546));
        assert_eq!(clock_divisor(4_000_000, 115_200), Some(2));
    }

    #[test]
    fn divisor_out_of_range() {
        assert_eq!(clock_divisor(84_000_000, 0), None);
        assert_eq!(clock_divisor(1_000_000, 115_200), None);
        assert_eq!(clock_divisor(u32::MAX, 1), None);
        assert_eq!(clock_divisor(84_000_000, u32::MAX), None);
    }
}
