// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SAM3X CAN controller registers.

use cortex_m::peripheral::NVIC;
use static_assertions::const_assert;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

use super::{BitTiming, CanPeripheral, MailboxRegister, MAX_MAILBOXES};
use crate::pmc;
use crate::vectors::Interrupt;

pub const MAILBOX_COUNT: usize = 8;

const_assert!(MAILBOX_COUNT <= MAX_MAILBOXES);

const CAN0_BASE: usize = 0x400B_4000;
const CAN1_BASE: usize = 0x400B_8000;

register_structs! {
    pub CanRegisters {
        (0x000 => mr: ReadWrite<u32, MR::Register>),
        (0x004 => ier: WriteOnly<u32>),
        (0x008 => idr: WriteOnly<u32>),
        (0x00C => imr: ReadOnly<u32>),
        (0x010 => sr: ReadOnly<u32>),
        (0x014 => br: ReadWrite<u32, BR::Register>),
        (0x018 => _reserved0),
        (0x020 => ecr: ReadOnly<u32>),
        (0x024 => tcr: WriteOnly<u32>),
        (0x028 => acr: WriteOnly<u32>),
        (0x02C => _reserved1),
        (0x200 => mailboxes: [MailboxRegisters; MAILBOX_COUNT]),
        (0x300 => @END),
    },

    MailboxRegisters {
        (0x00 => mmr: ReadWrite<u32>),
        (0x04 => mam: ReadWrite<u32>),
        (0x08 => mid: ReadWrite<u32>),
        (0x0C => mfid: ReadOnly<u32>),
        (0x10 => msr: ReadOnly<u32>),
        (0x14 => mdl: ReadWrite<u32>),
        (0x18 => mdh: ReadWrite<u32>),
        (0x1C => mcr: WriteOnly<u32>),
        (0x20 => @END),
    }
}

register_bitfields![u32,
    MR [
        /// Controller enable
        CANEN OFFSET(0) NUMBITS(1) [],
        /// Low-power mode
        LPM OFFSET(1) NUMBITS(1) []
    ],
    BR [
        PHASE2 OFFSET(0) NUMBITS(3) [],
        PHASE1 OFFSET(4) NUMBITS(3) [],
        PROPAG OFFSET(8) NUMBITS(3) [],
        /// Resynchronization jump width
        SJW OFFSET(12) NUMBITS(2) [],
        /// Baud rate prescaler
        BRP OFFSET(16) NUMBITS(7) [],
        SMP OFFSET(24) NUMBITS(1) [
            Once = 0,
            ThreeTimes = 1
        ]
    ]
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Controller {
    Can0,
    Can1,
}

/// One of the two on-chip CAN controllers.
pub struct Sam3xCan {
    base: usize,
    interrupt: Interrupt,
}

impl Sam3xCan {
    /// # Safety
    ///
    /// The result drives the controller's registers directly; there must be
    /// only one of these per controller.
    pub const unsafe fn new(controller: Controller) -> Self {
        match controller {
            Controller::Can0 => Self {
                base: CAN0_BASE,
                interrupt: Interrupt::Can0,
            },
            Controller::Can1 => Self {
                base: CAN1_BASE,
                interrupt: Interrupt::Can1,
            },
        }
    }

    pub fn interrupt(&self) -> Interrupt {
        self.interrupt
    }

    fn regs(&self) -> &CanRegisters {
        // Safety: `base` is one of the two controller base addresses, which
        // are always mapped, and we're the only user by contract of `new`.
        unsafe { &*(self.base as *const CanRegisters) }
    }

    fn mailbox(&self, mailbox: usize) -> &MailboxRegisters {
        &self.regs().mailboxes[mailbox]
    }
}

impl CanPeripheral for Sam3xCan {
    const MAILBOX_COUNT: usize = MAILBOX_COUNT;

    fn power_on(&self) {
        pmc::enable_peripheral(self.interrupt);
        // Safety: the interrupt only ever runs `Can::handle_interrupt`,
        // which takes no locks, so unmasking it can't break a critical
        // section.
        unsafe { NVIC::unmask(self.interrupt) };
    }

    fn power_off(&self) {
        NVIC::mask(self.interrupt);
        pmc::disable_peripheral(self.interrupt);
    }

    fn error_counters(&self) -> (u8, u16) {
        let ecr = self.regs().ecr.get();
        ((ecr >> 16) as u8, (ecr & 0x1FF) as u16)
    }

    fn set_bit_timing(&self, timing: &BitTiming) {
        self.regs().br.write(
            BR::PHASE2.val(timing.phase2.into())
                + BR::PHASE1.val(timing.phase1.into())
                + BR::PROPAG.val(timing.propag.into())
                + BR::SJW.val(timing.sjw.into())
                + BR::BRP.val(timing.brp.into())
                + BR::SMP::Once,
        );
    }

    fn set_enabled(&self, enabled: bool) {
        let field = if enabled {
            MR::CANEN::SET
        } else {
            MR::CANEN::CLEAR
        };
        self.regs().mr.modify(field);
    }

    fn set_low_power(&self, low_power: bool) {
        let field = if low_power {
            MR::LPM::SET
        } else {
            MR::LPM::CLEAR
        };
        self.regs().mr.modify(field);
    }

    fn status(&self) -> u32 {
        self.regs().sr.get()
    }

    fn interrupt_mask(&self) -> u32 {
        self.regs().imr.get()
    }

    fn enable_interrupts(&self, sources: u32) {
        self.regs().ier.set(sources);
    }

    fn disable_interrupts(&self, sources: u32) {
        self.regs().idr.set(sources);
    }

    fn transfer_command(&self, mailboxes: u32) {
        self.regs().tcr.set(mailboxes);
    }

    fn abort_command(&self, mailboxes: u32) {
        self.regs().acr.set(mailboxes);
    }

    fn read_mailbox(&self, mailbox: usize, reg: MailboxRegister) -> u32 {
        let mb = self.mailbox(mailbox);
        match reg {
            MailboxRegister::Mode => mb.mmr.get(),
            MailboxRegister::AcceptanceMask => mb.mam.get(),
            MailboxRegister::Id => mb.mid.get(),
            MailboxRegister::FamilyId => mb.mfid.get(),
            MailboxRegister::Status => mb.msr.get(),
            MailboxRegister::DataLow => mb.mdl.get(),
            MailboxRegister::DataHigh => mb.mdh.get(),
            // Write-only.
            MailboxRegister::Control => 0,
        }
    }

    fn write_mailbox(&self, mailbox: usize, reg: MailboxRegister, value: u32) {
        let mb = self.mailbox(mailbox);
        match reg {
            MailboxRegister::Mode => mb.mmr.set(value),
            MailboxRegister::AcceptanceMask => mb.mam.set(value),
            MailboxRegister::Id => mb.mid.set(value),
            MailboxRegister::DataLow => mb.mdl.set(value),
            MailboxRegister::DataHigh => mb.mdh.set(value),
            MailboxRegister::Control => mb.mcr.set(value),
            // Read-only.
            MailboxRegister::FamilyId | MailboxRegister::Status => (),
        }
    }
}
