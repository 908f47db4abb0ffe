// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Peripheral clock gating in the power management controller.

use tock_registers::interfaces::Writeable;
use tock_registers::register_structs;
use tock_registers::registers::WriteOnly;

use crate::vectors::Interrupt;

const PMC_BASE: usize = 0x400E_0600;

register_structs! {
    PmcRegisters {
        (0x000 => _reserved0),
        (0x010 => pcer0: WriteOnly<u32>),
        (0x014 => pcdr0: WriteOnly<u32>),
        (0x018 => _reserved1),
        (0x100 => pcer1: WriteOnly<u32>),
        (0x104 => pcdr1: WriteOnly<u32>),
        (0x108 => @END),
    }
}

fn pmc() -> &'static PmcRegisters {
    // Safety: the PMC is always mapped, and the registers we use are
    // set/clear/status registers, so writes from different owners can't
    // undo each other.
    unsafe { &*(PMC_BASE as *const PmcRegisters) }
}

/// Which of the two gating banks holds a peripheral, and its bit there.
fn bank(peripheral: Interrupt) -> (usize, u32) {
    let id = peripheral as u16;
    (usize::from(id / 32), 1 << (id % 32))
}

pub fn enable_peripheral(peripheral: Interrupt) {
    match bank(peripheral) {
        (0, bit) => pmc().pcer0.set(bit),
        (_, bit) => pmc().pcer1.set(bit),
    }
}

pub fn disable_peripheral(peripheral: Interrupt) {
    match bank(peripheral) {
        (0, bit) => pmc().pcdr0.set(bit),
        (_, bit) => pmc().pcdr1.set(bit),
    }
}
