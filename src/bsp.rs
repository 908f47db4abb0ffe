// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types and hooks for implementing Board Support Packages (BSPs) for the
//! loader.
//!
//! The loader needs to know very little about the board: what the master
//! clock runs at, how fast to talk on the console and on the CAN bus, and
//! which CAN controller is wired to a transceiver.
//!
//! To implement a BSP:
//!
//! 1. Create a module within `bsp` named after your board.
//! 2. Define a type in the module called `Board`. This type will never be
//!    instantiated, so it can be arbitrary; an empty enum is easy.
//! 3. Implement `bsp::Bsp` for your `Board` type.
//! 4. Add a `target-board-*` feature to `Cargo.toml`.
//! 5. Add a branch to the `cfg_if` in `src/bin/loader.rs` to detect your board
//!    and select the right `Board` type.

// Every BSP is always compiled, so they all get build-checked no matter
// which board is selected.
pub mod adk2;
pub mod sam3x_ek;

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_structs;
use tock_registers::registers::{ReadWrite, WriteOnly};

use crate::can::regs::Controller;

/// Requirements placed upon a BSP type.
pub trait Bsp {
    /// Master clock frequency. The loader doesn't touch the clock tree, so
    /// this is whatever the board runs at when the loader starts.
    const MASTER_CLOCK_HZ: u32;
    const CONSOLE_BAUD: u32;

    /// The controller with a transceiver behind it.
    const CAN_CONTROLLER: Controller;
    const CAN_BITRATE_KBPS: u32;

    /// Set up any I/Os needed for the board.
    fn configure(pio: &Pio);
}

const PIOA_BASE: usize = 0x400E_0E00;
const PIOB_BASE: usize = 0x400E_1000;

register_structs! {
    PioRegisters {
        (0x00 => _reserved0),
        /// Hands pins over to their peripheral function.
        (0x04 => pdr: WriteOnly<u32>),
        (0x08 => _reserved1),
        /// Peripheral A/B select, 0 for A.
        (0x70 => absr: ReadWrite<u32>),
        (0x74 => @END),
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Port {
    A,
    B,
}

/// The parallel I/O controllers, as far as the loader needs them.
pub struct Pio(());

impl Pio {
    /// # Safety
    ///
    /// Pin assignment does a read-modify-write of the A/B select register,
    /// so nothing else may be assigning pins at the same time.
    pub unsafe fn steal() -> Self {
        Self(())
    }

    fn regs(port: Port) -> &'static PioRegisters {
        let base = match port {
            Port::A => PIOA_BASE,
            Port::B => PIOB_BASE,
        };
        // Safety: both controllers are always mapped.
        unsafe { &*(base as *const PioRegisters) }
    }

    /// Gives `pins` on `port` to their peripheral A function.
    pub fn assign_peripheral_a(&self, port: Port, pins: u32) {
        let regs = Self::regs(port);
        regs.absr.set(regs.absr.get() & !pins);
        regs.pdr.set(pins);
    }
}

/// URXD and UTXD, PA8 and PA9. Every SAM3X board routes them the same way.
pub fn configure_console(pio: &Pio) {
    pio.assign_peripheral_a(Port::A, 1 << 8 | 1 << 9);
}

/// CANTX and CANRX for `controller`: PA0 and PA1 for CAN0, PB14 and PB15 for
/// CAN1.
pub fn configure_can(pio: &Pio, controller: Controller) {
    match controller {
        Controller::Can0 => pio.assign_peripheral_a(Port::A, 1 << 0 | 1 << 1),
        Controller::Can1 => pio.assign_peripheral_a(Port::B, 1 << 14 | 1 << 15),
    }
}
