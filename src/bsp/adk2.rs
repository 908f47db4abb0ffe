// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::bsp::{configure_can, configure_console, Bsp, Pio};
use crate::can::regs::Controller;

// ADK2 (SAM3X8E)
//
// Programming header - console on the UART
// - URXD => PA8
// - UTXD => PA9
//
// Expansion header - CAN1
// - CANTX1 => PB14
// - CANRX1 => PB15

pub enum Board {}

impl Bsp for Board {
    const MASTER_CLOCK_HZ: u32 = 84_000_000;
    const CONSOLE_BAUD: u32 = 115_200;

    const CAN_CONTROLLER: Controller = Controller::Can1;
    const CAN_BITRATE_KBPS: u32 = 125;

    fn configure(pio: &Pio) {
        configure_console(pio);
        configure_can(pio, Self::CAN_CONTROLLER);
    }
}
