// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::bsp::{configure_can, configure_console, Bsp, Pio};
use crate::can::regs::Controller;

// SAM3X-EK
//
// J3 (DBGU, DB9) - console on the UART
// - URXD => PA8
// - UTXD => PA9
//
// J20 (CAN0, SN65HVD234 transceiver)
// - CANTX0 => PA0
// - CANRX0 => PA1
//
// CAN1 has a transceiver too, at J21, but is left alone.

pub struct Board;

impl Bsp for Board {
    const MASTER_CLOCK_HZ: u32 = 84_000_000;
    const CONSOLE_BAUD: u32 = 115_200;

    const CAN_CONTROLLER: Controller = Controller::Can0;
    const CAN_BITRATE_KBPS: u32 = 1000;

    fn configure(pio: &Pio) {
        configure_console(pio);
        configure_can(pio, Self::CAN_CONTROLLER);
    }
}
