// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The serial loader program.
//!
//! Brings up the console UART and the board's CAN controller, then receives
//! files over XMODEM into RAM forever. Each successful transfer is announced
//! on the CAN bus with its length. The lib crate does the actual work; the
//! code here is the runtime setup around it.

#![no_std]
#![no_main]

use core::sync::atomic::{compiler_fence, Ordering};

use cortex_m_rt::{entry, exception, ExceptionFrame};
#[cfg(feature = "defmt-log")]
use defmt_rtt as _;
use sam3x_link::bsp::{Bsp, Pio};
use sam3x_link::can::regs::Sam3xCan;
use sam3x_link::can::Can;
use sam3x_link::time::{Duration, SysTickMonotonic};
use sam3x_link::uart::Uart;
use sam3x_link::vectors::{HandlerTable, IRQ_COUNT};
use sam3x_link::{announcement, xmodem};

// Select the appropriate BSP type as `Board`
cfg_if::cfg_if! {
    if #[cfg(feature = "target-board-sam3x-ek")] {
        use sam3x_link::bsp::sam3x_ek::Board;
    } else if #[cfg(feature = "target-board-adk2")] {
        use sam3x_link::bsp::adk2::Board;
    }
}

// Safety: this is the only `Sam3xCan` for this controller in the program.
static CAN: Can<Sam3xCan> = Can::new(unsafe { Sam3xCan::new(Board::CAN_CONTROLLER) });

static VECTORS: HandlerTable<IRQ_COUNT> = HandlerTable::new();

/// Largest file we'll take.
const IMAGE_LEN: usize = 64 * 1024;

const ANNOUNCE_MAILBOX: u8 = 0;

/// How long the CAN controller gets to join the bus before we carry on
/// without it.
const CAN_SYNC_TIMEOUT: Duration = Duration::millis(100);

#[entry]
fn main() -> ! {
    // Safety: This is sound as long as `steal` only happens once for each of
    // these, which we ensure by doing it at the top of `main`, which `entry`
    // makes hard to reentrantly call in safe code.
    let cp = unsafe { cortex_m::Peripherals::steal() };
    let pio = unsafe { Pio::steal() };
    let mut uart = unsafe { Uart::steal() };

    Board::configure(&pio);
    if let Err(_e) = uart.init(Board::MASTER_CLOCK_HZ, Board::CONSOLE_BAUD) {
        #[cfg(feature = "defmt-log")]
        defmt::error!("console UART: {}", _e);
        panic!();
    }
    let mut clock = SysTickMonotonic::new(cp.SYST, Board::MASTER_CLOCK_HZ);

    if let Err(_e) = VECTORS.register(CAN.peripheral().interrupt(), on_can) {
        #[cfg(feature = "defmt-log")]
        defmt::error!("CAN interrupt: {}", _e);
        panic!();
    }
    let can_up = match CAN
        .init(Board::MASTER_CLOCK_HZ, Board::CAN_BITRATE_KBPS)
        .and_then(|()| CAN.wait_synchronized(&mut clock, CAN_SYNC_TIMEOUT))
    {
        Ok(()) => true,
        Err(_e) => {
            #[cfg(feature = "defmt-log")]
            defmt::warn!("CAN unavailable, not announcing: {}", _e);
            false
        }
    };

    // Safety: `main` runs once, so this is the only reference to the buffer.
    let image = unsafe {
        static mut IMAGE: [u8; IMAGE_LEN] = [0; IMAGE_LEN];
        &mut *core::ptr::addr_of_mut!(IMAGE)
    };

    let config = xmodem::Config::default();
    loop {
        match xmodem::receive(&mut uart, &mut clock, &config, image) {
            Ok(len) => {
                #[cfg(feature = "defmt-log")]
                defmt::info!("received {} bytes", len);
                if can_up {
                    announce(len);
                }
            }
            Err(_e) => {
                #[cfg(feature = "defmt-log")]
                defmt::warn!("transfer failed: {}", _e);
            }
        }
    }
}

/// Sends the length of a finished transfer. If the previous announcement is
/// still waiting for the bus, this one is dropped.
fn announce(len: usize) {
    let result = announcement(ANNOUNCE_MAILBOX, len).and_then(|frame| CAN.write(&frame));
    if let Err(_e) = result {
        #[cfg(feature = "defmt-log")]
        defmt::warn!("announcement dropped: {}", _e);
    }
}

fn on_can() {
    CAN.handle_interrupt();
}

#[exception]
unsafe fn DefaultHandler(irqn: i16) {
    // Negative numbers are core exceptions, which nothing here expects.
    let handled = u16::try_from(irqn)
        .ok()
        .is_some_and(|irq| VECTORS.dispatch(irq).is_ok());
    if !handled {
        panic!();
    }
}

#[panic_handler]
fn panic_handler(_: &core::panic::PanicInfo) -> ! {
    // We use a BKPT instruction to wake any attached debugger. If no debugger
    // is attached, BKPT escalates into a HardFault, falling to the handler
    // below.
    loop {
        cortex_m::asm::bkpt();
    }
}

#[exception]
unsafe fn HardFault(_ef: &ExceptionFrame) -> ! {
    // Spin -- don't use BKPT here because if no debugger is attached it'll
    // escalate to another HardFault and lock the processor.
    loop {
        // This is enough to force LLVM to compile the infinite loop as
        // something other than a UDF, but not enough to generate instructions.
        compiler_fence(Ordering::SeqCst);
    }
}
