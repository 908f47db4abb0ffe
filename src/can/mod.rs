// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt-driven CAN mailbox driver.
//!
//! The controller has a fixed set of mailboxes, each of which holds one
//! frame. A transfer is requested from thread context with `write` or
//! `read`, which program the mailbox and return immediately. Completion is
//! signalled by the controller's interrupt, whose handler must call
//! `Can::handle_interrupt`.
//!
//! Each mailbox has a small state machine:
//!
//! ```text
//!  Reset --configure--> Ready --write/read--> Busy --tx done-----> Ready
//!                                              |  --rx done-----> Complete --take_received--> Ready
//!                                              |  --abort-------> Error
//!                                              |  --no MOT------> Error
//!  any state --reset_mailbox--> Reset
//! ```
//!
//! Thread context only ever moves a mailbox out of a state other than
//! `Busy`, and the interrupt handler only ever moves it out of `Busy`.
//! Together with the per-mailbox interrupt being masked whenever thread
//! context resets a mailbox, this means each transition has exactly one
//! writer and the driver needs no critical sections.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::time::{Duration, Monotonic};

pub mod regs;
pub mod timing;
pub mod transfer;

pub use timing::BitTiming;
pub use transfer::{CanId, MailboxMode, MailboxTransfer, ReceivedFrame};

/// Mailboxes the driver keeps state for. Peripherals may have fewer.
pub const MAX_MAILBOXES: usize = 8;
/// Data bytes in a CAN 2.0 frame.
pub const MAX_FRAME_LEN: usize = 8;

// Controller status and interrupt bits (SR, IER, IDR, IMR).
pub const SR_WAKEUP: u32 = 1 << 21;
pub const SR_ERRA: u32 = 1 << 16;
pub const SR_WARN: u32 = 1 << 17;
pub const SR_ERRP: u32 = 1 << 18;
pub const SR_BOFF: u32 = 1 << 19;
pub const SR_CERR: u32 = 1 << 24;
pub const SR_SERR: u32 = 1 << 25;
pub const SR_AERR: u32 = 1 << 26;
pub const SR_FERR: u32 = 1 << 27;
pub const SR_BERR: u32 = 1 << 28;
/// Status bits that report an error condition.
pub const SR_ERRORS: u32 = 0xFFCF_0000;
/// Frame errors, which are latched and cleared by reading SR.
pub const SR_FRAME_ERRORS: u32 = SR_CERR | SR_SERR | SR_BERR | SR_FERR | SR_AERR;
/// Every interrupt source in IDR.
pub const ALL_INTERRUPTS: u32 = 0x1FFF_FFFF;

// Mailbox register fields.
pub const MMR_PRIOR_SHIFT: u32 = 16;
pub const MMR_MOT_SHIFT: u32 = 24;
pub const MID_MIDVA_SHIFT: u32 = 18;
pub const MID_MIDE: u32 = 1 << 29;
pub const MID_EXTENDED_MASK: u32 = 0x1FFF_FFFF;
pub const MSR_MABT: u32 = 1 << 22;
pub const MSR_MRDY: u32 = 1 << 23;
pub const MCR_MDLC_SHIFT: u32 = 16;
pub const MCR_MTCR: u32 = 1 << 23;

/// Registers within a mailbox, by word offset.
#[repr(usize)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MailboxRegister {
    Mode = 0,
    AcceptanceMask = 1,
    Id = 2,
    FamilyId = 3,
    Status = 4,
    DataLow = 5,
    DataHigh = 6,
    Control = 7,
}

/// Register-level access to a CAN controller.
///
/// Mailbox indices passed in are always below `MAILBOX_COUNT`. Interrupt
/// masks use the controller's SR bit layout, where bit `n` is mailbox `n`.
pub trait CanPeripheral {
    const MAILBOX_COUNT: usize;

    /// Called first thing by `Can::init`.
    fn power_on(&self) {}
    /// Called last thing by `Can::disable`.
    fn power_off(&self) {}

    fn set_bit_timing(&self, timing: &BitTiming);
    /// Transmit and receive error counters, as `(tec, rec)`.
    fn error_counters(&self) -> (u8, u16);
    fn set_enabled(&self, enabled: bool);
    fn set_low_power(&self, low_power: bool);

    fn status(&self) -> u32;
    fn interrupt_mask(&self) -> u32;
    fn enable_interrupts(&self, sources: u32);
    fn disable_interrupts(&self, sources: u32);

    /// Starts transfers on every mailbox set in `mailboxes`.
    fn transfer_command(&self, mailboxes: u32);
    /// Aborts transfers on every mailbox set in `mailboxes`.
    fn abort_command(&self, mailboxes: u32);

    fn read_mailbox(&self, mailbox: usize, reg: MailboxRegister) -> u32;
    fn write_mailbox(&self, mailbox: usize, reg: MailboxRegister, value: u32);
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum MailboxState {
    Reset = 0,
    /// Programmed, with nothing in flight.
    Ready = 1,
    /// A transfer is in flight.
    Busy = 2,
    /// A received frame is waiting in `take_received`.
    Complete = 3,
    /// The hardware aborted the transfer. Needs `reset_mailbox`.
    Error = 4,
}

/// Status codes as reported to C-style callers.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CanStatus {
    Success = 0,
    Locked = 1,
    Aborted = 2,
    Reset = 3,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CanError {
    #[error("mailbox has a transfer outstanding")]
    Locked,
    #[error("mailbox transfer was aborted")]
    Aborted,
    #[error("no mailbox {0}")]
    NoSuchMailbox(u8),
    #[error("{0} bytes won't fit in a CAN frame")]
    FrameTooLong(usize),
    #[error("can't make {bitrate_kbps} kbit/s from {master_clock_hz} Hz")]
    BitRate {
        master_clock_hz: u32,
        bitrate_kbps: u32,
    },
    #[error("bus did not synchronize")]
    SyncTimeout,
}

impl CanError {
    /// The status code for errors that have one.
    pub fn status(&self) -> Option<CanStatus> {
        match self {
            Self::Locked => Some(CanStatus::Locked),
            Self::Aborted => Some(CanStatus::Aborted),
            _ => None,
        }
    }
}

struct MailboxSlot {
    state: AtomicU8,
    /// Written by the interrupt handler while `Busy`, read by thread context
    /// while `Complete`.
    frame: UnsafeCell<ReceivedFrame>,
}

impl MailboxSlot {
    #[allow(clippy::declare_interior_mutable_const)]
    const NEW: Self = Self {
        state: AtomicU8::new(MailboxState::Reset as u8),
        frame: UnsafeCell::new(ReceivedFrame::EMPTY),
    };

    fn state(&self) -> MailboxState {
        // Only this module stores to `state`, and only `MailboxState`s.
        MailboxState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(MailboxState::Error)
    }

    fn set(&self, state: MailboxState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

pub struct Can<P> {
    peripheral: P,
    slots: [MailboxSlot; MAX_MAILBOXES],
    /// Bit `n` is set while mailbox `n` has a transfer in flight or a
    /// received frame nobody has taken.
    in_use: AtomicU32,
    synchronized: AtomicBool,
    last_error: AtomicU32,
}

// Safety: the only non-Sync field is each slot's frame cell. The handler
// writes it only while the slot is `Busy` and publishes it with a release
// store of `Complete`; thread context reads it only after an acquire load
// of `Complete`, and never while `Busy`. So accesses never overlap.
unsafe impl<P: Sync> Sync for Can<P> {}

impl<P: CanPeripheral> Can<P> {
    pub const fn new(peripheral: P) -> Self {
        Self {
            peripheral,
            slots: [MailboxSlot::NEW; MAX_MAILBOXES],
            in_use: AtomicU32::new(0),
            synchronized: AtomicBool::new(false),
            last_error: AtomicU32::new(0),
        }
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    fn mailbox_count() -> usize {
        P::MAILBOX_COUNT.min(MAX_MAILBOXES)
    }

    fn slot(&self, mailbox: u8) -> Result<&MailboxSlot, CanError> {
        if usize::from(mailbox) < Self::mailbox_count() {
            Ok(&self.slots[usize::from(mailbox)])
        } else {
            Err(CanError::NoSuchMailbox(mailbox))
        }
    }

    /// Brings up the controller at `bitrate_kbps`, with every mailbox
    /// disabled.
    ///
    /// The controller then waits for 11 recessive bits before it joins the
    /// bus; `wait_synchronized` reports when that has happened.
    pub fn init(&self, master_clock_hz: u32, bitrate_kbps: u32) -> Result<(), CanError> {
        let timing = BitTiming::compute(master_clock_hz, bitrate_kbps).inspect_err(|_| {
            error!("no bit timing for {} kbit/s", bitrate_kbps);
        })?;
        debug!("bit timing {}", timing);

        self.synchronized.store(false, Ordering::Release);
        self.last_error.store(0, Ordering::Relaxed);

        let p = &self.peripheral;
        p.power_on();
        p.disable_interrupts(ALL_INTERRUPTS);
        p.set_bit_timing(&timing);
        self.reset_all_mailboxes();
        p.enable_interrupts(SR_FRAME_ERRORS | SR_WAKEUP);
        p.set_low_power(false);
        p.set_enabled(true);

        info!("CAN up at {} kbit/s", bitrate_kbps);
        Ok(())
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    pub fn wait_synchronized<M: Monotonic>(
        &self,
        clock: &mut M,
        timeout: Duration,
    ) -> Result<(), CanError> {
        let deadline = clock.deadline(timeout);
        while !self.is_synchronized() {
            if clock.expired(deadline) {
                error!("CAN synchronization timed out");
                return Err(CanError::SyncTimeout);
            }
        }
        Ok(())
    }

    /// Checks that a mailbox can take a new request.
    fn claim(&self, mailbox: u8) -> Result<&MailboxSlot, CanError> {
        let slot = self.slot(mailbox)?;
        match slot.state() {
            MailboxState::Reset | MailboxState::Ready => Ok(slot),
            MailboxState::Busy | MailboxState::Complete => Err(CanError::Locked),
            MailboxState::Error => Err(CanError::Aborted),
        }
    }

    fn program(&self, transfer: &MailboxTransfer) {
        use MailboxRegister::*;

        let p = &self.peripheral;
        let mb = usize::from(transfer.mailbox);

        // The mailbox has to be disabled while MAM and MID are written.
        p.write_mailbox(mb, Control, 0);
        p.write_mailbox(mb, Mode, 0);
        let mam = if transfer.identifier & MID_MIDE != 0 {
            transfer.acceptance_mask | MID_MIDE
        } else {
            transfer.acceptance_mask & !MID_MIDE
        };
        p.write_mailbox(mb, AcceptanceMask, mam);
        p.write_mailbox(mb, Id, transfer.identifier);
        p.write_mailbox(mb, Mode, transfer.mode);
        p.write_mailbox(mb, DataLow, transfer.data_low);
        p.write_mailbox(mb, DataHigh, transfer.data_high);
        p.write_mailbox(mb, Control, transfer.control);
    }

    /// Programs a mailbox without starting a transfer.
    pub fn configure(&self, transfer: &MailboxTransfer) -> Result<(), CanError> {
        let slot = self.claim(transfer.mailbox)?;
        self.program(transfer);
        slot.set(MailboxState::Ready);
        Ok(())
    }

    /// Programs a mailbox and starts sending its frame.
    ///
    /// Returns `Locked` without touching the hardware if the mailbox already
    /// has a transfer outstanding.
    pub fn write(&self, transfer: &MailboxTransfer) -> Result<(), CanError> {
        let slot = self.claim(transfer.mailbox)?;
        let bit = 1 << transfer.mailbox;

        self.program(transfer);
        slot.set(MailboxState::Busy);
        self.in_use.fetch_or(bit, Ordering::AcqRel);
        self.peripheral.transfer_command(bit);
        self.peripheral.enable_interrupts(bit);

        trace!("write on mailbox {}", transfer.mailbox);
        Ok(())
    }

    /// Programs a mailbox to receive one frame. The frame is picked up with
    /// `take_received` once the mailbox reaches `Complete`.
    pub fn read(&self, transfer: &MailboxTransfer) -> Result<(), CanError> {
        let slot = self.claim(transfer.mailbox)?;
        let bit = 1 << transfer.mailbox;

        self.program(transfer);
        slot.set(MailboxState::Busy);
        self.in_use.fetch_or(bit, Ordering::AcqRel);
        self.peripheral.enable_interrupts(bit);

        trace!("read on mailbox {}", transfer.mailbox);
        Ok(())
    }

    pub fn state(&self, mailbox: u8) -> Result<MailboxState, CanError> {
        Ok(self.slot(mailbox)?.state())
    }

    /// True unless the mailbox has a transfer in flight.
    pub fn is_idle(&self, mailbox: u8) -> bool {
        !matches!(self.state(mailbox), Ok(MailboxState::Busy))
    }

    pub fn status(&self, mailbox: u8) -> Result<CanStatus, CanError> {
        Ok(match self.state(mailbox)? {
            MailboxState::Reset => CanStatus::Reset,
            MailboxState::Ready => CanStatus::Success,
            MailboxState::Busy | MailboxState::Complete => CanStatus::Locked,
            MailboxState::Error => CanStatus::Aborted,
        })
    }

    pub fn in_use(&self) -> u32 {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> u32 {
        self.last_error.load(Ordering::Relaxed)
    }

    /// The controller's transmit and receive error counters, as `(tec, rec)`.
    pub fn error_counters(&self) -> (u8, u16) {
        self.peripheral.error_counters()
    }

    /// Takes the frame received on `mailbox`, if there is one, and frees the
    /// mailbox for another request.
    pub fn take_received(&self, mailbox: u8) -> Option<ReceivedFrame> {
        let slot = self.slot(mailbox).ok()?;
        if slot.state() != MailboxState::Complete {
            return None;
        }
        // Safety: the slot is `Complete`, so the handler is done with the
        // frame and won't touch it again until we move the slot to `Busy`.
        let frame = unsafe { *slot.frame.get() };
        slot.set(MailboxState::Ready);
        self.in_use.fetch_and(!(1 << mailbox), Ordering::AcqRel);
        Some(frame)
    }

    /// Asks the hardware to abort the transfer on `mailbox`. The mailbox
    /// moves to `Error` when the controller confirms.
    pub fn abort(&self, mailbox: u8) -> Result<(), CanError> {
        let slot = self.slot(mailbox)?;
        if slot.state() == MailboxState::Busy {
            self.peripheral.abort_command(1 << mailbox);
        }
        Ok(())
    }

    /// Disables `mailbox` and forgets whatever it was doing.
    pub fn reset_mailbox(&self, mailbox: u8) -> Result<(), CanError> {
        let slot = self.slot(mailbox)?;
        let bit = 1 << mailbox;

        // Mask first, so the handler leaves the mailbox alone from here on.
        self.peripheral.disable_interrupts(bit);
        self.program(&MailboxTransfer::disabled(mailbox));
        slot.set(MailboxState::Reset);
        self.in_use.fetch_and(!bit, Ordering::AcqRel);
        Ok(())
    }

    pub fn reset_all_mailboxes(&self) {
        for mailbox in 0..Self::mailbox_count() as u8 {
            // In range by construction.
            let _ = self.reset_mailbox(mailbox);
        }
        self.in_use.store(0, Ordering::Release);
    }

    /// Shuts the controller down: all interrupts masked, low-power mode,
    /// then `power_off`.
    pub fn disable(&self) {
        let p = &self.peripheral;
        p.disable_interrupts(ALL_INTERRUPTS);
        p.set_low_power(true);
        p.power_off();
        self.synchronized.store(false, Ordering::Release);
        info!("CAN disabled");
    }

    /// Services the controller interrupt.
    pub fn handle_interrupt(&self) {
        let p = &self.peripheral;
        let status = p.status() & p.interrupt_mask();
        p.disable_interrupts(status);

        if status & SR_WAKEUP != 0 {
            self.synchronized.store(true, Ordering::Release);
            debug!("CAN synchronized");
        }

        for mailbox in 0..Self::mailbox_count() {
            if status & (1 << mailbox) != 0 {
                self.complete(mailbox);
            }
        }

        let errors = status & SR_ERRORS;
        if errors != 0 {
            self.last_error.store(errors, Ordering::Relaxed);
            self.bus_error(status);
            // Frame errors are one-shot events, keep listening for them.
            p.enable_interrupts(errors & SR_FRAME_ERRORS);
        }
    }

    fn complete(&self, mailbox: usize) {
        use MailboxRegister::*;

        let p = &self.peripheral;
        let slot = &self.slots[mailbox];
        let bit = 1 << mailbox;

        if slot.state() != MailboxState::Busy {
            warn!("interrupt on idle mailbox {}", mailbox);
            return;
        }

        let msr = p.read_mailbox(mailbox, Status);
        if msr & MSR_MABT != 0 {
            warn!("mailbox {} aborted", mailbox);
            slot.set(MailboxState::Error);
            self.in_use.fetch_and(!bit, Ordering::AcqRel);
            return;
        }
        if msr & MSR_MRDY == 0 {
            // Nothing to do yet; wait for the next event.
            p.enable_interrupts(bit);
            return;
        }

        match MailboxMode::from_mmr(p.read_mailbox(mailbox, Mode)) {
            // Its interrupt is already masked, so it would sit `Busy`
            // forever. Report it as aborted instead.
            None | Some(MailboxMode::Disabled) => {
                error!("mailbox {} completed with no object type", mailbox);
                slot.set(MailboxState::Error);
                self.in_use.fetch_and(!bit, Ordering::AcqRel);
            }
            Some(mode) if mode.receives() => {
                let frame = ReceivedFrame::from_registers(
                    mailbox as u8,
                    p.read_mailbox(mailbox, Id),
                    msr,
                    p.read_mailbox(mailbox, DataLow),
                    p.read_mailbox(mailbox, DataHigh),
                );
                // Safety: the slot is `Busy`, so thread context isn't
                // looking at the frame; publishing `Complete` below hands it
                // over.
                unsafe { *slot.frame.get() = frame };
                // Release the mailbox for the next frame.
                p.write_mailbox(mailbox, Control, MCR_MTCR);
                slot.set(MailboxState::Complete);
                trace!("mailbox {} received {}", mailbox, frame.id);
            }
            Some(_) => {
                slot.set(MailboxState::Ready);
                self.in_use.fetch_and(!bit, Ordering::AcqRel);
                trace!("mailbox {} sent", mailbox);
            }
        }
    }

    fn bus_error(&self, status: u32) {
        let (tec, rec) = self.error_counters();
        debug!("CAN status {=u32:#x}, tec {} rec {}", status, tec, rec);

        if status & SR_ERRA != 0 {
            warn!("CAN error active");
        } else if status & SR_ERRP != 0 {
            warn!("CAN error passive");
        } else if status & SR_BOFF != 0 {
            error!("CAN bus off, restarting controller");
            self.peripheral.set_enabled(false);
            self.peripheral.set_enabled(true);
        }
        if status & SR_WARN != 0 {
            warn!("CAN error counter warning");
        }

        if status & SR_CERR != 0 {
            warn!("CAN CRC error");
        } else if status & SR_SERR != 0 {
            warn!("CAN stuffing error");
        } else if status & SR_BERR != 0 {
            warn!("CAN bit error");
        } else if status & SR_FERR != 0 {
            warn!("CAN form error");
        } else if status & SR_AERR != 0 {
            warn!("CAN acknowledgment error");
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    use hex_literal::hex;

    use super::*;
    use crate::time::test_clock::SteppingClock;

    const MCK: u32 = 84_000_000;

    /// In-memory controller with four mailboxes.
    #[derive(Default)]
    struct FakeCan {
        powered: Cell<bool>,
        enabled: Cell<bool>,
        low_power: Cell<bool>,
        restarts: Cell<u32>,
        tec: Cell<u8>,
        /// Reads of the error counters.
        counters: Cell<u32>,
        timing: Cell<Option<BitTiming>>,
        sr: Cell<u32>,
        imr: Cell<u32>,
        tcr: Cell<u32>,
        acr: Cell<u32>,
        mailboxes: RefCell<[[u32; 8]; 4]>,
    }

    impl CanPeripheral for FakeCan {
        const MAILBOX_COUNT: usize = 4;

        fn power_on(&self) {
            self.powered.set(true);
        }

        fn power_off(&self) {
            self.powered.set(false);
        }

        fn set_bit_timing(&self, timing: &BitTiming) {
            self.timing.set(Some(*timing));
        }

        fn error_counters(&self) -> (u8, u16) {
            self.counters.set(self.counters.get() + 1);
            (self.tec.get(), 0)
        }

        fn set_enabled(&self, enabled: bool) {
            if enabled && !self.enabled.get() {
                self.restarts.set(self.restarts.get() + 1);
            }
            self.enabled.set(enabled);
        }

        fn set_low_power(&self, low_power: bool) {
            self.low_power.set(low_power);
        }

        fn status(&self) -> u32 {
            self.sr.get()
        }

        fn interrupt_mask(&self) -> u32 {
            self.imr.get()
        }

        fn enable_interrupts(&self, sources: u32) {
            self.imr.set(self.imr.get() | sources);
        }

        fn disable_interrupts(&self, sources: u32) {
            self.imr.set(self.imr.get() & !sources);
        }

        fn transfer_command(&self, mailboxes: u32) {
            self.tcr.set(self.tcr.get() | mailboxes);
        }

        fn abort_command(&self, mailboxes: u32) {
            self.acr.set(self.acr.get() | mailboxes);
        }

        fn read_mailbox(&self, mailbox: usize, reg: MailboxRegister) -> u32 {
            self.mailboxes.borrow()[mailbox][reg as usize]
        }

        fn write_mailbox(&self, mailbox: usize, reg: MailboxRegister, value: u32) {
            self.mailboxes.borrow_mut()[mailbox][reg as usize] = value;
        }
    }

    impl FakeCan {
        /// Makes the controller report an event on `mailbox` with the given
        /// mailbox status.
        fn raise(&self, mailbox: usize, msr: u32) {
            self.mailboxes.borrow_mut()[mailbox][MailboxRegister::Status as usize] = msr;
            self.sr.set(self.sr.get() | 1 << mailbox);
        }

        fn snapshot(&self) -> (Vec<[u32; 8]>, u32, u32) {
            (self.mailboxes.borrow().to_vec(), self.tcr.get(), self.imr.get())
        }
    }

    fn can() -> Can<FakeCan> {
        let can = Can::new(FakeCan::default());
        can.init(MCK, 500).unwrap();
        can
    }

    fn frame(mailbox: u8, data: &[u8]) -> MailboxTransfer {
        MailboxTransfer::transmit(mailbox, CanId::Standard(0x7E0), data).unwrap()
    }

    #[test]
    fn init_programs_controller() {
        let can = can();
        let p = can.peripheral();
        assert!(p.powered.get());
        assert!(p.enabled.get());
        assert_eq!(p.timing.get().map(|t| t.br()), Some(0x0009_3255));
        assert_eq!(p.imr.get(), SR_FRAME_ERRORS | SR_WAKEUP);
        for mb in 0..4 {
            assert_eq!(can.state(mb), Ok(MailboxState::Reset));
            assert_eq!(can.status(mb), Ok(CanStatus::Reset));
        }
        assert_eq!(can.in_use(), 0);
        assert!(!can.is_synchronized());
    }

    #[test]
    fn init_rejects_bad_bit_rate_untouched() {
        let can = Can::new(FakeCan::default());
        assert_eq!(
            can.init(MCK, 10),
            Err(CanError::BitRate {
                master_clock_hz: MCK,
                bitrate_kbps: 10,
            })
        );
        assert!(!can.peripheral().powered.get());
        assert_eq!(can.peripheral().timing.get(), None);
    }

    #[test]
    fn write_on_busy_mailbox_is_locked() {
        let can = can();
        can.write(&frame(0, &hex!("de ad be ef"))).unwrap();
        let before = can.peripheral().snapshot();

        let second = frame(0, &hex!("01 02"));
        assert_eq!(can.write(&second), Err(CanError::Locked));
        assert_eq!(can.read(&second), Err(CanError::Locked));
        assert_eq!(can.configure(&second), Err(CanError::Locked));
        assert_eq!(CanError::Locked.status(), Some(CanStatus::Locked));

        assert_eq!(can.peripheral().snapshot(), before);
        assert_eq!(can.state(0), Ok(MailboxState::Busy));
        assert_eq!(can.status(0), Ok(CanStatus::Locked));
    }

    #[test]
    fn write_programs_and_starts_mailbox() {
        let can = can();
        can.write(&frame(1, &hex!("de ad be ef 01"))).unwrap();

        let p = can.peripheral();
        let regs = p.mailboxes.borrow()[1];
        assert_eq!(regs[MailboxRegister::Id as usize], 0x7E0 << 18);
        assert_eq!(regs[MailboxRegister::DataLow as usize], 0xEFBE_ADDE);
        assert_eq!(regs[MailboxRegister::DataHigh as usize], 0x01);
        assert_eq!(regs[MailboxRegister::Control as usize], 5 << 16);
        assert_eq!(
            MailboxMode::from_mmr(regs[MailboxRegister::Mode as usize]),
            Some(MailboxMode::Transmit)
        );
        assert_eq!(p.tcr.get(), 0b10);
        assert_ne!(p.imr.get() & 0b10, 0);
        assert_eq!(can.in_use(), 0b10);
        assert!(!can.is_idle(1));
    }

    #[test]
    fn transmit_completion_frees_mailbox() {
        let can = can();
        can.write(&frame(0, &[1, 2, 3])).unwrap();
        assert_eq!(can.state(0), Ok(MailboxState::Busy));

        can.peripheral().raise(0, MSR_MRDY);
        can.handle_interrupt();

        assert_eq!(can.state(0), Ok(MailboxState::Ready));
        assert_eq!(can.in_use() & 1, 0);
        assert!(can.is_idle(0));
        assert_eq!(can.status(0), Ok(CanStatus::Success));
        // The mailbox interrupt is masked until the next request.
        assert_eq!(can.peripheral().imr.get() & 1, 0);

        can.write(&frame(0, &[4])).unwrap();
    }

    #[test]
    fn receive_latches_frame_until_taken() {
        let can = can();
        can.read(&MailboxTransfer::receive(2, CanId::Extended(0x1234_5678), 0))
            .unwrap();
        assert_eq!(can.in_use(), 0b100);
        assert_eq!(can.take_received(2), None);

        let p = can.peripheral();
        {
            let mut mb = p.mailboxes.borrow_mut();
            mb[2][MailboxRegister::Id as usize] = CanId::Extended(0x0ABC_DEF0).mid();
            mb[2][MailboxRegister::DataLow as usize] = 0x0403_0201;
            mb[2][MailboxRegister::DataHigh as usize] = 0x0807_0605;
        }
        p.raise(2, MSR_MRDY | 6 << 16);
        can.handle_interrupt();

        assert_eq!(can.state(2), Ok(MailboxState::Complete));
        assert!(can.is_idle(2));
        assert_eq!(can.in_use(), 0b100);
        assert_eq!(can.write(&frame(2, &[])), Err(CanError::Locked));
        assert_eq!(
            p.mailboxes.borrow()[2][MailboxRegister::Control as usize],
            MCR_MTCR
        );

        let got = can.take_received(2).unwrap();
        assert_eq!(got.mailbox, 2);
        assert_eq!(got.id, CanId::Extended(0x0ABC_DEF0));
        assert_eq!(got.payload(), &hex!("01 02 03 04 05 06"));
        assert_eq!(can.state(2), Ok(MailboxState::Ready));
        assert_eq!(can.in_use(), 0);
        assert_eq!(can.take_received(2), None);
    }

    #[test]
    fn abort_needs_reset() {
        let can = can();
        can.write(&frame(3, &[9])).unwrap();
        can.abort(3).unwrap();
        assert_eq!(can.peripheral().acr.get(), 0b1000);

        can.peripheral().raise(3, MSR_MRDY | MSR_MABT);
        can.handle_interrupt();

        assert_eq!(can.state(3), Ok(MailboxState::Error));
        assert_eq!(can.status(3), Ok(CanStatus::Aborted));
        assert_eq!(can.in_use(), 0);
        assert_eq!(can.write(&frame(3, &[9])), Err(CanError::Aborted));

        can.reset_mailbox(3).unwrap();
        assert_eq!(can.state(3), Ok(MailboxState::Reset));
        assert_eq!(can.peripheral().mailboxes.borrow()[3][MailboxRegister::Mode as usize], 0);
        can.write(&frame(3, &[9])).unwrap();
    }

    #[test]
    fn reset_all_clears_in_use() {
        let can = can();
        can.write(&frame(0, &[1])).unwrap();
        can.read(&MailboxTransfer::receive(1, CanId::Standard(5), 0x7FF))
            .unwrap();
        assert_eq!(can.in_use(), 0b11);

        can.reset_all_mailboxes();

        assert_eq!(can.in_use(), 0);
        for mb in 0..4 {
            assert_eq!(can.state(mb), Ok(MailboxState::Reset));
        }
        assert_eq!(can.peripheral().imr.get() & 0xFF, 0);
    }

    #[test]
    fn configure_readies_mailbox() {
        let can = can();
        can.configure(&frame(1, &[1])).unwrap();
        assert_eq!(can.state(1), Ok(MailboxState::Ready));
        assert_eq!(can.in_use(), 0);
        assert_eq!(can.peripheral().tcr.get(), 0);
    }

    #[test]
    fn wakeup_synchronizes() {
        let can = can();
        let mut clock = SteppingClock::new(Duration::millis(1));
        assert_eq!(
            can.wait_synchronized(&mut clock, Duration::millis(10)),
            Err(CanError::SyncTimeout)
        );

        can.peripheral().sr.set(SR_WAKEUP);
        can.handle_interrupt();

        assert!(can.is_synchronized());
        assert_eq!(can.wait_synchronized(&mut clock, Duration::millis(10)), Ok(()));
        assert_eq!(can.peripheral().imr.get() & SR_WAKEUP, 0);
    }

    #[test]
    fn bus_off_restarts_controller() {
        let can = can();
        let p = can.peripheral();
        let restarts = p.restarts.get();
        p.enable_interrupts(SR_BOFF);
        p.sr.set(SR_BOFF | SR_CERR);

        can.handle_interrupt();

        assert_eq!(p.restarts.get(), restarts + 1);
        assert!(p.enabled.get());
        assert_eq!(can.last_error(), SR_BOFF | SR_CERR);
        assert_ne!(p.imr.get() & SR_CERR, 0);
        assert_eq!(p.imr.get() & SR_BOFF, 0);
    }

    #[test]
    fn masked_sources_are_ignored() {
        let can = can();
        can.write(&frame(0, &[1])).unwrap();
        can.peripheral().raise(1, MSR_MRDY);
        can.peripheral().raise(0, 0);
        can.handle_interrupt();
        // Mailbox 0 flagged without MRDY stays busy and stays armed.
        assert_eq!(can.state(0), Ok(MailboxState::Busy));
        assert_ne!(can.peripheral().imr.get() & 1, 0);
        assert_eq!(can.state(1), Ok(MailboxState::Reset));
    }

    #[test]
    fn mailbox_index_is_checked() {
        let can = can();
        assert_eq!(can.write(&frame(4, &[])), Err(CanError::NoSuchMailbox(4)));
        assert_eq!(can.state(7), Err(CanError::NoSuchMailbox(7)));
        assert_eq!(can.reset_mailbox(200), Err(CanError::NoSuchMailbox(200)));
        assert!(can.is_idle(9));
        assert_eq!(can.take_received(9), None);
    }

    #[test]
    fn disable_powers_down() {
        let can = can();
        can.disable();
        let p = can.peripheral();
        assert!(!p.powered.get());
        assert!(p.low_power.get());
        assert_eq!(p.imr.get(), 0);
    }

    /// Starts a read on mailbox 0 with the given object type, and has the
    /// controller report it ready.
    fn complete_as(mode: u32) -> Can<FakeCan> {
        let can = can();
        let request = MailboxTransfer {
            mode,
            ..MailboxTransfer::receive(0, CanId::Standard(0x321), 0x7FF)
        };
        can.read(&request).unwrap();
        can.peripheral().mailboxes.borrow_mut()[0][MailboxRegister::DataLow as usize] = 0xAA;
        can.peripheral().raise(0, MSR_MRDY | 1 << 16);
        can.handle_interrupt();
        can
    }

    #[test]
    fn receive_type_mailboxes_latch_a_frame() {
        for mode in [
            MailboxMode::Receive,
            MailboxMode::ReceiveOverwrite,
            MailboxMode::Consumer,
        ] {
            let can = complete_as(mode.mmr());
            assert_eq!(can.state(0), Ok(MailboxState::Complete), "{mode:?}");
            assert_eq!(can.in_use(), 1, "{mode:?}");
            let got = can.take_received(0).unwrap();
            assert_eq!(got.payload(), &[0xAA], "{mode:?}");
        }
    }

    #[test]
    fn transmit_type_mailboxes_go_back_to_ready() {
        for mode in [MailboxMode::Transmit, MailboxMode::Producer] {
            let can = complete_as(mode.mmr());
            assert_eq!(can.state(0), Ok(MailboxState::Ready), "{mode:?}");
            assert_eq!(can.in_use(), 0, "{mode:?}");
            assert_eq!(can.take_received(0), None, "{mode:?}");
        }
    }

    #[test]
    fn completion_without_object_type_is_aborted() {
        for mode in [MailboxMode::Disabled.mmr(), 6 << MMR_MOT_SHIFT] {
            let can = complete_as(mode);
            assert_eq!(can.state(0), Ok(MailboxState::Error));
            assert_eq!(can.status(0), Ok(CanStatus::Aborted));
            assert_eq!(can.in_use(), 0);
            assert!(can.is_idle(0));
            assert_eq!(can.write(&frame(0, &[1])), Err(CanError::Aborted));

            can.reset_mailbox(0).unwrap();
            can.write(&frame(0, &[1])).unwrap();
        }
    }

    #[test]
    fn bus_errors_read_error_counters() {
        let can = can();
        let p = can.peripheral();
        p.tec.set(97);
        assert_eq!(can.error_counters(), (97, 0));

        let reads = p.counters.get();
        p.sr.set(SR_AERR);
        can.handle_interrupt();
        assert_eq!(p.counters.get(), reads + 1);

        // No error bits, no read.
        p.sr.set(0);
        can.handle_interrupt();
        assert_eq!(p.counters.get(), reads + 1);
    }
}
