// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Peripheral interrupt dispatch.
//!
//! Rather than one linker-overridable symbol per vector, the firmware routes
//! every peripheral interrupt through a `HandlerTable`, and treats an
//! interrupt nobody registered for as fatal.

use core::sync::atomic::{AtomicUsize, Ordering};

use cortex_m::interrupt::InterruptNumber;

/// Number of peripheral interrupts on the SAM3X.
pub const IRQ_COUNT: usize = 45;

/// SAM3X peripheral interrupts used here. On this part the interrupt number
/// and the PMC peripheral identifier are the same thing.
#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Interrupt {
    Uart = 8,
    Can0 = 43,
    Can1 = 44,
}

// Safety: every variant is a valid SAM3X interrupt number.
unsafe impl InterruptNumber for Interrupt {
    #[inline]
    fn number(self) -> u16 {
        self as u16
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum VectorError {
    #[error("interrupt {0} is out of range")]
    OutOfRange(u16),
    #[error("interrupt {0} already has a handler")]
    AlreadyRegistered(u16),
}

/// An interrupt fired with no handler registered.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[error("no handler for interrupt {0}")]
pub struct Unhandled(pub u16);

pub struct HandlerTable<const N: usize> {
    /// `fn()` pointers as addresses, zero for none.
    handlers: [AtomicUsize; N],
}

impl<const N: usize> HandlerTable<N> {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: AtomicUsize = AtomicUsize::new(0);
        Self {
            handlers: [EMPTY; N],
        }
    }

    fn entry(&self, irq: u16) -> Option<&AtomicUsize> {
        self.handlers.get(usize::from(irq))
    }

    pub fn register<I: InterruptNumber>(&self, irq: I, handler: fn()) -> Result<(), VectorError> {
        let n = irq.number();
        let entry = self.entry(n).ok_or(VectorError::OutOfRange(n))?;
        entry
            .compare_exchange(0, handler as usize, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| VectorError::AlreadyRegistered(n))
    }

    /// Removes and returns the handler for `irq`.
    pub fn unregister<I: InterruptNumber>(&self, irq: I) -> Option<fn()> {
        let raw = self.entry(irq.number())?.swap(0, Ordering::AcqRel);
        Self::handler(raw)
    }

    fn handler(raw: usize) -> Option<fn()> {
        if raw == 0 {
            None
        } else {
            // Safety: the only nonzero values ever stored are `fn()`
            // pointers, in `register`.
            Some(unsafe { core::mem::transmute::<usize, fn()>(raw) })
        }
    }

    /// Runs the handler for peripheral interrupt `irq`.
    pub fn dispatch(&self, irq: u16) -> Result<(), Unhandled> {
        let raw = self
            .entry(irq)
            .map_or(0, |entry| entry.load(Ordering::Acquire));
        let handler = Self::handler(raw).ok_or(Unhandled(irq))?;
        handler();
        Ok(())
    }
}

impl<const N: usize> Default for HandlerTable<N> {
    fn default() -> Self {
        Self::new()
    }
}
