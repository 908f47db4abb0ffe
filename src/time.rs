// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Monotonic time for protocol timeouts.
//!
//! Everything that waits on hardware in this crate does so against a deadline
//! taken from a `Monotonic` clock, rather than by counting loop iterations.
//! Time is kept in microseconds.

use cortex_m::peripheral::{syst::SystClkSource, SYST};

/// Tick rate of `Instant` and `Duration`.
pub const TICK_HZ: u32 = 1_000_000;

pub type Instant = fugit::TimerInstantU64<TICK_HZ>;
pub type Duration = fugit::TimerDurationU64<TICK_HZ>;

/// A clock that never goes backwards.
///
/// `now` takes `&mut self` because cheap hardware counters tend to be narrower
/// than 64 bits and need to be extended in software by whoever reads them.
pub trait Monotonic {
    fn now(&mut self) -> Instant;

    /// Returns the instant `timeout` from now.
    fn deadline(&mut self, timeout: Duration) -> Instant {
        self.now() + timeout
    }

    /// Checks whether `deadline` has passed.
    fn expired(&mut self, deadline: Instant) -> bool {
        self.now() >= deadline
    }
}

impl<M: Monotonic + ?Sized> Monotonic for &mut M {
    fn now(&mut self) -> Instant {
        (**self).now()
    }
}

/// Monotonic clock built on the Cortex-M SysTick counter, free-running at the
/// core clock.
///
/// SysTick is only 24 bits wide, which wraps every 200ms or so at 84 MHz. We
/// extend it in software on every call to `now`, so the clock stays correct
/// as long as it's read at least once per wrap. Every wait loop in this crate
/// polls far more often than that.
pub struct SysTickMonotonic {
    /// Held so nothing else can reprogram the counter.
    _syst: SYST,
    cycles_per_tick: u64,
    last: u32,
    cycles: u64,
}

const SYST_MAX: u32 = 0x00FF_FFFF;

impl SysTickMonotonic {
    /// Takes over `syst` and starts it counting at `core_clock_hz`.
    pub fn new(mut syst: SYST, core_clock_hz: u32) -> Self {
        syst.disable_interrupt();
        syst.set_clock_source(SystClkSource::Core);
        syst.set_reload(SYST_MAX);
        syst.clear_current();
        syst.enable_counter();

        Self {
            _syst: syst,
            cycles_per_tick: u64::from(core_clock_hz / TICK_HZ).max(1),
            last: SYST_MAX,
            cycles: 0,
        }
    }
}

impl Monotonic for SysTickMonotonic {
    fn now(&mut self) -> Instant {
        // SysTick counts down.
        let current = SYST::get_current();
        let elapsed = self.last.wrapping_sub(current) & SYST_MAX;
        self.last = current;
        self.cycles += u64::from(elapsed);
        Instant::from_ticks(self.cycles / self.cycles_per_tick)
    }
}

#[cfg(test)]
pub(crate) mod test_clock {
    use super::*;

    /// Clock for tests: every read advances time by a fixed step, so a
    /// polling loop always makes progress towards its deadline.
    #[derive(Debug)]
    pub struct SteppingClock {
        now: u64,
        step: u64,
    }

    impl SteppingClock {
        pub fn new(step: Duration) -> Self {
            Self {
                now: 0,
                step: step.ticks(),
            }
        }

        pub fn elapsed(&self) -> Duration {
            Duration::from_ticks(self.now)
        }
    }

    impl Monotonic for SteppingClock {
        fn now(&mut self) -> Instant {
            self.now += self.step;
            Instant::from_ticks(self.now)
        }
    }

    #[test]
    fn deadline_expires_after_timeout() {
        let mut clock = SteppingClock::new(Duration::millis(1));
        let deadline = clock.deadline(Duration::millis(10));
        let mut polls = 0;
        while !clock.expired(deadline) {
            polls += 1;
        }
        assert_eq!(polls, 9);
        assert!(clock.elapsed() >= Duration::millis(11));
    }
}
