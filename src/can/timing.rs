// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bit timing for the CAN baud rate register.
//!
//! A bit is split into 16 time quanta (8 at 1 Mbit/s): one for sync, then
//! the propagation segment and the two phase segments. The propagation
//! segment is sized for a 20 m bus, which with driver and receiver delays
//! comes to a 190 ns one-way delay. Every field here holds the hardware
//! encoding, i.e. one less than the length it describes.

use super::CanError;

/// One-way bus delay in nanoseconds: 50 ns driver, 30 ns receiver, 110 ns
/// for 20 m of line.
const BUS_DELAY_NS: u32 = 50 + 30 + 110;

/// Widest prescaler `BR.BRP` can hold.
const BRP_MAX: u32 = 0x7F;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct BitTiming {
    pub brp: u8,
    pub propag: u8,
    pub phase1: u8,
    pub phase2: u8,
    pub sjw: u8,
}

impl BitTiming {
    pub fn compute(master_clock_hz: u32, bitrate_kbps: u32) -> Result<Self, CanError> {
        let bad = CanError::BitRate {
            master_clock_hz,
            bitrate_kbps,
        };
        let tq = if bitrate_kbps == 1000 { 8 } else { 16 };

        let brp = bitrate_kbps
            .checked_mul(1000 * tq)
            .filter(|&d| d != 0)
            .map(|d| master_clock_hz / d)
            .and_then(|q| q.checked_sub(1))
            .ok_or(bad)?;
        if brp == 0 || brp > BRP_MAX {
            return Err(bad);
        }

        let round_trip = u64::from(tq) * u64::from(bitrate_kbps) * 2 * u64::from(BUS_DELAY_NS)
            / 1_000_000;
        let propag = (round_trip.max(1) - 1) as u32;

        let t1t2 = tq.checked_sub(2 + propag).ok_or(bad)?;
        let (phase1, phase2) = if t1t2 % 2 == 1 {
            let p1 = ((t1t2 - 1) / 2).checked_sub(1).ok_or(bad)?;
            (p1, p1 + 1)
        } else {
            let p1 = (t1t2 / 2).checked_sub(1).ok_or(bad)?;
            (p1, p1)
        };
        let sjw = if phase1 + 1 > 4 { 3 } else { phase1 };

        if propag + phase1 + phase2 != tq - 4 || propag > 7 || phase1 > 7 || phase2 > 7 || sjw > 3
        {
            return Err(bad);
        }

        Ok(Self {
            brp: brp as u8,
            propag: propag as u8,
            phase1: phase1 as u8,
            phase2: phase2 as u8,
            sjw: sjw as u8,
        })
    }

    /// Encodes the timing for the `CAN_BR` register, sampling once per bit.
    pub fn br(&self) -> u32 {
        u32::from(self.phase2)
            | u32::from(self.phase1) << 4
            | u32::from(self.propag) << 8
            | u32::from(self.sjw) << 12
            | u32::from(self.brp) << 16
    }

    /// Time quanta per bit.
    pub fn quanta(&self) -> u32 {
        4 + u32::from(self.propag) + u32::from(self.phase1) + u32::from(self.phase2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MCK: u32 = 84_000_000;

    fn timing(brp: u8, propag: u8, phase1: u8, phase2: u8, sjw: u8) -> BitTiming {
        BitTiming {
            brp,
            propag,
            phase1,
            phase2,
            sjw,
        }
    }

    #[test]
    fn standard_rates_at_84mhz() {
        assert_eq!(BitTiming::compute(MCK, 1000), Ok(timing(9, 2, 1, 1, 1)));
        assert_eq!(BitTiming::compute(MCK, 800), Ok(timing(5, 3, 4, 5, 3)));
        assert_eq!(BitTiming::compute(MCK, 500), Ok(timing(9, 2, 5, 5, 3)));
        assert_eq!(BitTiming::compute(MCK, 125), Ok(timing(41, 0, 6, 6, 3)));
    }

    #[test]
    fn register_encoding() {
        let t = BitTiming::compute(MCK, 500).unwrap();
        assert_eq!(t.br(), 0x0009_3255);
        assert_eq!(t.quanta(), 16);
    }

    #[test]
    fn prescaler_out_of_range() {
        let bad = Err(CanError::BitRate {
            master_clock_hz: MCK,
            bitrate_kbps: 10,
        });
        assert_eq!(BitTiming::compute(MCK, 10), bad);
        // Too fast for the clock: the prescaler would be zero.
        assert!(BitTiming::compute(8_000_000, 500).is_err());
        assert!(BitTiming::compute(MCK, 0).is_err());
        assert!(BitTiming::compute(0, 500).is_err());
    }

    #[test]
    fn oversized_rate_does_not_overflow() {
        assert!(BitTiming::compute(MCK, u32::MAX).is_err());
    }
}
