//! `tinycrc`: a tiny CRC implementation.
//!
//! This is a CRC16 implementation that focuses on size over performance. It
//! uses no lookup tables and about 8 bytes of RAM (or, in the common case when
//! it gets inlined, a handful of registers). The XMODEM receiver folds each
//! byte in as it comes off the wire, so a 512-byte table would buy us nothing
//! but flash usage.
//!
//! Algorithms are those defined in the `crc_catalog` crate, used by `crc` (a
//! crate that you should use instead if performance is important).

#![no_std]

use crc_catalog::Algorithm;

/// Generator polynomial of CRC-16/XMODEM (a.k.a. CRC-16/CCITT, unreflected).
pub const XMODEM_POLY: u16 = 0x1021;

/// Folds `byte` into the CRC-16/XMODEM accumulator `crc` and returns the new
/// accumulator.
///
/// The byte is XORed into the high half of the accumulator, and then the
/// accumulator is shifted left eight times, XORing in the polynomial whenever
/// a set bit falls off the top. Starting from an accumulator of zero and
/// folding every payload byte produces the value an XMODEM-CRC sender puts in
/// the block trailer.
#[inline]
pub fn crc16_update(crc: u16, byte: u8) -> u16 {
    crc16_step(XMODEM_POLY, crc, byte)
}

/// One byte of an unreflected CRC16 with generator `poly`.
#[inline]
fn crc16_step(poly: u16, crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ (u16::from(byte) << 8);
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ poly
        } else {
            crc << 1
        };
    }
    crc
}

/// A CRC16 operation-in-progress using a particular algorithm.
#[derive(Clone, Debug)]
pub struct Crc16 {
    /// Algorithm polynomial, bit-reversed if `reflect_in` is set.
    poly: u16,
    /// Should data be bit-reversed on the way in?
    reflect_in: bool,
    /// Should data be bit-reversed on the way out?
    reflect_out: bool,
    /// Value to XOR into the CRC at the end.
    xorout: u16,
    /// Current CRC value.
    value: u16,
}

impl Crc16 {
    /// Creates a new `Crc16` using `algorithm`'s settings.
    pub fn new(algorithm: &Algorithm<u16>) -> Self {
        let (poly, value) = if algorithm.refin {
            (algorithm.poly.reverse_bits(), algorithm.init.reverse_bits())
        } else {
            (algorithm.poly, algorithm.init)
        };
        Self {
            poly,
            reflect_in: algorithm.refin,
            reflect_out: algorithm.refout,
            xorout: algorithm.xorout,
            value,
        }
    }

    /// Updates this CRC with the content of `data`.
    pub fn update(&mut self, data: &[u8]) {
        if self.reflect_in {
            for &byte in data {
                let v = (self.value ^ u16::from(byte)) & 0xFF;
                self.value = crc16_reflect(self.poly, v) ^ (self.value >> 8);
            }
        } else {
            for &byte in data {
                self.value = crc16_step(self.poly, self.value, byte);
            }
        }
    }

    /// Performs any final computations required and returns the computed CRC16.
    pub fn finish(mut self) -> u16 {
        if self.reflect_in ^ self.reflect_out {
            self.value = self.value.reverse_bits();
        }
        self.value ^ self.xorout
    }
}

fn crc16_reflect(poly: u16, mut value: u16) -> u16 {
    for _ in 0..8 {
        value = (value >> 1) ^ ((value & 1) * poly);
    }
    value
}
