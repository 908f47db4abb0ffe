// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging front end.
//!
//! With the `defmt-log` feature the macros below forward to `defmt`; without
//! it they expand to nothing but still borrow their arguments, so a build
//! without logging doesn't sprout unused-variable warnings. Format strings
//! must therefore be valid `defmt` format strings.

#![macro_use]
#![allow(unused_macros)]

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt-log")]
            ::defmt::trace!($s $(, $x)*);
            #[cfg(not(feature = "defmt-log"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt-log")]
            ::defmt::debug!($s $(, $x)*);
            #[cfg(not(feature = "defmt-log"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt-log")]
            ::defmt::info!($s $(, $x)*);
            #[cfg(not(feature = "defmt-log"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt-log")]
            ::defmt::warn!($s $(, $x)*);
            #[cfg(not(feature = "defmt-log"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt-log")]
            ::defmt::error!($s $(, $x)*);
            #[cfg(not(feature = "defmt-log"))]
            let _ = ($( & $x ),*);
        }
    };
}
