// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod errno;
pub mod ip;

pub use errno::*;
pub use ip::*;

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The socket type of the originating socket, as far as the IP
/// output path cares about it.
///
/// Only raw sockets change the behavior of the output path: their
/// callers supply a fully built IPv4 header.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum SockType {
    #[default]
    Stream,
    Dgram,
    Raw,
}

impl Display for SockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Stream => "STREAM",
            Self::Dgram => "DGRAM",
            Self::Raw => "RAW",
        };
        write!(f, "{s}")
    }
}
