// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The IPv4 identification counter.

use core::sync::atomic::AtomicU16;
use core::sync::atomic::Ordering;

/// Hands out identification values for locally built headers.
///
/// Values increase by one per call and wrap at 16 bits. Concurrent
/// callers never receive the same value within a wrap.
#[derive(Debug)]
pub struct IdentGen {
    next: AtomicU16,
}

impl IdentGen {
    pub fn new(start: u16) -> Self {
        Self { next: AtomicU16::new(start) }
    }

    /// Take the next value.
    pub fn next_ident(&self) -> u16 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The value the next call to [`Self::next_ident`] will return.
    pub fn peek(&self) -> u16 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdentGen {
    fn default() -> Self {
        Self::new(crate::cfg::IP_INITIAL_IDENT)
    }
}
