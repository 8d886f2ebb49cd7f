// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Output path counters, loosely following the IP-MIB.

use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use serde::Deserialize;
use serde::Serialize;

/// A monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn val(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

macro_rules! ipv4_stats {
    ($($(#[$doc:meta])* $name:ident,)*) => {
        /// Live counters, shared by every execution context running
        /// the pipelines.
        #[derive(Debug, Default)]
        pub struct Ipv4Stats {
            $($(#[$doc])* pub $name: Counter,)*
        }

        /// A point-in-time copy of [`Ipv4Stats`].
        #[derive(
            Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
        )]
        pub struct Ipv4StatsSnap {
            $($(#[$doc])* pub $name: u64,)*
        }

        impl Ipv4Stats {
            pub fn snapshot(&self) -> Ipv4StatsSnap {
                Ipv4StatsSnap { $($name: self.$name.val(),)* }
            }
        }

        impl Ipv4StatsSnap {
            /// Every counter as a `(name, value)` pair, in declaration
            /// order.
            pub fn pairs(&self) -> [(&'static str, u64); ipv4_stats!(@count $($name)*)] {
                [$((stringify!($name), self.$name),)*]
            }
        }
    };

    (@count) => { 0 };
    (@count $head:ident $($tail:ident)*) => { 1 + ipv4_stats!(@count $($tail)*) };
}

ipv4_stats! {
    /// Datagrams handed to the output pipeline.
    out_requests,
    /// Datagrams discarded for want of a route.
    out_no_routes,
    /// Datagrams dropped by the output filter.
    out_discards,
    /// Frames handed to a device, fragments included.
    out_transmits,
    /// Frames the device refused, and local failures after routing.
    out_errors,
    /// Transit datagrams successfully sent on.
    forw_datagrams,
    /// Transit datagrams with options or an unreadable header.
    in_hdr_errors,
    /// Transit datagrams whose TTL ran out.
    in_ttl_exceeded,
    /// Transit datagrams of a class that is never forwarded.
    in_addr_errors,
    /// Datagrams successfully fragmented.
    frag_oks,
    /// Datagrams that needed fragmenting but could not be.
    frag_fails,
    /// Fragments created.
    frag_creates,
    /// ICMP error messages sent.
    icmp_out_errors,
    /// ICMP redirects sent.
    icmp_out_redirects,
    /// ICMP messages not sent because the offending datagram may not
    /// be answered, or because the message could not be built.
    icmp_suppressed,
}
