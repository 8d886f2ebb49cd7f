// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The IPv4 output and forwarding path.
//!
//! Every datagram leaving this host, whether built by a local socket
//! or received for transit, passes through one of the two pipelines
//! in [`engine`]: [`engine::output::Ipv4Output::send_packet`] for
//! locally originated traffic, and
//! [`engine::output::Ipv4Output::forward_packet`] for transit
//! traffic. The pipelines decide the route, fragment to the outgoing
//! device's MTU, consult the output filter, and answer the sender with
//! ICMP errors when a datagram cannot be delivered.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate alloc;

#[macro_use]
extern crate cfg_if;

pub use ipout_api as api;

pub mod cfg;
pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod print;
pub mod provider;

use alloc::boxed::Box;
use provider::LogProvider;

/// The execution context handed to the engine.
///
/// This carries the platform services the engine needs but does not
/// own, such as the destination for log messages.
pub struct ExecCtx {
    pub log: Box<dyn LogProvider>,
}

impl Default for ExecCtx {
    fn default() -> Self {
        Self { log: provider::default_log() }
    }
}
