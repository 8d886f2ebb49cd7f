// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The engine: headers, packets, and the two pipelines.

pub mod checksum;
pub mod device;
pub mod filter;
pub mod forward;
pub mod frag;
pub mod icmp;
pub mod ident;
pub mod ip4;
pub mod outcome;
pub mod output;
pub mod packet;
pub mod route;
pub mod socket;
pub mod stat;

use filter::PacketFilter;
use route::RouteTable;

/// The collaborators a pipeline consults for one packet.
#[derive(Clone, Copy)]
pub struct NetEnv<'a> {
    pub routes: &'a dyn RouteTable,
    pub filter: &'a dyn PacketFilter,
}

impl<'a> NetEnv<'a> {
    pub fn new(
        routes: &'a dyn RouteTable,
        filter: &'a dyn PacketFilter,
    ) -> Self {
        Self { routes, filter }
    }
}
