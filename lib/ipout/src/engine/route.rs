// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Route lookup and binding.
//!
//! The output path consumes routes through the [`RouteTable`] trait;
//! [`Fib`] is a plain longest-prefix-match table for integrators that
//! do not bring their own.

use super::device::NetDevice;
use super::packet::Packet;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::Reverse;
use core::fmt;
use ipout_api::EHOSTUNREACH;
use ipout_api::ENETUNREACH;
use ipout_api::Ipv4Addr;
use ipout_api::Ipv4Cidr;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("no device to send on")]
    NoDevice,
    #[error("cannot resolve next hop {next_hop}")]
    Unresolved { next_hop: Ipv4Addr },
}

impl RouteError {
    /// The errno reported to callers for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoDevice => ENETUNREACH,
            Self::Unresolved { .. } => EHOSTUNREACH,
        }
    }
}

/// A resolved next-hop decision.
#[derive(Clone)]
pub struct Route {
    pub dst: Ipv4Cidr,
    /// The next-hop router, or `None` when the destination is on a
    /// directly connected network.
    pub gateway: Option<Ipv4Addr>,
    pub dev: Arc<dyn NetDevice>,
    pub metric: u32,
}

impl Route {
    pub fn new(
        dst: Ipv4Cidr,
        gateway: Option<Ipv4Addr>,
        dev: Arc<dyn NetDevice>,
    ) -> Self {
        Self { dst, gateway, dev, metric: 0 }
    }

    pub fn with_metric(mut self, metric: u32) -> Self {
        self.metric = metric;
        self
    }

    /// The address to resolve on the link when sending to `dst`.
    pub fn next_hop(&self, dst: Ipv4Addr) -> Ipv4Addr {
        self.gateway.unwrap_or(dst)
    }

    pub fn mtu(&self) -> u16 {
        self.dev.mtu()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Route")
            .field("dst", &self.dst)
            .field("gateway", &self.gateway)
            .field("dev", &self.dev.name())
            .field("metric", &self.metric)
            .finish()
    }
}

/// Best-match route lookup.
pub trait RouteTable: Send + Sync {
    fn best_match(&self, dst: Ipv4Addr) -> Option<Route>;
}

/// A longest-prefix-match forwarding table.
///
/// Among routes of equal prefix length the lowest metric wins, and
/// among those the first added.
#[derive(Clone, Debug, Default)]
pub struct Fib {
    routes: Vec<Route>,
}

impl Fib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Remove every route for `dst`, returning how many were removed.
    pub fn remove(&mut self, dst: Ipv4Cidr) -> usize {
        let before = self.routes.len();
        self.routes.retain(|r| r.dst != dst);
        before - self.routes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }
}

impl RouteTable for Fib {
    fn best_match(&self, dst: Ipv4Addr) -> Option<Route> {
        self.routes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.dst.is_member(dst))
            .max_by_key(|(i, r)| {
                (r.dst.prefix_len(), Reverse(r.metric), Reverse(*i))
            })
            .map(|(_, r)| r.clone())
    }
}

/// Bind `pkt` onto `route` for delivery to `dst`.
///
/// This sets the outgoing device and has it resolve the next hop into
/// the link-layer header. With no route the device the packet is
/// already bound to is used, as for limited broadcast.
pub fn bind(
    pkt: &mut Packet,
    route: Option<&Route>,
    dst: Ipv4Addr,
) -> Result<(), RouteError> {
    let (dev, next_hop) = match route {
        Some(r) => (Arc::clone(&r.dev), r.next_hop(dst)),
        None => match pkt.dev() {
            Some(dev) => (Arc::clone(dev), dst),
            None => return Err(RouteError::NoDevice),
        },
    };

    pkt.set_dev(Arc::clone(&dev));
    dev.resolve(next_hop, pkt)
}
