// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Outgoing network devices.

use super::packet::Packet;
use super::route::RouteError;
use core::fmt;
use core::fmt::Display;
use ipout_api::EIO;
use ipout_api::ENOBUFS;
use ipout_api::Ipv4Addr;
use serde::Deserialize;
use serde::Serialize;

/// A device's identity, unique within the stack.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct DevId(pub u32);

impl Display for DevId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TxError {
    #[error("device is down")]
    Down,
    #[error("transmit queue full")]
    QueueFull,
}

impl TxError {
    /// The errno reported to callers for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Down => EIO,
            Self::QueueFull => ENOBUFS,
        }
    }
}

/// A network interface the output path can hand packets to.
pub trait NetDevice: Send + Sync {
    fn id(&self) -> DevId;

    fn name(&self) -> &str;

    /// The largest IPv4 datagram, header included, the device will
    /// carry.
    fn mtu(&self) -> u16;

    /// The address configured on this interface.
    fn ipv4_addr(&self) -> Ipv4Addr;

    /// Resolve `next_hop` to a link-layer address and write the
    /// link-layer header into `pkt`.
    fn resolve(
        &self,
        next_hop: Ipv4Addr,
        pkt: &mut Packet,
    ) -> Result<(), RouteError>;

    /// Transmit the packet. The device takes ownership whether or not
    /// the transmission succeeds.
    fn transmit(&self, pkt: Packet) -> Result<(), TxError>;
}

impl fmt::Debug for dyn NetDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NetDevice")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("mtu", &self.mtu())
            .field("addr", &self.ipv4_addr())
            .finish()
    }
}
