// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The originating socket, as seen by the output path.

use core::sync::atomic::AtomicI32;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;
use ipout_api::Ipv4Addr;
use ipout_api::Protocol;
use ipout_api::SockType;

/// What the output path needs from a locally bound socket.
///
/// Setters take `&self`: the source address is updated from the send
/// path and errors arrive asynchronously from ICMP.
pub trait InetSocket: Send + Sync {
    /// The TTL the socket asks for.
    fn ttl(&self) -> u8;

    fn protocol(&self) -> Protocol;

    fn sock_type(&self) -> SockType;

    fn saddr(&self) -> Ipv4Addr;

    fn set_saddr(&self, addr: Ipv4Addr);

    fn daddr(&self) -> Ipv4Addr;

    fn set_so_error(&self, err: i32);

    fn so_error(&self) -> i32;
}

/// A plain IPv4 socket endpoint.
#[derive(Debug)]
pub struct InetSock {
    sock_type: SockType,
    proto: Protocol,
    ttl: u8,
    saddr: AtomicU32,
    daddr: Ipv4Addr,
    so_error: AtomicI32,
}

impl InetSock {
    pub fn new(sock_type: SockType, proto: Protocol, daddr: Ipv4Addr) -> Self {
        Self {
            sock_type,
            proto,
            ttl: crate::cfg::IP_DEFAULT_TTL,
            saddr: AtomicU32::new(u32::from(Ipv4Addr::ANY_ADDR)),
            daddr,
            so_error: AtomicI32::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Read and clear the pending error, as `SO_ERROR` does.
    pub fn take_so_error(&self) -> i32 {
        self.so_error.swap(0, Ordering::AcqRel)
    }
}

impl InetSocket for InetSock {
    fn ttl(&self) -> u8 {
        self.ttl
    }

    fn protocol(&self) -> Protocol {
        self.proto
    }

    fn sock_type(&self) -> SockType {
        self.sock_type
    }

    fn saddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.saddr.load(Ordering::Acquire))
    }

    fn set_saddr(&self, addr: Ipv4Addr) {
        self.saddr.store(u32::from(addr), Ordering::Release);
    }

    fn daddr(&self) -> Ipv4Addr {
        self.daddr
    }

    fn set_so_error(&self, err: i32) {
        self.so_error.store(err, Ordering::Release);
    }

    fn so_error(&self) -> i32 {
        self.so_error.load(Ordering::Acquire)
    }
}

/// Pack an ICMP type and code into a socket error value.
pub fn pack_so_error(icmp_type: u8, icmp_code: u8) -> i32 {
    i32::from(icmp_type) | (i32::from(icmp_code) << 8)
}

/// Split a socket error value back into ICMP type and code.
pub fn unpack_so_error(err: i32) -> (u8, u8) {
    ((err & 0xFF) as u8, ((err >> 8) & 0xFF) as u8)
}

/// Record an ICMP error pertaining to traffic `sk` generated.
pub fn icmp_err_notify(sk: &dyn InetSocket, icmp_type: u8, icmp_code: u8) {
    sk.set_so_error(pack_so_error(icmp_type, icmp_code));
}
