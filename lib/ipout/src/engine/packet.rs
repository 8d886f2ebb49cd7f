// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet buffers.
//!
//! A [`Packet`] owns exactly one frame: a link-layer header region of
//! [`ETHER_HDR_LEN`] bytes followed by the IPv4 datagram. Packets are
//! move-only. Handing one to a device, to a helper, or letting it fall
//! out of scope all end its life, and the [`PacketPool`] it came from
//! counts that release exactly once.

use super::device::DevId;
use super::device::NetDevice;
use super::ip4::Ipv4Hdr;
use super::ip4::Ipv4HdrError;
use super::ip4::Ipv4HdrRaw;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;
use zerocopy::FromBytes;

/// The size of the link-layer header region at the front of a frame.
pub const ETHER_HDR_LEN: usize = 14;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;

/// How the link layer classified a received frame.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PktType {
    /// Addressed to this host's link-layer address.
    #[default]
    Host,
    Broadcast,
    Multicast,
    /// Addressed to another host; only seen in promiscuous mode.
    OtherHost,
    Loopback,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error("packet pool exhausted ({limit} outstanding)")]
    Exhausted { limit: usize },
}

/// The source of packet buffers.
///
/// The pool keeps count of every allocation and every release, and
/// may refuse allocations beyond a fixed number of outstanding
/// packets.
#[derive(Debug, Default)]
pub struct PacketPool {
    limit: Option<usize>,
    outstanding: AtomicUsize,
    allocated: AtomicU64,
    released: AtomicU64,
}

impl PacketPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a pool which refuses to have more than `limit` packets
    /// outstanding at once.
    pub fn with_limit(limit: usize) -> Arc<Self> {
        Arc::new(Self { limit: Some(limit), ..Default::default() })
    }

    /// Allocate a zeroed frame of `len` bytes, link-layer region
    /// included.
    pub fn alloc(self: &Arc<Self>, len: usize) -> Result<Packet, AllocError> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .map_err(|_| AllocError::Exhausted { limit })?;
        self.allocated.fetch_add(1, Ordering::Relaxed);

        Ok(Packet {
            pool: Arc::clone(self),
            data: vec![0u8; len],
            dev: None,
            rx_dev: None,
            pkt_type: PktType::default(),
            ethertype: 0,
        })
    }

    /// Allocate a frame holding a copy of `bytes`.
    pub fn alloc_from(
        self: &Arc<Self>,
        bytes: &[u8],
    ) -> Result<Packet, AllocError> {
        let mut pkt = self.alloc(bytes.len())?;
        pkt.data.copy_from_slice(bytes);
        Ok(pkt)
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A single frame owned by the stack.
pub struct Packet {
    pool: Arc<PacketPool>,
    data: Vec<u8>,
    dev: Option<Arc<dyn NetDevice>>,
    rx_dev: Option<DevId>,
    pkt_type: PktType,
    ethertype: u16,
}

impl Packet {
    /// The whole frame, link-layer region included.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The frame length, link-layer region included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn l2(&self) -> &[u8] {
        &self.data[..ETHER_HDR_LEN.min(self.data.len())]
    }

    pub fn l2_mut(&mut self) -> &mut [u8] {
        let end = ETHER_HDR_LEN.min(self.data.len());
        &mut self.data[..end]
    }

    /// The network-layer region: everything after the link-layer
    /// header.
    pub fn ip_bytes(&self) -> &[u8] {
        self.data.get(ETHER_HDR_LEN..).unwrap_or(&[])
    }

    pub fn ip_bytes_mut(&mut self) -> &mut [u8] {
        self.data.get_mut(ETHER_HDR_LEN..).unwrap_or(&mut [])
    }

    /// A validated view of the IPv4 header.
    pub fn ipv4(&self) -> Result<&Ipv4HdrRaw, Ipv4HdrError> {
        super::ip4::parse_ref(self.ip_bytes()).map(|(raw, _)| raw)
    }

    /// A validated, mutable view of the IPv4 header.
    pub fn ipv4_mut(&mut self) -> Result<Ipv4Hdr<'_>, Ipv4HdrError> {
        Ipv4Hdr::parse(self.ip_bytes_mut())
    }

    /// The fixed header region, whatever it currently holds.
    ///
    /// This is for building a header from scratch; use
    /// [`Self::ipv4_mut`] to work with an existing one.
    pub fn ipv4_raw_mut(&mut self) -> Result<&mut Ipv4HdrRaw, Ipv4HdrError> {
        let ip = self.ip_bytes_mut();
        let len = ip.len();
        Ipv4HdrRaw::mut_from_prefix(ip)
            .map(|(raw, _)| raw)
            .map_err(|_| Ipv4HdrError::Truncated { len })
    }

    /// The outgoing device, once the packet has been bound.
    pub fn dev(&self) -> Option<&Arc<dyn NetDevice>> {
        self.dev.as_ref()
    }

    pub fn set_dev(&mut self, dev: Arc<dyn NetDevice>) {
        self.dev = Some(dev);
    }

    /// The device this packet was received on, if any.
    pub fn rx_dev(&self) -> Option<DevId> {
        self.rx_dev
    }

    pub fn set_rx_dev(&mut self, id: DevId) {
        self.rx_dev = Some(id);
    }

    pub fn pkt_type(&self) -> PktType {
        self.pkt_type
    }

    pub fn set_pkt_type(&mut self, pkt_type: PktType) {
        self.pkt_type = pkt_type;
    }

    /// The link-layer protocol tag.
    pub fn ethertype(&self) -> u16 {
        self.ethertype
    }

    pub fn set_ethertype(&mut self, ethertype: u16) {
        self.ethertype = ethertype;
    }

    pub fn pool(&self) -> &Arc<PacketPool> {
        &self.pool
    }

    /// Make an independent copy of this packet, metadata included,
    /// from the same pool.
    ///
    /// Return `None` when the pool cannot supply another buffer.
    pub fn share(&self) -> Option<Packet> {
        let mut copy = self.pool.alloc_from(&self.data).ok()?;
        copy.copy_meta(self);
        copy.dev = self.dev.clone();
        Some(copy)
    }

    /// Copy the receive-side metadata of `other`: receive device,
    /// classification and link protocol. The outgoing device is not
    /// copied.
    pub fn copy_meta(&mut self, other: &Packet) {
        self.rx_dev = other.rx_dev;
        self.pkt_type = other.pkt_type;
        self.ethertype = other.ethertype;
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        self.pool.release();
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.data.len())
            .field("dev", &self.dev.as_ref().map(|d| d.id()))
            .field("rx_dev", &self.rx_dev)
            .field("pkt_type", &self.pkt_type)
            .field("ethertype", &self.ethertype)
            .finish()
    }
}
