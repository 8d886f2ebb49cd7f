// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

pub mod pcap;

pub use ipout::ExecCtx;
pub use ipout::api::*;
pub use ipout::cfg::Ipv4Cfg;
pub use ipout::cfg::TtlPolicy;
pub use ipout::engine::NetEnv;
pub use ipout::engine::device::DevId;
pub use ipout::engine::device::NetDevice;
pub use ipout::engine::device::TxError;
pub use ipout::engine::filter::AcceptAll;
pub use ipout::engine::filter::Chain;
pub use ipout::engine::filter::PacketFilter;
pub use ipout::engine::filter::Predicate;
pub use ipout::engine::filter::Rule;
pub use ipout::engine::filter::RuleSet;
pub use ipout::engine::filter::Verdict;
pub use ipout::engine::frag::fragment;
pub use ipout::engine::icmp::IcmpError;
pub use ipout::engine::ip4::Ipv4Flags;
pub use ipout::engine::outcome::DropReason;
pub use ipout::engine::outcome::ErrorKind;
pub use ipout::engine::outcome::Outcome;
pub use ipout::engine::output::Ipv4Output;
pub use ipout::engine::packet::ETHER_HDR_LEN;
pub use ipout::engine::packet::Packet;
pub use ipout::engine::packet::PacketPool;
pub use ipout::engine::packet::PktType;
pub use ipout::engine::route::Fib;
pub use ipout::engine::route::Route;
pub use ipout::engine::route::RouteError;
pub use ipout::engine::socket::InetSock;
pub use ipout::engine::socket::InetSocket;
pub use ipout::provider::LogLevel;
pub use ipout::provider::LogProvider;
pub use smoltcp::wire::Icmpv4Message;
pub use smoltcp::wire::Icmpv4Packet;
pub use smoltcp::wire::Ipv4Packet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

/// A frame captured by a [`FakeDevice`].
#[derive(Clone, Debug)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub ethertype: u16,
}

impl Frame {
    /// The IPv4 datagram, checked for a sane header.
    pub fn ipv4(&self) -> Ipv4Packet<&[u8]> {
        Ipv4Packet::new_checked(&self.bytes[ETHER_HDR_LEN..])
            .expect("captured frame holds a valid IPv4 header")
    }

    /// The ICMP message carried by this frame.
    pub fn icmpv4(&self) -> Icmpv4Packet<&[u8]> {
        let ip = self.ipv4();
        assert_eq!(ip.next_header(), smoltcp::wire::IpProtocol::Icmp);
        let hdr_len = usize::from(ip.header_len());
        let total_len = usize::from(ip.total_len());
        Icmpv4Packet::new_checked(
            &self.bytes[ETHER_HDR_LEN + hdr_len..ETHER_HDR_LEN + total_len],
        )
        .expect("captured frame holds a valid ICMP message")
    }

    pub fn is_icmp(&self) -> bool {
        self.ipv4().next_header() == smoltcp::wire::IpProtocol::Icmp
    }
}

/// A device which records what it is asked to send.
///
/// Transmitted packets are copied into [`Frame`]s and released right
/// away, so pool accounting reflects the hand-off.
pub struct FakeDevice {
    id: DevId,
    name: String,
    mtu: u16,
    addr: Ipv4Addr,
    frames: Mutex<Vec<Frame>>,
    resolved: Mutex<Vec<Ipv4Addr>>,
    fail_resolve: AtomicBool,
    fail_tx: AtomicBool,
    tx_attempts: AtomicUsize,
}

impl FakeDevice {
    pub fn new(id: u32, name: &str, mtu: u16, addr: &str) -> Arc<Self> {
        Arc::new(Self {
            id: DevId(id),
            name: name.to_string(),
            mtu,
            addr: addr.parse().unwrap(),
            frames: Mutex::new(vec![]),
            resolved: Mutex::new(vec![]),
            fail_resolve: AtomicBool::new(false),
            fail_tx: AtomicBool::new(false),
            tx_attempts: AtomicUsize::new(0),
        })
    }

    /// Make next-hop resolution fail from now on.
    pub fn set_fail_resolve(&self, fail: bool) {
        self.fail_resolve.store(fail, Ordering::SeqCst);
    }

    /// Make transmission fail from now on.
    pub fn set_fail_tx(&self, fail: bool) {
        self.fail_tx.store(fail, Ordering::SeqCst);
    }

    /// Take every frame transmitted so far.
    pub fn take_frames(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.frames.lock().unwrap())
    }

    /// Every call to transmit, whether it succeeded or not.
    pub fn tx_attempts(&self) -> usize {
        self.tx_attempts.load(Ordering::SeqCst)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Every next hop this device has been asked to resolve.
    pub fn resolved(&self) -> Vec<Ipv4Addr> {
        self.resolved.lock().unwrap().clone()
    }

    /// The link-layer address this device uses.
    pub fn mac(&self) -> [u8; 6] {
        let ip = self.addr.bytes();
        [0xA8, 0x40, ip[0], ip[1], ip[2], ip[3]]
    }

    /// The link-layer address the device resolves `ip` to.
    pub fn neighbor_mac(ip: Ipv4Addr) -> [u8; 6] {
        let ip = ip.bytes();
        [0x02, 0x00, ip[0], ip[1], ip[2], ip[3]]
    }
}

impl NetDevice for FakeDevice {
    fn id(&self) -> DevId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }

    fn ipv4_addr(&self) -> Ipv4Addr {
        self.addr
    }

    fn resolve(
        &self,
        next_hop: Ipv4Addr,
        pkt: &mut Packet,
    ) -> Result<(), RouteError> {
        self.resolved.lock().unwrap().push(next_hop);
        if self.fail_resolve.load(Ordering::SeqCst) {
            return Err(RouteError::Unresolved { next_hop });
        }

        let dst = if next_hop.is_broadcast() {
            [0xFF; 6]
        } else {
            Self::neighbor_mac(next_hop)
        };
        let l2 = pkt.l2_mut();
        l2[0..6].copy_from_slice(&dst);
        l2[6..12].copy_from_slice(&self.mac());
        l2[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        Ok(())
    }

    fn transmit(&self, pkt: Packet) -> Result<(), TxError> {
        self.tx_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_tx.load(Ordering::SeqCst) {
            return Err(TxError::Down);
        }

        self.frames.lock().unwrap().push(Frame {
            bytes: pkt.bytes().to_vec(),
            ethertype: pkt.ethertype(),
        });
        Ok(())
    }
}

/// A log provider which keeps every message for inspection.
#[derive(Clone, Default)]
pub struct CaptureLog {
    msgs: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl CaptureLog {
    pub fn msgs(&self) -> Vec<(LogLevel, String)> {
        self.msgs.lock().unwrap().clone()
    }

    /// Messages logged at `level` containing `needle`.
    pub fn count(&self, level: LogLevel, needle: &str) -> usize {
        self.msgs
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, m)| *l == level && m.contains(needle))
            .count()
    }
}

impl LogProvider for CaptureLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
        self.msgs.lock().unwrap().push((level, msg.to_string()));
    }
}

/// A filter which drops everything on the output chain.
pub fn drop_all_output() -> RuleSet {
    let mut rs = RuleSet::new();
    rs.set_default(Chain::Output, Verdict::Drop);
    rs
}

/// Parameters for a generated datagram.
#[derive(Clone, Debug)]
pub struct DatagramSpec {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: Protocol,
    pub ttl: u8,
    pub ident: u16,
    pub df: bool,
    pub payload_len: usize,
    pub opts: Vec<u8>,
}

impl DatagramSpec {
    pub fn new(src: &str, dst: &str, payload_len: usize) -> Self {
        Self {
            src: src.parse().unwrap(),
            dst: dst.parse().unwrap(),
            proto: Protocol::UDP,
            ttl: 64,
            ident: 0x4242,
            df: false,
            payload_len,
            opts: vec![],
        }
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn df(mut self, df: bool) -> Self {
        self.df = df;
        self
    }

    pub fn proto(mut self, proto: Protocol) -> Self {
        self.proto = proto;
        self
    }

    pub fn opts(mut self, opts: &[u8]) -> Self {
        self.opts = opts.to_vec();
        self
    }

    /// Build the frame. The payload counts up from zero so that
    /// reassembled data can be compared byte for byte.
    pub fn build(&self, pool: &Arc<PacketPool>) -> Packet {
        let hdr_len = 20 + self.opts.len();
        assert_eq!(hdr_len % 4, 0, "options must pad to 32 bits");
        let total_len = hdr_len + self.payload_len;
        let mut pkt = pool.alloc(ETHER_HDR_LEN + total_len).unwrap();

        {
            let ip_bytes = pkt.ip_bytes_mut();
            let mut ip = Ipv4Packet::new_unchecked(&mut ip_bytes[..]);
            ip.set_version(4);
            ip.set_header_len(hdr_len as u8);
            ip.set_dscp(0);
            ip.set_ecn(0);
            ip.set_total_len(total_len as u16);
            ip.set_ident(self.ident);
            ip.clear_flags();
            ip.set_dont_frag(self.df);
            ip.set_more_frags(false);
            ip.set_frag_offset(0);
            ip.set_hop_limit(self.ttl);
            ip.set_next_header(self.proto.into());
            ip.set_src_addr(self.src.into());
            ip.set_dst_addr(self.dst.into());
            ip_bytes[20..hdr_len].copy_from_slice(&self.opts);
            for (i, b) in ip_bytes[hdr_len..].iter_mut().enumerate() {
                *b = i as u8;
            }
            Ipv4Packet::new_unchecked(&mut ip_bytes[..]).fill_checksum();
        }

        pkt
    }

    /// Build the frame as if it had been received on `dev`.
    pub fn received_on(&self, pool: &Arc<PacketPool>, dev: DevId) -> Packet {
        let mut pkt = self.build(pool);
        pkt.set_rx_dev(dev);
        pkt.set_pkt_type(PktType::Host);
        pkt
    }
}

/// Allocate a frame with room for a base header and `payload_len`
/// bytes, as a socket would before handing it to the output path.
pub fn socket_frame(pool: &Arc<PacketPool>, payload_len: usize) -> Packet {
    let mut pkt = pool.alloc(ETHER_HDR_LEN + 20 + payload_len).unwrap();
    for (i, b) in pkt.ip_bytes_mut()[20..].iter_mut().enumerate() {
        *b = i as u8;
    }
    pkt
}

/// A small network for exercising the pipelines:
///
/// * `net0`: 10.0.0.1/24, MTU 1500, default route via 10.0.0.254.
/// * `net1`: 192.168.1.1/24, MTU 576.
/// * `net2`: 172.16.0.1/16, MTU 1500; 172.20.0.0/16 is reached via
///   172.16.0.254.
pub struct TestNet {
    pub pool: Arc<PacketPool>,
    pub net0: Arc<FakeDevice>,
    pub net1: Arc<FakeDevice>,
    pub net2: Arc<FakeDevice>,
    pub fib: Fib,
    pub log: CaptureLog,
    pub ipo: Ipv4Output,
}

impl TestNet {
    pub fn new() -> Self {
        Self::with_cfg(Ipv4Cfg::default())
    }

    pub fn with_cfg(cfg: Ipv4Cfg) -> Self {
        Self::with_pool(cfg, PacketPool::new())
    }

    pub fn with_pool(cfg: Ipv4Cfg, pool: Arc<PacketPool>) -> Self {
        let net0 = FakeDevice::new(1, "net0", 1500, "10.0.0.1");
        let net1 = FakeDevice::new(2, "net1", 576, "192.168.1.1");
        let net2 = FakeDevice::new(3, "net2", 1500, "172.16.0.1");

        let mut fib = Fib::new();
        fib.add(Route::new(
            "10.0.0.0/24".parse().unwrap(),
            None,
            net0.clone(),
        ));
        fib.add(Route::new(
            "192.168.1.0/24".parse().unwrap(),
            None,
            net1.clone(),
        ));
        fib.add(Route::new(
            "172.16.0.0/16".parse().unwrap(),
            None,
            net2.clone(),
        ));
        fib.add(Route::new(
            "172.20.0.0/16".parse().unwrap(),
            Some("172.16.0.254".parse().unwrap()),
            net2.clone(),
        ));
        fib.add(Route::new(
            "0.0.0.0/0".parse().unwrap(),
            Some("10.0.0.254".parse().unwrap()),
            net0.clone(),
        ));

        let log = CaptureLog::default();
        let ectx = Arc::new(ExecCtx { log: Box::new(log.clone()) });
        let ipo = Ipv4Output::new(ectx, cfg);

        Self { pool, net0, net1, net2, fib, log, ipo }
    }

    /// Send a locally originated packet through the accept-all filter.
    pub fn send(&self, sk: Option<&dyn InetSocket>, pkt: Packet) -> Outcome {
        self.send_filtered(&AcceptAll, sk, pkt)
    }

    pub fn send_filtered(
        &self,
        filter: &dyn PacketFilter,
        sk: Option<&dyn InetSocket>,
        pkt: Packet,
    ) -> Outcome {
        self.ipo.send_packet(&NetEnv::new(&self.fib, filter), sk, pkt)
    }

    /// Forward a transit packet through the accept-all filter.
    pub fn forward(&self, pkt: Packet) -> Outcome {
        self.forward_filtered(&AcceptAll, pkt)
    }

    pub fn forward_filtered(
        &self,
        filter: &dyn PacketFilter,
        pkt: Packet,
    ) -> Outcome {
        self.ipo.forward_packet(&NetEnv::new(&self.fib, filter), pkt)
    }

    /// Every frame transmitted so far, on all devices.
    pub fn total_frames(&self) -> usize {
        self.net0.frame_count()
            + self.net1.frame_count()
            + self.net2.frame_count()
    }

    /// Assert that every packet allocated has been released exactly
    /// once.
    pub fn assert_all_released(&self) {
        assert_eq!(self.pool.outstanding(), 0, "packets still outstanding");
        assert_eq!(self.pool.allocated(), self.pool.released());
    }
}

impl Default for TestNet {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect the quoted datagram from an ICMP error message.
pub fn icmp_quote(frame: &Frame) -> Vec<u8> {
    frame.icmpv4().data().to_vec()
}
