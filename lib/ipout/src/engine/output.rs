// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The output pipeline for locally originated datagrams.

use super::NetEnv;
use super::filter::Chain;
use super::filter::Verdict;
use super::ident::IdentGen;
use super::ip4::IPV4_HDR_LEN;
use super::ip4::IPV4_VERSION;
use super::ip4::Ipv4Flags;
use super::ip4::Ipv4HdrError;
use super::outcome::DropReason;
use super::outcome::ErrorKind;
use super::outcome::Outcome;
use super::packet::ETHER_HDR_LEN;
use super::packet::ETHER_TYPE_IPV4;
use super::packet::Packet;
use super::route;
use super::socket::InetSocket;
use super::stat::Ipv4Stats;
use crate::ExecCtx;
use crate::cfg::Ipv4Cfg;
use crate::provider::LogLevel;
use alloc::sync::Arc;
use ipout_api::Ipv4Addr;
use ipout_api::Protocol;
use ipout_api::SockType;

/// The IPv4 output path.
///
/// One instance serves every interface and every execution context;
/// all of its state is either immutable or atomic. The route table
/// and filter are supplied per call through [`NetEnv`].
pub struct Ipv4Output {
    ectx: Arc<ExecCtx>,
    cfg: Ipv4Cfg,
    ident: IdentGen,
    stats: Ipv4Stats,
}

impl Ipv4Output {
    pub fn new(ectx: Arc<ExecCtx>, cfg: Ipv4Cfg) -> Self {
        Self {
            ectx,
            ident: IdentGen::new(cfg.initial_ident),
            cfg,
            stats: Ipv4Stats::default(),
        }
    }

    pub fn cfg(&self) -> &Ipv4Cfg {
        &self.cfg
    }

    pub fn ident(&self) -> &IdentGen {
        &self.ident
    }

    pub fn stats(&self) -> &Ipv4Stats {
        &self.stats
    }

    pub(crate) fn log(&self, level: LogLevel, msg: &str) {
        self.ectx.log.log(level, msg);
    }

    /// Write a fresh IPv4 header into `pkt`.
    ///
    /// `len` is the length of the whole frame, link-layer header
    /// included. The header carries no options and has the
    /// don't-fragment bit set. Under [`crate::cfg::TtlPolicy::Fixed`]
    /// `ttl` is ignored.
    pub fn rebuild_ip_header(
        &self,
        pkt: &mut Packet,
        ttl: u8,
        proto: Protocol,
        len: usize,
        saddr: Ipv4Addr,
        daddr: Ipv4Addr,
    ) -> Result<(), Ipv4HdrError> {
        let total_len = len.saturating_sub(ETHER_HDR_LEN);
        let total_len = u16::try_from(total_len)
            .map_err(|_| Ipv4HdrError::BadTotalLen { total_len: u16::MAX })?;
        let ident = self.ident.next_ident();

        let raw = pkt.ipv4_raw_mut()?;
        raw.ver_hdr_len = (IPV4_VERSION << 4) | (IPV4_HDR_LEN / 4) as u8;
        raw.dscp_ecn = 0;
        raw.set_total_len(total_len);
        raw.set_ident(ident);
        raw.set_flags_and_offset(Ipv4Flags::DONT_FRAGMENT, 0);
        raw.set_ttl(self.cfg.ttl_policy.select(ttl));
        raw.proto = u8::from(proto);
        raw.src = saddr.bytes();
        raw.dst = daddr.bytes();

        pkt.ipv4_mut()?.update_csum();
        Ok(())
    }

    // Raw sockets hand us a datagram whose header they built
    // themselves.
    fn build_ip_packet(
        &self,
        sk: &dyn InetSocket,
        pkt: &mut Packet,
    ) -> Result<(), Ipv4HdrError> {
        if sk.sock_type() == SockType::Raw {
            return Ok(());
        }

        let len = pkt.len();
        self.rebuild_ip_header(
            pkt,
            sk.ttl(),
            sk.protocol(),
            len,
            sk.saddr(),
            sk.daddr(),
        )
    }

    /// Send a locally originated datagram.
    ///
    /// With a socket, the destination comes from the socket and the
    /// header is built here, unless the socket is raw. Without one,
    /// the packet must already carry a complete header.
    pub fn send_packet(
        &self,
        env: &NetEnv<'_>,
        sk: Option<&dyn InetSocket>,
        mut pkt: Packet,
    ) -> Outcome {
        self.stats.out_requests.incr();

        let dst = match sk {
            Some(sk) => sk.daddr(),
            None => match pkt.ipv4() {
                Ok(ip) => ip.dst(),
                Err(e) => {
                    self.stats.out_errors.incr();
                    return Outcome::Failed(ErrorKind::BadHeader(e));
                }
            },
        };

        let route = env.routes.best_match(dst);
        match (&route, sk) {
            (None, _) if !dst.is_broadcast() => {
                self.stats.out_no_routes.incr();
                return Outcome::Failed(ErrorKind::NetUnreachable);
            }

            (Some(r), Some(sk)) => sk.set_saddr(r.dev.ipv4_addr()),

            _ => {}
        }

        if let Some(sk) = sk {
            if let Err(e) = self.build_ip_packet(sk, &mut pkt) {
                self.stats.out_errors.incr();
                return Outcome::Failed(ErrorKind::BadHeader(e));
            }
        }

        if let Err(e) = route::bind(&mut pkt, route.as_ref(), dst) {
            self.stats.out_no_routes.incr();
            return Outcome::Failed(ErrorKind::Route(e));
        }

        let (total_len, df) = match pkt.ipv4() {
            Ok(ip) => (
                ip.total_len(),
                ip.flags().contains(Ipv4Flags::DONT_FRAGMENT),
            ),
            Err(e) => {
                self.stats.out_errors.incr();
                return Outcome::Failed(ErrorKind::BadHeader(e));
            }
        };

        let Some(dev) = pkt.dev().cloned() else {
            self.stats.out_no_routes.incr();
            return Outcome::Failed(ErrorKind::Route(
                route::RouteError::NoDevice,
            ));
        };

        if total_len > dev.mtu() {
            if df {
                self.stats.frag_fails.incr();
                return Outcome::Failed(ErrorKind::MsgTooLarge);
            }
            return self.fragment_and_send(env, pkt, &dev);
        }

        self.queue_send(env, pkt)
    }

    /// Run `pkt` through the output filter and, if accepted, transmit
    /// it. A filter drop is not an error.
    pub fn queue_send(&self, env: &NetEnv<'_>, pkt: Packet) -> Outcome {
        match env.filter.verdict(Chain::Output, Verdict::Accept, &pkt) {
            Verdict::Accept => self.queue_xmit(pkt),
            Verdict::Drop => {
                self.stats.out_discards.incr();
                self.log(
                    LogLevel::Note,
                    &format!("{} dropped by output filter", describe(&pkt)),
                );
                Outcome::Dropped(DropReason::Filtered)
            }
        }
    }

    /// Transmit `pkt` on its bound device, bypassing the filter.
    pub fn queue_xmit(&self, mut pkt: Packet) -> Outcome {
        pkt.set_ethertype(ETHER_TYPE_IPV4);

        let Some(dev) = pkt.dev().cloned() else {
            self.stats.out_errors.incr();
            return Outcome::Failed(ErrorKind::Route(
                route::RouteError::NoDevice,
            ));
        };

        match dev.transmit(pkt) {
            Ok(()) => {
                self.stats.out_transmits.incr();
                Outcome::Sent
            }

            Err(e) => {
                self.stats.out_errors.incr();
                self.log(
                    LogLevel::Warn,
                    &format!("transmit on {} failed: {e}", dev.name()),
                );
                Outcome::Failed(ErrorKind::Tx(e))
            }
        }
    }
}

/// A short description of a packet for log messages.
pub(crate) fn describe(pkt: &Packet) -> alloc::string::String {
    match pkt.ipv4() {
        Ok(ip) => format!(
            "{} {} -> {} id {} len {}",
            ip.proto(),
            ip.src(),
            ip.dst(),
            ip.ident(),
            ip.total_len()
        ),
        Err(_) => format!("frame of {} bytes", pkt.len()),
    }
}
