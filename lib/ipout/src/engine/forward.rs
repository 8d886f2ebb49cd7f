// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The forwarding pipeline for transit datagrams (RFC 1812 §5.2).

use super::NetEnv;
use super::icmp::IcmpError;
use super::ip4::IPV4_HDR_LEN;
use super::ip4::Ipv4Flags;
use super::outcome::DropReason;
use super::outcome::ErrorKind;
use super::outcome::Outcome;
use super::output::Ipv4Output;
use super::output::describe;
use super::packet::Packet;
use super::packet::PktType;
use super::route;
use super::route::Route;
use crate::provider::LogLevel;
use ipout_api::Ipv4Addr;
use smoltcp::wire::Icmpv4Redirect;

impl Ipv4Output {
    /// Forward a datagram received for another host.
    ///
    /// The packet is consumed. When it cannot be forwarded the sender
    /// is told why with an ICMP error, and the result is a failure
    /// naming that error.
    pub fn forward_packet(&self, env: &NetEnv<'_>, mut pkt: Packet) -> Outcome {
        // Link-layer broadcast and multicast, and IP multicast, are
        // delivered elsewhere and never forwarded from here. The class
        // is known before the header is looked at.
        if pkt.pkt_type() != PktType::Host {
            self.stats().in_addr_errors.incr();
            return Outcome::Dropped(DropReason::NotForwardable);
        }

        let (dst, hdr_len, ttl) = match pkt.ipv4() {
            Ok(ip) => (ip.dst(), ip.hdr_len(), ip.ttl()),
            Err(e) => {
                self.stats().in_hdr_errors.incr();
                return Outcome::Failed(ErrorKind::BadHeader(e));
            }
        };

        if dst.is_multicast() {
            self.stats().in_addr_errors.incr();
            return Outcome::Dropped(DropReason::NotForwardable);
        }

        // Options are refused outright, before the TTL is touched, so
        // the answer travels as far back as possible.
        if hdr_len > IPV4_HDR_LEN {
            self.stats().in_hdr_errors.incr();
            let err = IcmpError::ParamProblem { pointer: IPV4_HDR_LEN as u8 };
            return self.icmp_answer(env, pkt, err);
        }

        if ttl <= 1 {
            self.stats().in_ttl_exceeded.incr();
            return self.icmp_answer(env, pkt, IcmpError::TimeExceeded);
        }

        // Every route is one hop, so the TTL drops before the lookup.
        match pkt.ipv4_mut() {
            Ok(mut ip) => {
                ip.set_ttl(ttl - 1);
                ip.update_csum();
            }
            Err(e) => {
                self.stats().in_hdr_errors.incr();
                return Outcome::Failed(ErrorKind::BadHeader(e));
            }
        }

        let Some(route) = env.routes.best_match(dst) else {
            self.stats().out_no_routes.incr();
            return self.icmp_answer(env, pkt, IcmpError::net_unreachable());
        };

        if self.cfg().send_redirects
            && pkt.rx_dev() == Some(route.dev.id())
        {
            self.send_redirect(env, &pkt, &route, dst);
        }

        if let Err(e) = route::bind(&mut pkt, Some(&route), dst) {
            self.log(
                LogLevel::Note,
                &format!("{} not forwarded: {e}", describe(&pkt)),
            );
            let err = match route.gateway {
                Some(_) => IcmpError::host_unreachable(),
                None => IcmpError::net_unreachable(),
            };
            return self.icmp_answer(env, pkt, err);
        }

        let (total_len, df) = match pkt.ipv4() {
            Ok(ip) => (
                ip.total_len(),
                ip.flags().contains(Ipv4Flags::DONT_FRAGMENT),
            ),
            Err(e) => {
                self.stats().in_hdr_errors.incr();
                return Outcome::Failed(ErrorKind::BadHeader(e));
            }
        };

        let mtu = route.mtu();
        if total_len > mtu {
            if df {
                self.stats().frag_fails.incr();
                return self.icmp_answer(env, pkt, IcmpError::frag_needed(mtu));
            }

            let res = self.fragment_and_send(env, pkt, &route.dev);
            if res.is_sent() {
                self.stats().forw_datagrams.incr();
            }
            return res;
        }

        let res = self.queue_xmit(pkt);
        if res.is_sent() {
            self.stats().forw_datagrams.incr();
        }
        res
    }

    /// Tell the sender of `pkt` that it could have reached the next
    /// hop directly. The packet itself is left for forwarding.
    ///
    /// The redirect is built from a copy; when no copy can be made no
    /// redirect is sent.
    fn send_redirect(
        &self,
        env: &NetEnv<'_>,
        pkt: &Packet,
        route: &Route,
        dst: Ipv4Addr,
    ) {
        let Some(copy) = pkt.share() else {
            self.stats().icmp_suppressed.incr();
            self.log(
                LogLevel::Note,
                &format!("redirect for {} suppressed: no buffer", describe(pkt)),
            );
            return;
        };

        let code = match route.gateway {
            Some(_) => Icmpv4Redirect::Host,
            None => Icmpv4Redirect::Net,
        };
        let err = IcmpError::Redirect { code, gateway: route.next_hop(dst) };

        if self.icmp_send(env, copy, err).is_ok() {
            self.log(
                LogLevel::Note,
                &format!("sent {err} for {}", describe(pkt)),
            );
        }
    }

    // Answer the offender and report the datagram as lost.
    fn icmp_answer(
        &self,
        env: &NetEnv<'_>,
        pkt: Packet,
        err: IcmpError,
    ) -> Outcome {
        // Failures to send are counted and logged by icmp_send; the
        // datagram is lost either way.
        let _ = self.icmp_send(env, pkt, err);
        Outcome::Failed(ErrorKind::IcmpAnswered(err))
    }
}
