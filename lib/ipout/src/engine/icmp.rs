// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! ICMPv4 error and redirect messages.
//!
//! When the forwarding path cannot deliver a datagram it tells the
//! sender why. The message quotes the offending datagram's header and
//! the first bytes of its payload, and is sent like any other locally
//! originated datagram: routed, filtered, and fragmented if need be.
//!
//! Some datagrams must never be answered (RFC 1122 §3.2.2, RFC 1812
//! §4.3.2.7); see [`may_answer`].

use super::NetEnv;
use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use super::ip4::IPV4_HDR_LEN;
use super::ip4::Ipv4Flags;
use super::ip4::Ipv4HdrError;
use super::ip4::Ipv4HdrRaw;
use super::ip4::parse_ref;
use super::outcome::ErrorKind;
use super::outcome::Outcome;
use super::output::Ipv4Output;
use super::packet::AllocError;
use super::packet::ETHER_HDR_LEN;
use super::packet::Packet;
use super::socket::InetSocket;
use super::socket::icmp_err_notify;
use crate::cfg::IP_DEFAULT_TTL;
use crate::provider::LogLevel;
use core::fmt;
use core::fmt::Display;
use ipout_api::Ipv4Addr;
use ipout_api::Protocol;
use smoltcp::wire::Icmpv4DstUnreachable;
use smoltcp::wire::Icmpv4Message;
use smoltcp::wire::Icmpv4ParamProblem;
use smoltcp::wire::Icmpv4Redirect;
use smoltcp::wire::Icmpv4TimeExceeded;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const ICMP_HDR_LEN: usize = 8;

/// Source quench has no variant of its own in smoltcp's message type.
pub const ICMP_SOURCE_QUENCH: u8 = 4;

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct IcmpHdrRaw {
    pub ty: u8,
    pub code: u8,
    pub csum: [u8; 2],
    pub rest: [u8; 4],
}

/// An ICMP error or redirect the output path can emit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IcmpError {
    /// Something in the header is unacceptable; `pointer` is the
    /// offset of the octet at fault.
    ParamProblem { pointer: u8 },

    /// TTL exceeded in transit.
    TimeExceeded,

    /// `next_hop_mtu` is only meaningful for
    /// [`Icmpv4DstUnreachable::FragRequired`] (RFC 1191); it is zero
    /// otherwise.
    DestUnreachable { code: Icmpv4DstUnreachable, next_hop_mtu: u16 },

    Redirect { code: Icmpv4Redirect, gateway: Ipv4Addr },
}

impl IcmpError {
    pub fn net_unreachable() -> Self {
        Self::DestUnreachable {
            code: Icmpv4DstUnreachable::NetUnreachable,
            next_hop_mtu: 0,
        }
    }

    pub fn host_unreachable() -> Self {
        Self::DestUnreachable {
            code: Icmpv4DstUnreachable::HostUnreachable,
            next_hop_mtu: 0,
        }
    }

    pub fn frag_needed(mtu: u16) -> Self {
        Self::DestUnreachable {
            code: Icmpv4DstUnreachable::FragRequired,
            next_hop_mtu: mtu,
        }
    }

    pub fn msg_type(&self) -> Icmpv4Message {
        match self {
            Self::ParamProblem { .. } => Icmpv4Message::ParamProblem,
            Self::TimeExceeded => Icmpv4Message::TimeExceeded,
            Self::DestUnreachable { .. } => Icmpv4Message::DstUnreachable,
            Self::Redirect { .. } => Icmpv4Message::Redirect,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::ParamProblem { .. } => Icmpv4ParamProblem::AtPointer.into(),
            Self::TimeExceeded => Icmpv4TimeExceeded::TtlExpired.into(),
            Self::DestUnreachable { code, .. } => (*code).into(),
            Self::Redirect { code, .. } => (*code).into(),
        }
    }

    /// The four bytes following the checksum.
    pub fn rest_of_header(&self) -> [u8; 4] {
        match self {
            Self::ParamProblem { pointer } => [*pointer, 0, 0, 0],
            Self::TimeExceeded => [0; 4],
            Self::DestUnreachable { next_hop_mtu, .. } => {
                let mtu = next_hop_mtu.to_be_bytes();
                [0, 0, mtu[0], mtu[1]]
            }
            Self::Redirect { gateway, .. } => gateway.bytes(),
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, Self::Redirect { .. })
    }

    /// Record this error on the socket that generated the offending
    /// traffic.
    pub fn notify(&self, sk: &dyn InetSocket) {
        icmp_err_notify(sk, self.msg_type().into(), self.code());
    }
}

impl Display for IcmpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ParamProblem { pointer } => {
                write!(f, "parameter problem at {pointer}")
            }
            Self::TimeExceeded => write!(f, "time exceeded"),
            Self::DestUnreachable { code, next_hop_mtu: 0 } => {
                write!(f, "destination unreachable ({code:?})")
            }
            Self::DestUnreachable { code, next_hop_mtu } => {
                write!(f, "destination unreachable ({code:?}, mtu {next_hop_mtu})")
            }
            Self::Redirect { code, gateway } => {
                write!(f, "redirect ({code:?}) to {gateway}")
            }
        }
    }
}

/// Why a datagram may not be answered with an ICMP error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SuppressReason {
    #[error("offender is itself an ICMP error")]
    IcmpError,
    #[error("offender is a non-initial fragment")]
    NonInitialFragment,
    #[error("offender source {0} does not name a single host")]
    BadSource(Ipv4Addr),
    #[error("offender destination {0} is broadcast or multicast")]
    BadDest(Ipv4Addr),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum IcmpSendError {
    #[error("suppressed: {0}")]
    Suppressed(SuppressReason),
    #[error("offending datagram: {0}")]
    BadHeader(#[from] Ipv4HdrError),
    #[error("no route back to {0}")]
    NoRoute(Ipv4Addr),
    #[error("{0}")]
    Alloc(#[from] AllocError),
    #[error("send: {0}")]
    Send(ErrorKind),
}

fn is_icmp_error_type(ty: u8) -> bool {
    ty == ICMP_SOURCE_QUENCH
        || matches!(
            Icmpv4Message::from(ty),
            Icmpv4Message::DstUnreachable
                | Icmpv4Message::Redirect
                | Icmpv4Message::TimeExceeded
                | Icmpv4Message::ParamProblem
        )
}

/// May the datagram with header `ip` and upper-layer bytes `payload`
/// be answered with an ICMP error?
pub fn may_answer(
    ip: &Ipv4HdrRaw,
    payload: &[u8],
) -> Result<(), SuppressReason> {
    if !ip.is_initial_fragment() {
        return Err(SuppressReason::NonInitialFragment);
    }

    if ip.proto() == Protocol::ICMP {
        if let Some(ty) = payload.first() {
            if is_icmp_error_type(*ty) {
                return Err(SuppressReason::IcmpError);
            }
        }
    }

    let src = ip.src();
    if src.is_unspecified()
        || src.is_broadcast()
        || src.is_multicast()
        || src.is_loopback()
    {
        return Err(SuppressReason::BadSource(src));
    }

    let dst = ip.dst();
    if dst.is_broadcast() || dst.is_multicast() {
        return Err(SuppressReason::BadDest(dst));
    }

    Ok(())
}

impl Ipv4Output {
    /// Answer the sender of `pkt` with `err`.
    ///
    /// The triggering packet is consumed in every case. Sending is
    /// best effort: the error says why nothing went out.
    pub fn icmp_send(
        &self,
        env: &NetEnv<'_>,
        pkt: Packet,
        err: IcmpError,
    ) -> Result<(), IcmpSendError> {
        let reply = self.build_icmp_reply(env, &pkt, err);
        drop(pkt);

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                self.stats().icmp_suppressed.incr();
                if !matches!(e, IcmpSendError::Suppressed(_)) {
                    self.log(
                        LogLevel::Warn,
                        &format!("failed to build ICMP {err}: {e}"),
                    );
                }
                return Err(e);
            }
        };

        match self.send_packet(env, None, reply) {
            Outcome::Sent => {
                if err.is_redirect() {
                    self.stats().icmp_out_redirects.incr();
                } else {
                    self.stats().icmp_out_errors.incr();
                }
                Ok(())
            }

            // The filter's decision stands; it has been counted.
            Outcome::Dropped(_) => Ok(()),

            Outcome::Failed(kind) => {
                self.log(
                    LogLevel::Warn,
                    &format!("failed to send ICMP {err}: {kind}"),
                );
                Err(IcmpSendError::Send(kind))
            }
        }
    }

    /// Build the message answering `offender` with `err`, ready for
    /// the output pipeline.
    pub fn build_icmp_reply(
        &self,
        env: &NetEnv<'_>,
        offender: &Packet,
        err: IcmpError,
    ) -> Result<Packet, IcmpSendError> {
        let ip = offender.ip_bytes();
        let (hdr, _) = parse_ref(ip)?;
        let hdr_len = hdr.hdr_len();
        let total_len = usize::from(hdr.total_len());
        may_answer(hdr, &ip[hdr_len..total_len])
            .map_err(IcmpSendError::Suppressed)?;

        let daddr = hdr.src();
        let Some(route) = env.routes.best_match(daddr) else {
            return Err(IcmpSendError::NoRoute(daddr));
        };
        let saddr = route.dev.ipv4_addr();

        let quote = &ip[..total_len.min(hdr_len + self.cfg().icmp_quote_len)];
        let len = ETHER_HDR_LEN + IPV4_HDR_LEN + ICMP_HDR_LEN + quote.len();
        let mut reply = offender.pool().alloc(len)?;

        self.rebuild_ip_header(
            &mut reply,
            IP_DEFAULT_TTL,
            Protocol::ICMP,
            len,
            saddr,
            daddr,
        )?;
        {
            let mut rip = reply.ipv4_mut()?;
            rip.set_flags_and_offset(Ipv4Flags::empty(), 0);
            rip.update_csum();
        }

        let body = &mut reply.ip_bytes_mut()[IPV4_HDR_LEN..];
        let (icmp, data) = IcmpHdrRaw::mut_from_prefix(body)
            .map_err(|_| Ipv4HdrError::Truncated { len })?;
        icmp.ty = err.msg_type().into();
        icmp.code = err.code();
        icmp.rest = err.rest_of_header();
        data.copy_from_slice(quote);

        let mut csum = Checksum::compute(icmp.as_bytes());
        csum.add_bytes(data);
        icmp.csum = HeaderChecksum::from(csum).bytes();

        Ok(reply)
    }
}
