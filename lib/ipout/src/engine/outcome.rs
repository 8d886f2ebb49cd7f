// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The result of running a packet through a pipeline.

use super::device::TxError;
use super::frag::FragError;
use super::icmp::IcmpError;
use super::ip4::Ipv4HdrError;
use super::route::RouteError;
use core::fmt;
use core::fmt::Display;
use ipout_api::EINVAL;
use ipout_api::EMSGSIZE;
use ipout_api::ENETUNREACH;
use ipout_api::FORWARD_ICMP_ANSWERED;

/// Why a packet was intentionally discarded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropReason {
    /// The output filter said no.
    Filtered,
    /// The packet is of a class the forwarding path never handles:
    /// link-layer broadcast or multicast, or an IP multicast
    /// destination.
    NotForwardable,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Filtered => "filtered",
            Self::NotForwardable => "not forwardable",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    #[error("network unreachable")]
    NetUnreachable,
    #[error("message too large")]
    MsgTooLarge,
    #[error("route: {0}")]
    Route(#[from] RouteError),
    #[error("transmit: {0}")]
    Tx(#[from] TxError),
    #[error("fragmentation: {0}")]
    Frag(#[from] FragError),
    #[error("bad header: {0}")]
    BadHeader(#[from] Ipv4HdrError),
    /// The datagram was answered with this ICMP error instead of
    /// being forwarded.
    #[error("answered with {0}")]
    IcmpAnswered(IcmpError),
}

impl ErrorKind {
    /// The negative result code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            Self::NetUnreachable => -ENETUNREACH,
            Self::MsgTooLarge => -EMSGSIZE,
            Self::Route(e) => -e.errno(),
            Self::Tx(e) => -e.errno(),
            Self::Frag(e) => -e.errno(),
            Self::BadHeader(_) => -EINVAL,
            Self::IcmpAnswered(_) => FORWARD_ICMP_ANSWERED,
        }
    }
}

/// What became of a packet.
///
/// The packet itself is gone in every case: sent, dropped or
/// answered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub enum Outcome {
    Sent,
    Dropped(DropReason),
    Failed(ErrorKind),
}

impl Outcome {
    /// The integer result: zero for sent or dropped, negative for
    /// failures.
    pub fn code(&self) -> i32 {
        match self {
            Self::Sent | Self::Dropped(_) => 0,
            Self::Failed(e) => e.code(),
        }
    }

    /// Pick the worse of two outcomes: the one with the lower code,
    /// `self` on a tie.
    pub fn worst(self, other: Outcome) -> Outcome {
        if other.code() < self.code() { other } else { self }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

impl From<ErrorKind> for Outcome {
    fn from(e: ErrorKind) -> Self {
        Self::Failed(e)
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Dropped(reason) => write!(f, "dropped: {reason}"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::icmp::IcmpError;
    use ipout_api::EHOSTUNREACH;
    use ipout_api::ENOBUFS;

    #[test]
    fn codes() {
        assert_eq!(Outcome::Sent.code(), 0);
        assert_eq!(Outcome::Dropped(DropReason::Filtered).code(), 0);
        assert_eq!(
            Outcome::Failed(ErrorKind::NetUnreachable).code(),
            -ENETUNREACH
        );
        assert_eq!(Outcome::Failed(ErrorKind::MsgTooLarge).code(), -EMSGSIZE);
        assert_eq!(
            Outcome::from(ErrorKind::from(RouteError::Unresolved {
                next_hop: "10.0.0.1".parse().unwrap()
            }))
            .code(),
            -EHOSTUNREACH
        );
        assert_eq!(
            Outcome::from(ErrorKind::from(TxError::QueueFull)).code(),
            -ENOBUFS
        );
        assert_eq!(
            Outcome::Failed(ErrorKind::IcmpAnswered(IcmpError::TimeExceeded))
                .code(),
            -1
        );
    }

    #[test]
    fn worst_picks_lowest() {
        let sent = Outcome::Sent;
        let dropped = Outcome::Dropped(DropReason::Filtered);
        let failed = Outcome::Failed(ErrorKind::MsgTooLarge);

        assert_eq!(sent.worst(dropped), sent);
        assert_eq!(dropped.worst(sent), dropped);
        assert_eq!(sent.worst(failed), failed);
        assert_eq!(failed.worst(sent), failed);

        let all = [sent, failed, dropped, Outcome::Failed(ErrorKind::NetUnreachable)];
        let worst = all.into_iter().fold(Outcome::Sent, Outcome::worst);
        assert_eq!(worst, Outcome::Failed(ErrorKind::NetUnreachable));
    }
}
