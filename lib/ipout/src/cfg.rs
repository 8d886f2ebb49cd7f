// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Tunables for the IPv4 output path.

use serde::Deserialize;
use serde::Serialize;

/// The TTL stamped on locally built headers under [`TtlPolicy::Fixed`].
pub const IP_DEFAULT_TTL: u8 = 64;

/// The first identification value handed out after start.
pub const IP_INITIAL_IDENT: u16 = 1230;

/// Payload bytes of the offending datagram quoted in an ICMP error
/// (RFC 792).
pub const ICMP_QUOTE_LEN: usize = 8;

/// How the header builder picks the TTL of a locally built header.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum TtlPolicy {
    /// Always stamp [`IP_DEFAULT_TTL`]; the socket's TTL is accepted
    /// but not used. This is the historical behavior of the stack.
    #[default]
    Fixed,

    /// Stamp the TTL requested by the originating socket.
    Socket,
}

impl TtlPolicy {
    /// Pick the TTL to stamp given the socket's requested value.
    pub fn select(self, requested: u8) -> u8 {
        match self {
            Self::Fixed => IP_DEFAULT_TTL,
            Self::Socket => requested,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Ipv4Cfg {
    pub ttl_policy: TtlPolicy,
    pub initial_ident: u16,
    pub send_redirects: bool,
    pub icmp_quote_len: usize,
}

impl Default for Ipv4Cfg {
    fn default() -> Self {
        Self {
            ttl_policy: TtlPolicy::default(),
            initial_ident: IP_INITIAL_IDENT,
            send_redirects: true,
            icmp_quote_len: ICMP_QUOTE_LEN,
        }
    }
}
