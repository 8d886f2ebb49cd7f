// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Error numbers surfaced by the IP output path to the socket layer.
//!
//! The values match the Linux/illumos numbering used by the socket
//! layer sitting above this crate. Pipelines report them negated.

pub const EIO: i32 = 5;
pub const EINVAL: i32 = 22;
pub const EMSGSIZE: i32 = 90;
pub const ENETUNREACH: i32 = 101;
pub const ENOBUFS: i32 = 105;
pub const EHOSTUNREACH: i32 = 113;

/// Returned by the forwarding entry point when the datagram was
/// answered with an ICMP error instead of being forwarded.
pub const FORWARD_ICMP_ANSWERED: i32 = -1;
