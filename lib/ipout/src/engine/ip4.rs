// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv4 headers.

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use bitflags::bitflags;
use core::ops::Deref;
use core::ops::DerefMut;
pub use ipout_api::Ipv4Addr;
pub use ipout_api::Ipv4Cidr;
pub use ipout_api::Ipv4PrefixLen;
pub use ipout_api::Protocol;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV4_HDR_LEN_MASK: u8 = 0x0F;
pub const IPV4_HDR_VER_SHIFT: u8 = 4;
pub const IPV4_VERSION: u8 = 4;

/// The size of a header without options.
pub const IPV4_HDR_LEN: usize = 20;

/// Fragment offsets are expressed in units of this many bytes.
pub const IPV4_FRAG_UNIT: usize = 8;

const IPV4_FRAG_OFF_MASK: u16 = 0x1FFF;

/// The largest fragment offset, in bytes, the header can carry.
pub const IPV4_FRAG_OFF_MAX: usize =
    IPV4_FRAG_OFF_MASK as usize * IPV4_FRAG_UNIT;

bitflags! {
    /// The flag bits of the flags/fragment-offset field.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Ipv4Flags: u16 {
        const RESERVED = 0x8000;
        const DONT_FRAGMENT = 0x4000;
        const MORE_FRAGMENTS = 0x2000;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Ipv4HdrError {
    #[error("buffer of {len} bytes cannot hold an IPv4 header")]
    Truncated { len: usize },
    #[error("bad IP version: {vsn}")]
    BadVersion { vsn: u8 },
    #[error("header length {hdr_len} outside buffer or below minimum")]
    HeaderTruncated { hdr_len: u16 },
    #[error("total length {total_len} inconsistent with header or buffer")]
    BadTotalLen { total_len: u16 },
}

/// The fixed part of an IPv4 header, as laid out on the wire.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Default for Ipv4HdrRaw {
    fn default() -> Self {
        Ipv4HdrRaw {
            ver_hdr_len: 0x45,
            dscp_ecn: 0x0,
            total_len: [0x0; 2],
            ident: [0x0; 2],
            frag_and_flags: [0x40, 0x0],
            ttl: crate::cfg::IP_DEFAULT_TTL,
            proto: u8::from(Protocol::Unknown(255)),
            csum: [0x0; 2],
            src: [0x0; 4],
            dst: [0x0; 4],
        }
    }
}

impl Ipv4HdrRaw {
    #[inline]
    pub fn csum(&self) -> [u8; 2] {
        self.csum
    }

    #[inline]
    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst)
    }

    #[inline]
    pub fn flags(&self) -> Ipv4Flags {
        Ipv4Flags::from_bits_truncate(u16::from_be_bytes(
            self.frag_and_flags,
        ))
    }

    /// Return the fragment offset, in bytes.
    #[inline]
    pub fn frag_offset(&self) -> usize {
        let raw = u16::from_be_bytes(self.frag_and_flags) & IPV4_FRAG_OFF_MASK;
        usize::from(raw) * IPV4_FRAG_UNIT
    }

    /// Return the header length, in bytes.
    #[inline]
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ver_hdr_len & IPV4_HDR_LEN_MASK) * 4
    }

    #[inline]
    pub fn ident(&self) -> u16 {
        u16::from_be_bytes(self.ident)
    }

    /// Is this datagram the first (or only) piece of the original?
    #[inline]
    pub fn is_initial_fragment(&self) -> bool {
        self.frag_offset() == 0
    }

    #[inline]
    pub fn proto(&self) -> Protocol {
        Protocol::from(self.proto)
    }

    #[inline]
    pub fn set_flags_and_offset(&mut self, flags: Ipv4Flags, offset: usize) {
        let units = (offset / IPV4_FRAG_UNIT) as u16 & IPV4_FRAG_OFF_MASK;
        self.frag_and_flags = (flags.bits() | units).to_be_bytes();
    }

    #[inline]
    pub fn set_ident(&mut self, ident: u16) {
        self.ident = ident.to_be_bytes();
    }

    #[inline]
    pub fn set_total_len(&mut self, len: u16) {
        self.total_len = len.to_be_bytes()
    }

    #[inline]
    pub fn set_ttl(&mut self, ttl: u8) {
        self.ttl = ttl;
    }

    #[inline]
    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src)
    }

    #[inline]
    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(self.total_len)
    }

    #[inline]
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.ver_hdr_len >> IPV4_HDR_VER_SHIFT
    }
}

/// A validated, mutable view of an IPv4 header, options included.
pub struct Ipv4Hdr<'a> {
    raw: &'a mut Ipv4HdrRaw,
    opts: &'a mut [u8],
}

impl<'a> Ipv4Hdr<'a> {
    /// Parse the header at the front of `buf`, which holds the whole
    /// datagram.
    pub fn parse(buf: &'a mut [u8]) -> Result<Self, Ipv4HdrError> {
        let len = buf.len();
        let (raw, rest) = Ipv4HdrRaw::mut_from_prefix(buf)
            .map_err(|_| Ipv4HdrError::Truncated { len })?;
        let opts_len = validate(raw, len)? - IPV4_HDR_LEN;
        let (opts, _) = rest.split_at_mut(opts_len);
        Ok(Self { raw, opts })
    }

    /// Return the header length, in bytes.
    pub fn hdr_len(&self) -> usize {
        IPV4_HDR_LEN + self.opts.len()
    }

    pub fn opts(&self) -> &[u8] {
        self.opts
    }

    /// Compute the header checksum and store it in the header.
    pub fn update_csum(&mut self) {
        self.raw.csum = [0; 2];
        let mut csum = Checksum::compute(self.raw.as_bytes());
        csum.add_bytes(self.opts);
        self.raw.csum = HeaderChecksum::from(csum).bytes();
    }

    /// Does the stored checksum match the header contents?
    pub fn csum_ok(&self) -> bool {
        let mut csum = Checksum::compute(self.raw.as_bytes());
        csum.add_bytes(self.opts);
        csum.finalize() == 0xFFFF
    }
}

impl Deref for Ipv4Hdr<'_> {
    type Target = Ipv4HdrRaw;

    fn deref(&self) -> &Self::Target {
        self.raw
    }
}

impl DerefMut for Ipv4Hdr<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.raw
    }
}

/// Parse a read-only view of the header at the front of `buf`.
///
/// Returns the fixed header and its options.
pub fn parse_ref(buf: &[u8]) -> Result<(&Ipv4HdrRaw, &[u8]), Ipv4HdrError> {
    let len = buf.len();
    let (raw, rest) = Ipv4HdrRaw::ref_from_prefix(buf)
        .map_err(|_| Ipv4HdrError::Truncated { len })?;
    let opts_len = validate(raw, len)? - IPV4_HDR_LEN;
    Ok((raw, &rest[..opts_len]))
}

/// Compute the checksum of a header as if its checksum field were
/// zero. The stored checksum field is ignored.
pub fn hdr_csum(raw: &Ipv4HdrRaw, opts: &[u8]) -> HeaderChecksum {
    let mut csum = Checksum::compute(raw.as_bytes());
    csum.sub_bytes(&raw.csum);
    csum.add_bytes(opts);
    HeaderChecksum::from(csum)
}

// Check the header fits in a datagram buffer of `len` bytes and return
// the header length.
fn validate(raw: &Ipv4HdrRaw, len: usize) -> Result<usize, Ipv4HdrError> {
    match raw.version() {
        IPV4_VERSION => {}
        vsn => return Err(Ipv4HdrError::BadVersion { vsn }),
    }

    let hdr_len = raw.hdr_len();
    if hdr_len < IPV4_HDR_LEN || hdr_len > len {
        return Err(Ipv4HdrError::HeaderTruncated { hdr_len: hdr_len as u16 });
    }

    let total_len = raw.total_len();
    if usize::from(total_len) < hdr_len || usize::from(total_len) > len {
        return Err(Ipv4HdrError::BadTotalLen { total_len });
    }

    Ok(hdr_len)
}
