// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types for calculating the internet checksum.
//!
//! The [`Checksum`] type provides a rolling one's complement sum,
//! which is finalized into a [`HeaderChecksum`]: the two bytes stored
//! in the header itself.
//!
//! # Checksums and Endianness
//!
//! The checksum is not a logical integer, it is a sequence of two
//! bytes. The bytes being summed are already in network order, so
//! each pair is treated as a native 16-bit integer and the finished
//! sum is stored back the same way (`{to,from}_ne_bytes()`). On a
//! little-endian host this flips the bytes twice, which cancels out.
//! See RFC 1071 §1.B.
//!
//! # Relevant RFCs
//!
//! * 1071 Computing the Internet Checksum
//!
//! * 1624 Computation of the Internet Checksum via Incremental Update

/// The checksum value, as it is contained in a network header.
///
/// This holds the bytes with one's complement already applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    /// Return the bytes of this header checksum.
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Wrap the checksum bytes found in a header.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }
}

impl From<Checksum> for HeaderChecksum {
    /// Finalize the rolling checksum and put it into header form by
    /// performing one's complement.
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_ne_bytes() }
    }
}

/// A rolling one's complement checksum calculation.
///
/// Carries are accumulated in the upper half and only folded when
/// the sum is finalized.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the sum by adding the contents of `bytes`.
    ///
    /// An odd trailing byte is padded with zero, so a buffer may only
    /// be split across calls at even offsets.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Create a new rolling checksum, starting with `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Update the sum by subtracting the contents of `bytes`.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_sub(self.inner, bytes);
    }

    /// Fold the accumulated carries and return the 16-bit sum.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }
}

impl From<HeaderChecksum> for Checksum {
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: (!u16::from_ne_bytes(hc.bytes())) as u32 }
    }
}

impl core::ops::AddAssign for Checksum {
    fn add_assign(&mut self, other: Self) {
        self.inner += other.inner
    }
}

fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut words = bytes.chunks_exact(2);

    for w in &mut words {
        csum += u16::from_ne_bytes([w[0], w[1]]) as u32;
    }

    if let [last] = words.remainder() {
        csum += u16::from_ne_bytes([*last, 0]) as u32;
    }

    csum
}

fn csum_sub(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut words = bytes.chunks_exact(2);

    for w in &mut words {
        csum += (!u16::from_ne_bytes([w[0], w[1]])) as u32;
    }

    if let [last] = words.remainder() {
        csum += (!u16::from_ne_bytes([*last, 0])) as u32;
    }

    csum
}

#[cfg(test)]
mod test {
    use super::*;

    // The example header from RFC 1071 §3 style walkthroughs: a
    // 20-byte IPv4 header whose correct checksum is 0xb861.
    const HDR: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00,
        0x00, 0xc0, 0xa8, 0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn known_header() {
        let hc = HeaderChecksum::from(Checksum::compute(&HDR));
        assert_eq!(hc.bytes(), [0xb8, 0x61]);
    }

    #[test]
    fn sum_with_checksum_is_all_ones() {
        let mut hdr = HDR;
        let hc = HeaderChecksum::from(Checksum::compute(&hdr));
        hdr[10..12].copy_from_slice(&hc.bytes());
        assert_eq!(Checksum::compute(&hdr).finalize(), 0xFFFF);
    }

    #[test]
    fn sub_undoes_add() {
        let mut csum = Checksum::compute(&HDR);
        csum.add_bytes(&[0x12, 0x34, 0x56, 0x78]);
        csum.sub_bytes(&[0x12, 0x34, 0x56, 0x78]);
        let mut orig = Checksum::compute(&HDR);
        assert_eq!(csum.finalize(), orig.finalize());
    }

    #[test]
    fn odd_length_pads_with_zero() {
        let mut a = Checksum::compute(&[0xab, 0xcd, 0xef]);
        let mut b = Checksum::compute(&[0xab, 0xcd, 0xef, 0x00]);
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn round_trip_header_form() {
        let hc = HeaderChecksum::wrap([0x12, 0x34]);
        let csum = Checksum::from(hc);
        assert_eq!(HeaderChecksum::from(csum), hc);
    }
}
