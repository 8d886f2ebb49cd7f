// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv4 fragmentation.
//!
//! A datagram larger than the outgoing device's MTU is cut into
//! fragments at 8-byte boundaries (RFC 791). The first fragment keeps
//! the original header, options included; later fragments carry only
//! the base header. A datagram which is itself a fragment is cut the
//! same way, with offsets kept relative to the original datagram.

use super::NetEnv;
use super::device::NetDevice;
use super::ip4::IPV4_FRAG_OFF_MAX;
use super::ip4::IPV4_FRAG_UNIT;
use super::ip4::IPV4_HDR_LEN;
use super::ip4::Ipv4Flags;
use super::ip4::Ipv4HdrError;
use super::ip4::parse_ref;
use super::outcome::ErrorKind;
use super::outcome::Outcome;
use super::output::Ipv4Output;
use super::packet::AllocError;
use super::packet::ETHER_HDR_LEN;
use super::packet::Packet;
use crate::provider::LogLevel;
use alloc::sync::Arc;
use alloc::vec::Vec;
use ipout_api::EINVAL;
use ipout_api::EMSGSIZE;
use ipout_api::ENOBUFS;
use zerocopy::IntoBytes;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FragError {
    #[error("MTU {mtu} cannot carry {hdr_len} header bytes and data")]
    MtuTooSmall { mtu: u16, hdr_len: usize },
    #[error("fragment offset {offset} does not fit the header")]
    OffsetOverflow { offset: usize },
    #[error("{0}")]
    Alloc(#[from] AllocError),
    #[error("{0}")]
    BadHeader(#[from] Ipv4HdrError),
}

impl FragError {
    /// The errno reported to callers for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            Self::MtuTooSmall { .. } => EMSGSIZE,
            Self::Alloc(_) => ENOBUFS,
            Self::OffsetOverflow { .. } | Self::BadHeader(_) => EINVAL,
        }
    }
}

/// Split `pkt` into fragments of at most `mtu` bytes of IPv4
/// datagram each.
///
/// The parent is left untouched. On failure every fragment built so
/// far is released.
pub fn fragment(pkt: &Packet, mtu: u16) -> Result<Vec<Packet>, FragError> {
    let ip = pkt.ip_bytes();
    let (hdr, opts) = parse_ref(ip)?;
    let hdr_len = hdr.hdr_len();
    let payload = &ip[hdr_len..usize::from(hdr.total_len())];
    let parent_off = hdr.frag_offset();
    let parent_mf = hdr.flags().contains(Ipv4Flags::MORE_FRAGMENTS);

    let mut frags = Vec::new();
    let mut off = 0;

    // A datagram with no payload still goes out as one fragment.
    while off < payload.len() || frags.is_empty() {
        let this_hdr_len = if off == 0 { hdr_len } else { IPV4_HDR_LEN };
        let room = usize::from(mtu).saturating_sub(this_hdr_len);
        let max_data = room & !(IPV4_FRAG_UNIT - 1);
        if max_data == 0 {
            return Err(FragError::MtuTooSmall { mtu, hdr_len: this_hdr_len });
        }

        let frag_off = parent_off + off;
        if frag_off > IPV4_FRAG_OFF_MAX {
            return Err(FragError::OffsetOverflow { offset: frag_off });
        }

        let data_len = max_data.min(payload.len() - off);
        let last = off + data_len == payload.len();
        let total_len = this_hdr_len + data_len;

        let mut frag = pkt.pool().alloc(ETHER_HDR_LEN + total_len)?;
        frag.copy_meta(pkt);
        frag.l2_mut().copy_from_slice(pkt.l2());

        {
            let bytes = frag.ip_bytes_mut();
            bytes[..IPV4_HDR_LEN].copy_from_slice(hdr.as_bytes());
            if this_hdr_len > IPV4_HDR_LEN {
                bytes[IPV4_HDR_LEN..this_hdr_len].copy_from_slice(opts);
            }
            bytes[this_hdr_len..]
                .copy_from_slice(&payload[off..off + data_len]);
            // Later fragments shrink to the base header, and the total
            // length must describe this buffer before it can be parsed.
            bytes[0] = (bytes[0] & 0xF0) | (this_hdr_len / 4) as u8;
            bytes[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        }

        let mut flags = hdr.flags() - Ipv4Flags::MORE_FRAGMENTS;
        if !last || parent_mf {
            flags |= Ipv4Flags::MORE_FRAGMENTS;
        }

        let mut fip = frag.ipv4_mut()?;
        fip.set_flags_and_offset(flags, frag_off);
        fip.update_csum();

        frags.push(frag);
        off += data_len;
    }

    Ok(frags)
}

impl Ipv4Output {
    /// Fragment `pkt` for `dev`, then filter and transmit every
    /// fragment.
    ///
    /// The parent is released once its contents have been copied.
    /// Every fragment is attempted even after a failure; the result is
    /// the worst of the individual results.
    pub fn fragment_and_send(
        &self,
        env: &NetEnv<'_>,
        pkt: Packet,
        dev: &Arc<dyn NetDevice>,
    ) -> Outcome {
        let res = fragment(&pkt, dev.mtu());
        drop(pkt);

        let frags = match res {
            Ok(frags) => frags,
            Err(e) => {
                self.stats().frag_fails.incr();
                self.log(
                    LogLevel::Warn,
                    &format!("failed to fragment for {}: {e}", dev.name()),
                );
                return Outcome::Failed(ErrorKind::Frag(e));
            }
        };

        self.stats().frag_oks.incr();
        self.stats().frag_creates.add(frags.len() as u64);

        frags.into_iter().fold(Outcome::Sent, |res, mut frag| {
            frag.set_dev(Arc::clone(dev));
            res.worst(self.queue_send(env, frag))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::packet::PacketPool;
    use crate::engine::ip4::Ipv4HdrRaw;
    use ipout_api::Protocol;

    fn datagram(
        pool: &Arc<PacketPool>,
        payload_len: usize,
        opts: &[u8],
    ) -> Packet {
        let hdr_len = IPV4_HDR_LEN + opts.len();
        let total = hdr_len + payload_len;
        let mut pkt = pool.alloc(ETHER_HDR_LEN + total).unwrap();
        pkt.l2_mut().copy_from_slice(&[0xAB; ETHER_HDR_LEN]);
        let raw = Ipv4HdrRaw {
            ver_hdr_len: 0x40 | (hdr_len / 4) as u8,
            total_len: (total as u16).to_be_bytes(),
            ident: 0x1234u16.to_be_bytes(),
            frag_and_flags: [0, 0],
            proto: Protocol::UDP.into(),
            src: [10, 0, 0, 2],
            dst: [192, 168, 1, 9],
            ..Default::default()
        };
        let ip = pkt.ip_bytes_mut();
        ip[..IPV4_HDR_LEN].copy_from_slice(raw.as_bytes());
        ip[IPV4_HDR_LEN..hdr_len].copy_from_slice(opts);
        for (i, b) in ip[hdr_len..].iter_mut().enumerate() {
            *b = i as u8;
        }
        pkt.ipv4_mut().unwrap().update_csum();
        pkt
    }

    #[test]
    fn sizes_and_offsets() {
        let pool = PacketPool::new();
        let pkt = datagram(&pool, 3000, &[]);
        let frags = fragment(&pkt, 1500).unwrap();
        assert_eq!(frags.len(), 3);

        let mut expect_off = 0;
        let mut data = Vec::new();
        for (i, f) in frags.iter().enumerate() {
            let ip = f.ipv4().unwrap();
            assert!(usize::from(ip.total_len()) <= 1500);
            assert_eq!(ip.frag_offset(), expect_off);
            assert_eq!(ip.ident(), 0x1234);
            assert_eq!(f.l2(), &[0xAB; ETHER_HDR_LEN]);
            let last = i == frags.len() - 1;
            assert_eq!(
                ip.flags().contains(Ipv4Flags::MORE_FRAGMENTS),
                !last
            );
            let payload = &f.ip_bytes()[ip.hdr_len()..];
            if !last {
                assert_eq!(payload.len() % 8, 0);
            }
            expect_off += payload.len();
            data.extend_from_slice(payload);
        }

        assert_eq!(data.len(), 3000);
        assert_eq!(&data[..], &pkt.ip_bytes()[IPV4_HDR_LEN..]);
    }

    #[test]
    fn options_only_in_first() {
        let pool = PacketPool::new();
        let pkt = datagram(&pool, 100, &[0x94, 0x04, 0x00, 0x00]);
        let frags = fragment(&pkt, 68).unwrap();
        assert!(frags.len() > 1);

        let first = frags[0].ipv4().unwrap();
        assert_eq!(first.hdr_len(), 24);
        // 68 - 24 = 44, rounded down to 40.
        assert_eq!(first.total_len(), 64);

        for f in &frags[1..] {
            let ip = f.ipv4().unwrap();
            assert_eq!(ip.hdr_len(), IPV4_HDR_LEN);
            assert!(ip.total_len() <= 68);
        }

        let sum: usize = frags
            .iter()
            .map(|f| {
                let ip = f.ipv4().unwrap();
                usize::from(ip.total_len()) - ip.hdr_len()
            })
            .sum();
        assert_eq!(sum, 100);
    }

    #[test]
    fn refragment_keeps_relative_offsets() {
        let pool = PacketPool::new();
        let mut pkt = datagram(&pool, 1000, &[]);
        {
            let mut ip = pkt.ipv4_mut().unwrap();
            ip.set_flags_and_offset(Ipv4Flags::MORE_FRAGMENTS, 2960);
            ip.update_csum();
        }

        let frags = fragment(&pkt, 576).unwrap();
        assert_eq!(frags.len(), 2);
        let a = frags[0].ipv4().unwrap();
        let b = frags[1].ipv4().unwrap();
        assert_eq!(a.frag_offset(), 2960);
        assert_eq!(b.frag_offset(), 2960 + 552);
        // The parent was not the last piece, so neither is its tail.
        assert!(b.flags().contains(Ipv4Flags::MORE_FRAGMENTS));
    }

    #[test]
    fn fragments_have_valid_checksums() {
        let pool = PacketPool::new();
        let pkt = datagram(&pool, 2000, &[]);
        let mut frags = fragment(&pkt, 1000).unwrap();
        for f in frags.iter_mut() {
            assert!(f.ipv4_mut().unwrap().csum_ok());
        }
    }

    #[test]
    fn mtu_too_small() {
        let pool = PacketPool::new();
        let pkt = datagram(&pool, 100, &[]);
        assert_eq!(
            fragment(&pkt, 27).unwrap_err(),
            FragError::MtuTooSmall { mtu: 27, hdr_len: 20 }
        );
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn offset_past_header_limit() {
        let pool = PacketPool::new();
        let mut pkt = datagram(&pool, 1000, &[]);
        {
            let mut ip = pkt.ipv4_mut().unwrap();
            ip.set_flags_and_offset(Ipv4Flags::empty(), 65000);
            ip.update_csum();
        }

        // The first piece still fits at 65000, the second would not.
        let err = fragment(&pkt, 576).unwrap_err();
        assert_eq!(err, FragError::OffsetOverflow { offset: 65000 + 552 });
        assert_eq!(err.errno(), EINVAL);
        assert_eq!(pool.outstanding(), 1);

        // A tail which fits at the largest offset is still cut.
        let mut tail = datagram(&pool, 8, &[]);
        {
            let mut ip = tail.ipv4_mut().unwrap();
            ip.set_flags_and_offset(Ipv4Flags::empty(), IPV4_FRAG_OFF_MAX);
            ip.update_csum();
        }
        let frags = fragment(&tail, 576).unwrap();
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].ipv4().unwrap().frag_offset(), IPV4_FRAG_OFF_MAX);
    }

    #[test]
    fn alloc_failure_releases_partial_work() {
        let pool = PacketPool::with_limit(3);
        let pkt = datagram(&pool, 3000, &[]);
        // Room for two fragments, but three are needed.
        assert!(matches!(
            fragment(&pkt, 1028),
            Err(FragError::Alloc(AllocError::Exhausted { limit: 3 }))
        ));
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.allocated(), 3);
        assert_eq!(pool.released(), 2);
    }
}
