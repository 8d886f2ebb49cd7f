// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Routines for building packet capture files.
//!
//! Captures are handy when a pipeline test fails: dump the frames a
//! device saw and open them in a protocol analyzer.

use crate::Frame;
use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use std::fs::File;
use std::io::Write;

/// Parse the capture file header.
pub fn get_header(offset: &[u8]) -> (&[u8], PcapHeader) {
    match pcap::parse_pcap_header(offset) {
        Ok((new_offset, header)) => (new_offset, header),
        Err(e) => panic!("failed to get header: {e:?}"),
    }
}

/// Parse the next captured frame.
pub fn next_block(offset: &[u8]) -> (&[u8], LegacyPcapBlock<'_>) {
    match pcap::parse_pcap_frame(offset) {
        Ok((new_offset, block)) => {
            // We always want access to the entire packet.
            assert_eq!(block.origlen, block.caplen);
            (new_offset, block)
        }

        Err(e) => panic!("failed to get next block: {e:?}"),
    }
}

/// Build a packet capture from a series of frames.
pub struct PcapBuilder<W: Write> {
    out: W,
    count: u32,
}

impl PcapBuilder<File> {
    /// Create a new pcap builder, writing all captures to `path`.
    pub fn create(path: &str) -> Self {
        Self::new(File::create(path).unwrap())
    }
}

impl<W: Write> PcapBuilder<W> {
    pub fn new(mut out: W) -> Self {
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 65535,
            network: Linktype::ETHERNET,
        };

        out.write_all(&hdr.to_vec().unwrap()).unwrap();

        Self { out, count: 0 }
    }

    /// Add a frame to the capture.
    pub fn add_frame(&mut self, frame: &Frame) {
        // Space captures a microsecond apart so analyzers keep order.
        let mut block = LegacyPcapBlock {
            ts_sec: 7777,
            ts_usec: self.count,
            caplen: frame.bytes.len() as u32,
            origlen: frame.bytes.len() as u32,
            data: &frame.bytes,
        };

        self.out.write_all(&block.to_vec().unwrap()).unwrap();
        self.count += 1;
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_then_parse() {
        let frames = [
            Frame { bytes: vec![1; 60], ethertype: 0x0800 },
            Frame { bytes: vec![2; 90], ethertype: 0x0800 },
        ];

        let mut pb = PcapBuilder::new(Vec::new());
        for f in &frames {
            pb.add_frame(f);
        }
        let buf = pb.into_inner();

        let (rest, hdr) = get_header(&buf);
        assert_eq!(hdr.network, Linktype::ETHERNET);
        let (rest, first) = next_block(rest);
        assert_eq!(first.data, &frames[0].bytes[..]);
        let (rest, second) = next_block(rest);
        assert_eq!(second.data, &frames[1].bytes[..]);
        assert_eq!(second.ts_usec, 1);
        assert!(rest.is_empty());
    }
}
