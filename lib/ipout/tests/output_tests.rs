// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Locally originated traffic through the output pipeline.

use ipout_test_utils as common;

use common::pcap::PcapBuilder;
use common::pcap::get_header;
use common::pcap::next_block;
use common::*;
use ipout::print::print_stats_into;
use itertools::Itertools;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv4Address;

fn udp_sock(dst: &str) -> InetSock {
    InetSock::new(SockType::Dgram, Protocol::UDP, dst.parse().unwrap())
}

#[test]
fn socket_send_builds_header() {
    let net = TestNet::new();
    let sk = udp_sock("10.0.0.77");
    let pkt = socket_frame(&net.pool, 100);

    let res = net.send(Some(&sk), pkt);
    assert_eq!(res, Outcome::Sent);
    assert_eq!(res.code(), 0);

    // The socket now sends from the address of the chosen interface.
    assert_eq!(sk.saddr(), "10.0.0.1".parse().unwrap());

    let frames = net.net0.take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].ethertype, 0x0800);
    assert_eq!(
        &frames[0].bytes[0..6],
        &FakeDevice::neighbor_mac("10.0.0.77".parse().unwrap())
    );

    let ip = frames[0].ipv4();
    assert_eq!(ip.version(), 4);
    assert_eq!(ip.header_len(), 20);
    assert_eq!(ip.dscp(), 0);
    assert_eq!(ip.total_len(), 120);
    assert_eq!(ip.ident(), 1230);
    assert!(ip.dont_frag());
    assert!(!ip.more_frags());
    assert_eq!(ip.frag_offset(), 0);
    assert_eq!(ip.hop_limit(), 64);
    assert_eq!(ip.next_header(), IpProtocol::Udp);
    assert_eq!(ip.src_addr(), Ipv4Address::new(10, 0, 0, 1));
    assert_eq!(ip.dst_addr(), Ipv4Address::new(10, 0, 0, 77));
    assert!(ip.verify_checksum());

    drop(frames);
    net.assert_all_released();
    let stats = net.ipo.stats().snapshot();
    assert_eq!(stats.out_requests, 1);
    assert_eq!(stats.out_transmits, 1);
}

#[test]
fn ident_strictly_increasing() {
    let net = TestNet::new();
    let sk = udp_sock("10.0.0.77");

    for _ in 0..8 {
        let res = net.send(Some(&sk), socket_frame(&net.pool, 10));
        assert!(res.is_sent());
    }

    let ids = net
        .net0
        .take_frames()
        .iter()
        .map(|f| f.ipv4().ident())
        .collect::<Vec<_>>();
    assert_eq!(ids.len(), 8);
    assert_eq!(ids[0], 1230);
    for (a, b) in ids.iter().tuple_windows() {
        assert_eq!(*b, a.wrapping_add(1));
    }
}

#[test]
fn ident_wraps() {
    let cfg = Ipv4Cfg { initial_ident: u16::MAX - 1, ..Default::default() };
    let net = TestNet::with_cfg(cfg);
    let sk = udp_sock("10.0.0.77");

    for _ in 0..3 {
        assert!(net.send(Some(&sk), socket_frame(&net.pool, 10)).is_sent());
    }

    let ids = net
        .net0
        .take_frames()
        .iter()
        .map(|f| f.ipv4().ident())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![u16::MAX - 1, u16::MAX, 0]);
}

#[test]
fn fixed_ttl_ignores_socket() {
    let net = TestNet::new();
    let sk = udp_sock("10.0.0.77").with_ttl(5);
    assert!(net.send(Some(&sk), socket_frame(&net.pool, 10)).is_sent());
    assert_eq!(net.net0.take_frames()[0].ipv4().hop_limit(), 64);
}

#[test]
fn socket_ttl_policy_honors_socket() {
    let cfg = Ipv4Cfg { ttl_policy: TtlPolicy::Socket, ..Default::default() };
    let net = TestNet::with_cfg(cfg);
    let sk = udp_sock("10.0.0.77").with_ttl(5);
    assert!(net.send(Some(&sk), socket_frame(&net.pool, 10)).is_sent());
    assert_eq!(net.net0.take_frames()[0].ipv4().hop_limit(), 5);
}

#[test]
fn raw_socket_header_untouched() {
    let net = TestNet::new();
    let sk = InetSock::new(
        SockType::Raw,
        Protocol::UDP,
        "192.168.1.9".parse().unwrap(),
    );
    let pkt = DatagramSpec::new("10.9.9.9", "192.168.1.9", 40)
        .ttl(9)
        .df(true)
        .build(&net.pool);
    let before = pkt.ip_bytes().to_vec();

    assert!(net.send(Some(&sk), pkt).is_sent());
    let frames = net.net1.take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0].bytes[ETHER_HDR_LEN..], &before[..]);

    // Routing still updates the socket's source.
    assert_eq!(sk.saddr(), "192.168.1.1".parse().unwrap());
    // And no identification value was consumed.
    assert_eq!(net.ipo.ident().peek(), 1230);
}

#[test]
fn no_route_is_net_unreachable() {
    let mut net = TestNet::new();
    assert_eq!(net.fib.remove("0.0.0.0/0".parse().unwrap()), 1);
    let sk = udp_sock("8.8.8.8");

    let res = net.send(Some(&sk), socket_frame(&net.pool, 100));
    assert_eq!(res, Outcome::Failed(ErrorKind::NetUnreachable));
    assert_eq!(res.code(), -ENETUNREACH);

    assert_eq!(net.total_frames(), 0);
    assert_eq!(sk.saddr(), Ipv4Addr::ANY_ADDR);
    net.assert_all_released();
    assert_eq!(net.ipo.stats().snapshot().out_no_routes, 1);
}

#[test]
fn default_route_resolves_gateway() {
    let net = TestNet::new();
    let sk = udp_sock("8.8.8.8");
    assert!(net.send(Some(&sk), socket_frame(&net.pool, 100)).is_sent());
    assert_eq!(net.net0.resolved(), vec!["10.0.0.254".parse().unwrap()]);

    let frames = net.net0.take_frames();
    assert_eq!(frames[0].ipv4().dst_addr(), Ipv4Address::new(8, 8, 8, 8));
}

#[test]
fn broadcast_without_route_uses_bound_device() {
    let mut net = TestNet::new();
    net.fib.remove("0.0.0.0/0".parse().unwrap());

    let mut pkt = DatagramSpec::new("0.0.0.0", "255.255.255.255", 300)
        .build(&net.pool);
    pkt.set_dev(net.net1.clone());

    assert_eq!(net.send(None, pkt), Outcome::Sent);
    let frames = net.net1.take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0].bytes[0..6], &[0xFF; 6]);
    net.assert_all_released();
}

#[test]
fn broadcast_without_route_or_device() {
    let mut net = TestNet::new();
    net.fib.remove("0.0.0.0/0".parse().unwrap());

    let pkt = DatagramSpec::new("0.0.0.0", "255.255.255.255", 300)
        .build(&net.pool);
    let res = net.send(None, pkt);
    assert_eq!(res, Outcome::Failed(ErrorKind::Route(RouteError::NoDevice)));
    assert_eq!(res.code(), -ENETUNREACH);
    assert_eq!(net.total_frames(), 0);
    net.assert_all_released();
}

#[test]
fn dont_fragment_oversize_is_msg_too_large() {
    let net = TestNet::new();
    let sk = udp_sock("192.168.1.9");

    // The header builder always sets DF, and net1 has a 576 MTU.
    let res = net.send(Some(&sk), socket_frame(&net.pool, 1000));
    assert_eq!(res, Outcome::Failed(ErrorKind::MsgTooLarge));
    assert_eq!(res.code(), -EMSGSIZE);
    assert_eq!(net.total_frames(), 0);
    net.assert_all_released();
}

#[test]
fn exactly_mtu_is_not_fragmented() {
    let net = TestNet::new();
    let sk = udp_sock("192.168.1.9");

    // 20 + 556 = 576: the frame is longer than the MTU, the datagram
    // is not.
    let res = net.send(Some(&sk), socket_frame(&net.pool, 556));
    assert_eq!(res, Outcome::Sent);
    assert_eq!(net.net1.take_frames()[0].ipv4().total_len(), 576);
}

#[test]
fn prebuilt_header_is_fragmented() {
    let net = TestNet::new();
    let pkt = DatagramSpec::new("192.168.1.1", "192.168.1.9", 1400)
        .build(&net.pool);

    assert_eq!(net.send(None, pkt), Outcome::Sent);

    let frames = net.net1.take_frames();
    let lens = frames
        .iter()
        .map(|f| f.ipv4().total_len())
        .collect::<Vec<_>>();
    assert_eq!(lens, vec![572, 572, 316]);

    drop(frames);
    net.assert_all_released();
    let stats = net.ipo.stats().snapshot();
    assert_eq!(stats.frag_oks, 1);
    assert_eq!(stats.frag_creates, 3);
    assert_eq!(stats.out_transmits, 3);
}

#[test]
fn policy_drop_is_silent() {
    let net = TestNet::new();
    let sk = udp_sock("10.0.0.77");
    let filter = drop_all_output();

    let res = net.send_filtered(&filter, Some(&sk), socket_frame(&net.pool, 64));
    assert_eq!(res, Outcome::Dropped(DropReason::Filtered));
    assert_eq!(res.code(), 0);
    assert_eq!(net.net0.tx_attempts(), 0);
    net.assert_all_released();

    assert_eq!(net.log.count(LogLevel::Note, "dropped by output filter"), 1);
    assert_eq!(net.ipo.stats().snapshot().out_discards, 1);
}

#[test]
fn rule_set_filters_by_destination() {
    let net = TestNet::new();
    let mut filter = RuleSet::new();
    let mut rule = Rule::new(Verdict::Drop);
    rule.add_predicate(Predicate::DstIp4(vec![
        "192.168.1.0/24".parse().unwrap(),
    ]));
    filter.add_rule(Chain::Output, rule);

    let to_net0 = udp_sock("10.0.0.77");
    let to_net1 = udp_sock("192.168.1.9");

    let res =
        net.send_filtered(&filter, Some(&to_net0), socket_frame(&net.pool, 10));
    assert_eq!(res, Outcome::Sent);
    let res =
        net.send_filtered(&filter, Some(&to_net1), socket_frame(&net.pool, 10));
    assert_eq!(res, Outcome::Dropped(DropReason::Filtered));

    assert_eq!(net.net0.frame_count(), 1);
    assert_eq!(net.net1.frame_count(), 0);
}

#[test]
fn transmit_failure_is_reported() {
    let net = TestNet::new();
    net.net0.set_fail_tx(true);
    let sk = udp_sock("10.0.0.77");

    let res = net.send(Some(&sk), socket_frame(&net.pool, 64));
    assert_eq!(res, Outcome::Failed(ErrorKind::Tx(TxError::Down)));
    assert_eq!(res.code(), -EIO);
    assert_eq!(net.net0.tx_attempts(), 1);
    net.assert_all_released();
    assert_eq!(net.log.count(LogLevel::Warn, "transmit on net0 failed"), 1);
}

#[test]
fn resolve_failure_is_reported() {
    let net = TestNet::new();
    net.net0.set_fail_resolve(true);
    let sk = udp_sock("10.0.0.77");

    let res = net.send(Some(&sk), socket_frame(&net.pool, 64));
    assert_eq!(
        res,
        Outcome::Failed(ErrorKind::Route(RouteError::Unresolved {
            next_hop: "10.0.0.77".parse().unwrap()
        }))
    );
    assert_eq!(res.code(), -EHOSTUNREACH);
    assert_eq!(net.total_frames(), 0);
    net.assert_all_released();
}

#[test]
fn short_frame_is_rejected() {
    let net = TestNet::new();
    let sk = udp_sock("10.0.0.77");
    let pkt = net.pool.alloc(ETHER_HDR_LEN + 10).unwrap();

    let res = net.send(Some(&sk), pkt);
    assert!(matches!(res, Outcome::Failed(ErrorKind::BadHeader(_))));
    assert_eq!(net.total_frames(), 0);
    net.assert_all_released();
}

#[test]
fn stats_print_and_capture() {
    let net = TestNet::new();
    let sk = udp_sock("10.0.0.77");
    for _ in 0..3 {
        assert!(net.send(Some(&sk), socket_frame(&net.pool, 32)).is_sent());
    }

    let snap = net.ipo.stats().snapshot();
    let json = serde_json::to_string(&snap).unwrap();
    assert!(json.contains("\"out_transmits\":3"));

    let mut out = Vec::new();
    print_stats_into(&mut out, &snap).unwrap();
    let table = String::from_utf8(out).unwrap();
    assert!(table.lines().any(|l| l.starts_with("out_requests")
        && l.trim_end().ends_with('3')));

    let mut pb = PcapBuilder::new(Vec::new());
    for f in net.net0.take_frames() {
        pb.add_frame(&f);
    }
    let buf = pb.into_inner();
    let (mut rest, _) = get_header(&buf);
    let mut count = 0;
    while !rest.is_empty() {
        let (next, block) = next_block(rest);
        assert_eq!(block.caplen as usize, ETHER_HDR_LEN + 20 + 32);
        rest = next;
        count += 1;
    }
    assert_eq!(count, 3);
}
