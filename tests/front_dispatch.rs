//! Front translator driven frame by frame, without sockets.

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use common::*;
use sasat::capture::{InterfaceRecord, MemorySink};
use sasat::config::policy;
use sasat::dataplane::front::{IDLE_TIMEOUT, PATROL_TIMEOUT};
use sasat::dataplane::FrontEngine;
use sasat::neighbor::StaticResolver;
use sasat::protocol::checksum::checksum_delta;
use sasat::protocol::ethernet::Frame;
use sasat::protocol::ipv4::Ipv4Header;
use sasat::protocol::ipv6::Ipv6Header;
use sasat::protocol::MacAddr;
use sasat::telemetry::{FrontStat, FrontTelemetry, LogSections, MessageLog};

const POLICY: &str = "\
# web tier
[v4]
10.0.0.0, 255.0.0.0, 192.168.1.10
10.1.0.0, 255.255.0.0, 192.168.1.11
0.0.0.0, 0.0.0.0, 192.168.1.12
[v6]
2001:db8:100::, ffff:ffff:ffff::, 2001:db8:1::10
";

fn own() -> MacAddr {
    mac(0x01)
}

fn client() -> MacAddr {
    mac(0x99)
}

fn front_iface() -> InterfaceRecord {
    iface("eth0", own(), "192.0.2.254", "192.0.2.1", "2001:db8::fe", "2001:db8::1")
}

struct Rig {
    engine: FrontEngine,
    sink: Arc<MemorySink>,
    telemetry: Arc<FrontTelemetry>,
}

impl Rig {
    fn new(policy_text: &str) -> Self {
        let resolver = StaticResolver::new()
            .with_neighbor(IpAddr::V4(v4("192.168.1.10")), mac(0x10))
            .with_neighbor(IpAddr::V4(v4("192.168.1.11")), mac(0x11))
            .with_neighbor(IpAddr::V4(v4("192.168.1.12")), mac(0x12))
            .with_neighbor(IpAddr::V6(v6("2001:db8:1::10")), mac(0x16));
        let sink = Arc::new(MemorySink::new());
        let telemetry = Arc::new(FrontTelemetry::new(Arc::new(MessageLog::new())));
        let mut engine = FrontEngine::new(
            front_iface(),
            true,
            Box::new(resolver),
            sink.clone(),
            Arc::clone(&telemetry),
        );
        engine.load_policy(&policy::parse(policy_text));
        Self {
            engine,
            sink,
            telemetry,
        }
    }

    fn send(&mut self, mut frame: Vec<u8>) -> Vec<Vec<u8>> {
        self.engine.process(&mut frame);
        self.sink.take()
    }

    fn stat(&self, kind: FrontStat) -> u64 {
        self.telemetry.stats.get(kind)
    }
}

#[test]
fn test_sources_spread_by_first_match() {
    let mut rig = Rig::new(POLICY);

    // 10.1.2.3 also matches the /16 rule, but the /8 comes first
    let cases = [
        ("10.1.2.3", "192.168.1.10", 0x10),
        ("172.16.0.9", "192.168.1.12", 0x12),
    ];
    for (src, server, server_mac) in cases {
        let sent = rig.send(udp4(own(), client(), v4(src), v4("192.0.2.1")));
        assert_eq!(sent.len(), 1, "{src}");
        let eth = Frame::parse(&sent[0]).unwrap();
        assert_eq!(eth.dst_mac(), mac(server_mac));
        assert_eq!(eth.src_mac(), own());
        let ip = Ipv4Header::parse(eth.payload()).unwrap();
        assert_eq!(ip.src_addr(), v4(src));
        assert_eq!(ip.dst_addr(), v4(server));
        assert!(ipv4_checksum_ok(&eth.payload()[..20]));
    }
    assert_eq!(rig.engine.policy().v4().rules()[1].hit, 0);
    assert_eq!(rig.stat(FrontStat::TxPacketV4), 2);
}

#[test]
fn test_incremental_checksum_matches_recomputation() {
    let mut rig = Rig::new("0.0.0.0, 0.0.0.0, 192.168.1.12\n");
    for last in [1u8, 7, 100, 200, 254] {
        let src = Ipv4Addr::new(198, 51, 100, last);
        let sent = rig.send(udp4(own(), client(), src, v4("192.0.2.1")));
        let eth = Frame::parse(&sent[0]).unwrap();
        assert!(ipv4_checksum_ok(&eth.payload()[..20]), "source {src}");
    }
    assert_ne!(checksum_delta(v4("192.0.2.1"), v4("192.168.1.12")), 0);
}

#[test]
fn test_cache_hits_counted_once_per_packet() {
    let mut rig = Rig::new(POLICY);
    for _ in 0..3 {
        let sent = rig.send(udp4(own(), client(), v4("10.9.9.9"), v4("192.0.2.1")));
        assert_eq!(sent.len(), 1);
    }
    let v4_policy = rig.engine.policy().v4();
    assert_eq!(v4_policy.rules()[0].hit, 3);
    let entry = v4_policy.cache().entries().next().unwrap();
    assert_eq!(entry.src, v4("10.9.9.9"));
    assert_eq!(entry.hit, 3);
}

#[test]
fn test_v6_forward_and_policy_miss() {
    let mut rig = Rig::new(POLICY);
    let sent = rig.send(udp6(own(), client(), v6("2001:db8:100::5"), v6("2001:db8::1")));
    assert_eq!(sent.len(), 1);
    let eth = Frame::parse(&sent[0]).unwrap();
    assert_eq!(eth.dst_mac(), mac(0x16));
    let ip = Ipv6Header::parse(eth.payload()).unwrap();
    assert_eq!(ip.dst_addr(), v6("2001:db8:1::10"));

    let sent = rig.send(udp6(own(), client(), v6("2001:db8:200::5"), v6("2001:db8::1")));
    assert!(sent.is_empty());
    assert_eq!(rig.stat(FrontStat::RxDropPolicy), 1);
}

#[test]
fn test_exhausted_cache_still_forwards() {
    let mut rig = Rig::new("10.0.0.0, 255.0.0.0, 192.168.1.10\n");
    let source = |n: u32| Ipv4Addr::from(0x0a00_0000 + n);

    for n in 1..=1024 {
        let sent = rig.send(udp4(own(), client(), source(n), v4("192.0.2.1")));
        assert_eq!(sent.len(), 1);
    }
    assert_eq!(rig.engine.policy().v4().cache().free_len(), 0);
    assert!(!rig.engine.policy().patrol_pending());

    let late = source(1025);
    let sent = rig.send(udp4(own(), client(), late, v4("192.0.2.1")));
    assert_eq!(sent.len(), 1);
    let eth = Frame::parse(&sent[0]).unwrap();
    assert_eq!(eth.dst_mac(), mac(0x10));
    assert!(rig.engine.policy().patrol_pending());
    assert!(rig.engine.policy().v4().cache().entries().all(|e| e.src != late));
    assert_eq!(rig.engine.policy().v4().cache().overflow().src, late);

    // Idle ticks drain the cache and then stand down
    let mut ticks = 0;
    while rig.engine.patrol() == PATROL_TIMEOUT {
        ticks += 1;
        assert!(ticks <= 5000, "patrol never finished");
    }
    assert!(!rig.engine.policy().patrol_pending());
    assert_eq!(rig.engine.policy().v4().cache().free_len(), 1024);
    assert!(rig.stat(FrontStat::ClearPolicyCache) > 0);
    assert_eq!(rig.engine.patrol(), IDLE_TIMEOUT);

    // and the late source now gets a slot
    rig.send(udp4(own(), client(), late, v4("192.0.2.1")));
    assert!(rig.engine.policy().v4().cache().entries().any(|e| e.src == late));
}

#[test]
fn test_neighbor_discovery_and_arp() {
    let mut rig = Rig::new(POLICY);

    let sent = rig.send(arp_request(MacAddr::BROADCAST, client(), v4("192.0.2.50"), v4("192.0.2.1")));
    assert_eq!(sent.len(), 1);
    assert_eq!(rig.stat(FrontStat::TxArpReply), 1);

    let iface = front_iface();
    let group = v6("ff02::1:ff00:1");
    let sent = rig.send(ns(iface.fmmac, client(), v6("2001:db8::50"), group, iface.vip6, 255));
    assert_eq!(sent.len(), 1);
    assert_eq!(rig.stat(FrontStat::TxNa), 1);

    let sent = rig.send(ns(iface.fmmac, client(), v6("2001:db8::50"), group, iface.vip6, 64));
    assert!(sent.is_empty());
    assert_eq!(rig.stat(FrontStat::TxNa), 1);
    assert_eq!(rig.stat(FrontStat::RxDrop), 1);
}

#[test]
fn test_reload_flushes_bindings() {
    let mut rig = Rig::new(POLICY);
    rig.send(udp4(own(), client(), v4("10.1.2.3"), v4("192.0.2.1")));
    let generation = rig.engine.policy().generation();

    rig.engine.reload(front_iface(), &policy::parse("0.0.0.0, 0.0.0.0, 192.168.1.11\n"));
    assert!(rig.engine.policy().generation() > generation);
    assert_eq!(rig.engine.policy().v4().cache().entries().count(), 0);

    let sent = rig.send(udp4(own(), client(), v4("10.1.2.3"), v4("192.0.2.1")));
    let eth = Frame::parse(&sent[0]).unwrap();
    assert_eq!(eth.dst_mac(), mac(0x11));

    let mut out = String::new();
    rig.engine.render_tables(LogSections::POLICY, &mut out);
    assert!(out.contains("POLICY STATUS:"));
    assert!(out.contains("0.0.0.0, 0.0.0.0, 192.168.1.11"));
    assert!(!out.contains("192.168.1.10"));
}
