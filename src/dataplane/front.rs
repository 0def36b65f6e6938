//! Front translator dispatch
//!
//! Packets sent to the virtual address are matched against the policy by
//! source address and bounced back out the same interface toward the
//! chosen backend translator.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::policy::PolicyTable;
use super::proxy::{self, Answer};
use super::worker::PacketEngine;
use crate::capture::{FrameSink, InterfaceRecord};
use crate::config::policy::PolicyLine;
use crate::neighbor::NeighborResolver;
use crate::protocol::ethernet::{self, Frame, HEADER_SIZE};
use crate::protocol::ipv4::{self, Ipv4Header};
use crate::protocol::ipv6::{self, Ipv6Header};
use crate::protocol::EtherType;
use crate::telemetry::dump::{section_header, CLIENT_TITLE, POLICY_TITLE, SERVER_TITLE};
use crate::telemetry::{FrontStat, FrontTelemetry, LogSections};

/// Wait between wakeups with nothing to do
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait while a cache patrol is still running
pub const PATROL_TIMEOUT: Duration = Duration::from_secs(1);

/// IPv4 and IPv6 frames must be longer than these
const MIN_V4_FRAME: usize = HEADER_SIZE + ipv4::MIN_HEADER_SIZE;
const MIN_V6_FRAME: usize = HEADER_SIZE + ipv6::HEADER_SIZE;

/// State owned by the front worker thread.
pub struct FrontEngine {
    iface: InterfaceRecord,
    vip_mode: bool,
    policy: PolicyTable,
    resolver: Box<dyn NeighborResolver>,
    sink: Arc<dyn FrameSink>,
    telemetry: Arc<FrontTelemetry>,
}

impl FrontEngine {
    pub fn new(
        iface: InterfaceRecord,
        vip_mode: bool,
        resolver: Box<dyn NeighborResolver>,
        sink: Arc<dyn FrameSink>,
        telemetry: Arc<FrontTelemetry>,
    ) -> Self {
        Self {
            iface,
            vip_mode,
            policy: PolicyTable::new(),
            resolver,
            sink,
            telemetry,
        }
    }

    pub fn iface(&self) -> &InterfaceRecord {
        &self.iface
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    pub fn telemetry(&self) -> &Arc<FrontTelemetry> {
        &self.telemetry
    }

    /// Appends `lines` to the policy, resolving the servers they name.
    pub fn load_policy(&mut self, lines: &[PolicyLine]) {
        self.policy.load(lines, &self.iface, self.resolver.as_mut());
    }

    /// Drops all policy state and starts over with `iface` and `lines`.
    pub fn reload(&mut self, iface: InterfaceRecord, lines: &[PolicyLine]) {
        self.policy.reset();
        self.iface = iface;
        self.load_policy(lines);
        info!(
            generation = self.policy.generation(),
            rules = self.policy.v4().rules().len() + self.policy.v6().rules().len(),
            "policy reloaded"
        );
    }

    /// Replaces the sink, for a worker restarted on a new socket.
    pub fn set_sink(&mut self, sink: Arc<dyn FrameSink>) {
        self.sink = sink;
    }

    /// Handles one received frame. The frame is rewritten in place when
    /// forwarded.
    pub fn process(&mut self, frame: &mut [u8]) {
        if frame.len() <= HEADER_SIZE {
            self.telemetry.inc(FrontStat::RxDropShort);
            return;
        }
        let (dst, src, ethertype) = match Frame::parse(frame) {
            Ok(eth) => (eth.dst_mac(), eth.src_mac(), eth.ethertype()),
            Err(_) => {
                self.telemetry.inc(FrontStat::RxDropShort);
                return;
            }
        };
        // our own transmissions looped back
        if src == self.iface.mac {
            return;
        }

        if dst.is_multicast() {
            self.telemetry.inc(FrontStat::RxPacketMc);
            if self.vip_mode {
                self.multicast(frame, ethertype);
            }
            return;
        }

        match EtherType::from_u16(ethertype) {
            Some(EtherType::Ipv4) => {
                self.telemetry.inc(FrontStat::RxPacketV4);
                if frame.len() > MIN_V4_FRAME {
                    self.forward_v4(frame);
                } else {
                    self.telemetry.inc(FrontStat::RxDropShort);
                }
            }
            Some(EtherType::Ipv6) => {
                self.telemetry.inc(FrontStat::RxPacketV6);
                if frame.len() <= MIN_V6_FRAME {
                    self.telemetry.inc(FrontStat::RxDropShort);
                } else if proxy::is_solicitation(frame) {
                    if self.vip_mode {
                        self.unicast_ns(frame);
                    }
                } else {
                    self.forward_v6(frame);
                }
            }
            Some(EtherType::Arp) => {
                if self.iface.v4_enable {
                    if let Answer::Arp(reply) = proxy::answer_arp(frame, &self.iface) {
                        self.sink.send_frame(&reply);
                        self.telemetry.inc(FrontStat::TxArpReply);
                    }
                }
            }
            Some(EtherType::Vlan) => self.telemetry.inc(FrontStat::RxDropVlan),
            None => self.telemetry.inc(FrontStat::RxDropNoIp),
        }
    }

    fn multicast(&mut self, frame: &[u8], ethertype: u16) {
        match proxy::answer_multicast(frame, &self.iface) {
            Answer::Arp(reply) => {
                self.sink.send_frame(&reply);
                self.telemetry.inc(FrontStat::TxArpReply);
            }
            Answer::Na(reply) => {
                self.sink.send_frame(&reply);
                self.telemetry.inc(FrontStat::TxNa);
            }
            Answer::Nothing => {}
            Answer::Drop => {
                self.telemetry.inc(FrontStat::RxDrop);
                self.telemetry
                    .event(b"mcd0", frame.len() as u64, u64::from(ethertype), frame);
            }
        }
    }

    fn unicast_ns(&mut self, frame: &[u8]) {
        match proxy::answer_unicast_ns(frame, &self.iface) {
            Answer::Na(reply) => {
                self.sink.send_frame(&reply);
                self.telemetry.inc(FrontStat::TxNa);
            }
            _ => self.telemetry.inc(FrontStat::RxDrop),
        }
    }

    fn forward_v4(&mut self, frame: &mut [u8]) {
        self.telemetry.event(b"prc4", frame.len() as u64, 0, frame);
        let Ok(ip) = Ipv4Header::parse(&frame[HEADER_SIZE..]) else {
            self.telemetry.inc(FrontStat::RxDropShort);
            return;
        };
        let (src, dst): (Ipv4Addr, Ipv4Addr) = (ip.src_addr(), ip.dst_addr());
        if dst != self.iface.vip4 {
            self.telemetry.inc(FrontStat::RxDropAddrV4);
            return;
        }
        let Some(binding) = self
            .policy
            .resolve4(src, self.resolver.as_mut(), &self.iface)
        else {
            debug!(%src, "no v4 policy");
            self.telemetry.inc(FrontStat::RxDropPolicy);
            return;
        };

        ethernet::set_dst_mac(frame, binding.dst_mac);
        ethernet::set_src_mac(frame, self.iface.mac);
        if ipv4::rewrite_destination(&mut frame[HEADER_SIZE..], binding.dst, binding.delta).is_err() {
            self.telemetry.inc(FrontStat::RxDropShort);
            return;
        }
        self.telemetry.inc(FrontStat::TxPacketV4);
        self.sink.send_frame(frame);
    }

    fn forward_v6(&mut self, frame: &mut [u8]) {
        self.telemetry.event(b"prc6", frame.len() as u64, 0, frame);
        let Ok(ip) = Ipv6Header::parse(&frame[HEADER_SIZE..]) else {
            self.telemetry.inc(FrontStat::RxDropShort);
            return;
        };
        let (src, dst): (Ipv6Addr, Ipv6Addr) = (ip.src_addr(), ip.dst_addr());
        if dst != self.iface.vip6 {
            self.telemetry.inc(FrontStat::RxDropAddrV6);
            return;
        }
        let Some(binding) = self
            .policy
            .resolve6(src, self.resolver.as_mut(), &self.iface)
        else {
            debug!(%src, "no v6 policy");
            self.telemetry.inc(FrontStat::RxDropPolicy);
            return;
        };

        ethernet::set_dst_mac(frame, binding.dst_mac);
        ethernet::set_src_mac(frame, self.iface.mac);
        if ipv6::rewrite_destination(&mut frame[HEADER_SIZE..], &binding.dst).is_err() {
            self.telemetry.inc(FrontStat::RxDropShort);
            return;
        }
        self.telemetry.inc(FrontStat::TxPacketV6);
        self.sink.send_frame(frame);
    }

    /// One step of any pending cache patrol. Returns the wait before the
    /// next wakeup.
    pub fn patrol(&mut self) -> Duration {
        if self.policy.patrol_tick() {
            self.telemetry.inc(FrontStat::ClearPolicyCache);
        }
        if self.policy.patrol_pending() {
            PATROL_TIMEOUT
        } else {
            IDLE_TIMEOUT
        }
    }

    /// Client, policy and server sections of a dump.
    pub fn render_tables(&self, sections: LogSections, out: &mut String) {
        if sections.contains(LogSections::CLIENT) {
            section_header(out, CLIENT_TITLE);
            self.policy.render_clients(out);
        }
        if sections.contains(LogSections::POLICY) {
            section_header(out, POLICY_TITLE);
            self.policy.render_rules(out);
        }
        if sections.contains(LogSections::SERVER) {
            section_header(out, SERVER_TITLE);
            self.policy.render_servers(out);
        }
    }
}

impl PacketEngine for FrontEngine {
    fn process(&mut self, frame: &mut [u8]) {
        FrontEngine::process(self, frame);
    }

    fn after_wakeup(&mut self) -> Option<Duration> {
        Some(self.patrol())
    }

    fn on_timeout(&mut self) {
        self.telemetry.inc(FrontStat::SelectTimeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MemorySink;
    use crate::config::policy::parse;
    use crate::dataplane::proxy::tests::{make_arp_request, make_ns, OWN, PEER};
    use crate::neighbor::StaticResolver;
    use crate::protocol::checksum::ipv4_header_checksum;
    use crate::protocol::ethernet::FrameBuilder;
    use crate::protocol::MacAddr;
    use crate::telemetry::MessageLog;
    use std::net::IpAddr;

    const SERVER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x10]);

    fn vip4() -> Ipv4Addr {
        Ipv4Addr::new(192, 0, 2, 1)
    }

    fn vip6() -> Ipv6Addr {
        "2001:db8::1".parse().unwrap()
    }

    fn iface() -> InterfaceRecord {
        let mut rec = InterfaceRecord::new("eth0", OWN);
        rec.sip4 = Ipv4Addr::new(192, 0, 2, 254);
        rec.sip6 = "2001:db8::fe".parse().unwrap();
        rec.v4_enable = true;
        rec.v6_enable = true;
        rec.apply_virtual(true, Some("192.0.2.1"), Some("2001:db8::1"), crate::capture::Side::Ingress);
        rec
    }

    fn engine(policy: &str) -> (FrontEngine, Arc<MemorySink>) {
        let resolver = StaticResolver::new()
            .with_neighbor(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)), SERVER_MAC)
            .with_neighbor("2001:db8:1::10".parse().unwrap(), SERVER_MAC);
        let sink = Arc::new(MemorySink::new());
        let telemetry = Arc::new(FrontTelemetry::new(Arc::new(MessageLog::new())));
        let mut engine = FrontEngine::new(iface(), true, Box::new(resolver), sink.clone(), telemetry);
        engine.load_policy(&parse(policy));
        (engine, sink)
    }

    fn v4_frame(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let mut ip = vec![0u8; 28];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&28u16.to_be_bytes());
        ip[8] = 64;
        ip[9] = 17;
        ip[12..16].copy_from_slice(&src.octets());
        ip[16..20].copy_from_slice(&dst.octets());
        let sum = ipv4_header_checksum(&ip[..20]);
        ip[10..12].copy_from_slice(&sum.to_be_bytes());
        FrameBuilder::new()
            .dst_mac(OWN)
            .src_mac(PEER)
            .ethertype(EtherType::Ipv4)
            .payload(&ip)
            .build()
    }

    fn v6_frame(src: Ipv6Addr, dst: Ipv6Addr) -> Vec<u8> {
        let mut ip = ipv6::build_header(&src, &dst, 8, 17, 64).to_vec();
        ip.extend_from_slice(&[0u8; 8]);
        FrameBuilder::new()
            .dst_mac(OWN)
            .src_mac(PEER)
            .ethertype(EtherType::Ipv6)
            .payload(&ip)
            .build()
    }

    fn stat(engine: &FrontEngine, kind: FrontStat) -> u64 {
        engine.telemetry.stats.get(kind)
    }

    #[test]
    fn test_forward_v4() {
        let (mut engine, sink) = engine("10.0.0.0,255.0.0.0,192.168.1.10\n");
        let mut frame = v4_frame(Ipv4Addr::new(10, 1, 2, 3), vip4());
        engine.process(&mut frame);

        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        let eth = Frame::parse(&sent[0]).unwrap();
        assert_eq!(eth.dst_mac(), SERVER_MAC);
        assert_eq!(eth.src_mac(), OWN);
        let ip = Ipv4Header::parse(eth.payload()).unwrap();
        assert_eq!(ip.dst_addr(), Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(ipv4_header_checksum(&eth.payload()[..20]), 0);
        assert_eq!(stat(&engine, FrontStat::TxPacketV4), 1);

        // second packet comes from the cache
        let mut frame = v4_frame(Ipv4Addr::new(10, 1, 2, 3), vip4());
        engine.process(&mut frame);
        assert_eq!(sink.len(), 1);
        assert_eq!(engine.policy().v4().rules()[0].hit, 2);
        assert_eq!(engine.policy().v4().cache().entries().next().unwrap().hit, 2);
    }

    #[test]
    fn test_v4_wrong_destination_and_no_policy() {
        let (mut engine, sink) = engine("10.0.0.0,255.0.0.0,192.168.1.10\n");
        let mut frame = v4_frame(Ipv4Addr::new(10, 1, 2, 3), Ipv4Addr::new(192, 0, 2, 99));
        engine.process(&mut frame);
        assert_eq!(stat(&engine, FrontStat::RxDropAddrV4), 1);

        let mut frame = v4_frame(Ipv4Addr::new(172, 16, 0, 1), vip4());
        engine.process(&mut frame);
        assert_eq!(stat(&engine, FrontStat::RxDropPolicy), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_forward_v6() {
        let (mut engine, sink) = engine("2001:db8:2::,ffff:ffff:ffff::,2001:db8:1::10\n");
        let mut frame = v6_frame("2001:db8:2::5".parse().unwrap(), vip6());
        engine.process(&mut frame);

        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        let eth = Frame::parse(&sent[0]).unwrap();
        assert_eq!(eth.dst_mac(), SERVER_MAC);
        let ip = Ipv6Header::parse(eth.payload()).unwrap();
        assert_eq!(ip.dst_addr(), "2001:db8:1::10".parse::<Ipv6Addr>().unwrap());
        assert_eq!(stat(&engine, FrontStat::TxPacketV6), 1);
    }

    #[test]
    fn test_own_source_ignored() {
        let (mut engine, sink) = engine("10.0.0.0,255.0.0.0,192.168.1.10\n");
        let mut frame = v4_frame(Ipv4Addr::new(10, 1, 2, 3), vip4());
        ethernet::set_src_mac(&mut frame, OWN);
        engine.process(&mut frame);
        assert!(sink.is_empty());
        assert_eq!(stat(&engine, FrontStat::RxPacketV4), 0);
    }

    #[test]
    fn test_short_vlan_and_non_ip() {
        let (mut engine, _sink) = engine("");
        let mut short = vec![0u8; 14];
        engine.process(&mut short);
        assert_eq!(stat(&engine, FrontStat::RxDropShort), 1);

        let mut vlan = FrameBuilder::new()
            .dst_mac(OWN)
            .src_mac(PEER)
            .ethertype(EtherType::Vlan)
            .payload(&[0u8; 46])
            .build();
        engine.process(&mut vlan);
        assert_eq!(stat(&engine, FrontStat::RxDropVlan), 1);

        let mut other = vlan.clone();
        other[12..14].copy_from_slice(&0x88ccu16.to_be_bytes());
        engine.process(&mut other);
        assert_eq!(stat(&engine, FrontStat::RxDropNoIp), 1);
    }

    #[test]
    fn test_arp_for_vip() {
        let (mut engine, sink) = engine("");
        let mut frame = make_arp_request(MacAddr::BROADCAST, Ipv4Addr::new(192, 0, 2, 50), vip4());
        engine.process(&mut frame);
        assert_eq!(stat(&engine, FrontStat::RxPacketMc), 1);
        assert_eq!(stat(&engine, FrontStat::TxArpReply), 1);
        let sent = sink.take();
        assert_eq!(Frame::parse(&sent[0]).unwrap().dst_mac(), PEER);

        // unicast request for some other address: silently ignored
        let mut frame = make_arp_request(OWN, Ipv4Addr::new(192, 0, 2, 50), Ipv4Addr::new(192, 0, 2, 7));
        engine.process(&mut frame);
        assert!(sink.is_empty());
        assert_eq!(stat(&engine, FrontStat::RxDrop), 0);
    }

    #[test]
    fn test_ns_with_bad_hop_limit_dropped() {
        let (mut engine, sink) = engine("");
        let src: Ipv6Addr = "2001:db8::50".parse().unwrap();
        let mut frame = make_ns(OWN, src, vip6(), vip6(), 64);
        engine.process(&mut frame);
        assert!(sink.is_empty());
        assert_eq!(stat(&engine, FrontStat::RxDrop), 1);

        let mut frame = make_ns(OWN, src, vip6(), vip6(), 255);
        engine.process(&mut frame);
        assert_eq!(sink.len(), 1);
        assert_eq!(stat(&engine, FrontStat::TxNa), 1);
    }

    #[test]
    fn test_multicast_drop_records_event() {
        let (mut engine, _sink) = engine("");
        let mut frame = v4_frame(Ipv4Addr::new(10, 1, 2, 3), vip4());
        ethernet::set_dst_mac(&mut frame, MacAddr([0x01, 0x00, 0x5e, 0, 0, 1]));
        engine.process(&mut frame);
        assert_eq!(stat(&engine, FrontStat::RxDrop), 1);
        let events = engine.telemetry.events.snapshot();
        assert_eq!(events.last().unwrap().tag_str(), "mcd0");
    }

    #[test]
    fn test_patrol_timeouts() {
        let (mut engine, _sink) = engine("");
        assert_eq!(engine.patrol(), IDLE_TIMEOUT);
        assert_eq!(stat(&engine, FrontStat::ClearPolicyCache), 0);
    }

    #[test]
    fn test_reload_replaces_rules() {
        let (mut engine, sink) = engine("10.0.0.0,255.0.0.0,192.168.1.10\n");
        let mut frame = v4_frame(Ipv4Addr::new(10, 1, 2, 3), vip4());
        engine.process(&mut frame);
        assert_eq!(sink.take().len(), 1);

        engine.reload(iface(), &parse("172.16.0.0,255.240.0.0,192.168.1.10\n"));
        assert_eq!(engine.policy().generation(), 1);
        let mut frame = v4_frame(Ipv4Addr::new(10, 1, 2, 3), vip4());
        engine.process(&mut frame);
        assert!(sink.is_empty());
        assert_eq!(stat(&engine, FrontStat::RxDropPolicy), 1);
    }

    #[test]
    fn test_render_tables() {
        let (mut engine, _sink) = engine("10.0.0.0,255.0.0.0,192.168.1.10\n");
        let mut frame = v4_frame(Ipv4Addr::new(10, 1, 2, 3), vip4());
        engine.process(&mut frame);

        let mut out = String::new();
        engine.render_tables(LogSections::ALL, &mut out);
        assert!(out.contains(CLIENT_TITLE));
        assert!(out.contains("   1) 10.1.2.3 (1 packets) create: "));
        assert!(out.contains("   1) 10.0.0.0, 255.0.0.0, 192.168.1.10 (hit:1 client:1)"));
        assert!(out.contains("   1) 192.168.1.10 (1 packets)"));
    }
}
