//! Backend translator dispatch
//!
//! Two engines share one [`BackendShared`]: [`BackendIngress`] takes client
//! packets addressed to the virtual address and hands them to the server,
//! [`BackendEgress`] returns the server's replies to the clients and answers
//! address resolution on the server side, either for the virtual address or
//! by proxy for the clients.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use super::client_table::ClientTable;
use super::proxy::{self, Answer, Solicit};
use super::worker::PacketEngine;
use crate::capture::{FrameSink, InterfaceRecord};
use crate::neighbor::{resolve_with_retry, AtomicMac, GatewayCache, NeighborResolver, RESOLVE_ATTEMPTS};
use crate::protocol::arp::ArpPacket;
use crate::protocol::checksum::checksum_delta;
use crate::protocol::ethernet::{self, Frame, HEADER_SIZE};
use crate::protocol::ipv4::{self, Ipv4Header};
use crate::protocol::ipv6::{self, Ipv6Header};
use crate::protocol::{EtherType, Family, MacAddr};
use crate::telemetry::{BackStat, BackTelemetry};

/// IPv4 frames must be at least this long
const MIN_V4_FRAME: usize = HEADER_SIZE + ipv4::MIN_HEADER_SIZE;

/// IPv6 frames must be longer than this
const MIN_V6_FRAME: usize = HEADER_SIZE + ipv6::HEADER_SIZE;

/// The one server behind this backend translator.
#[derive(Debug)]
pub struct ServerInfo {
    pub ip4: Option<Ipv4Addr>,
    pub ip6: Option<Ipv6Addr>,
    /// Checksum delta from the ingress virtual IPv4 address to `ip4`
    pub delta: u16,
    /// Unset until resolved
    mac: AtomicMac,
}

impl ServerInfo {
    pub fn new(ip4: Option<Ipv4Addr>, ip6: Option<Ipv6Addr>, vip4: Ipv4Addr) -> Self {
        let delta = ip4.map(|a| checksum_delta(vip4, a)).unwrap_or(0);
        Self {
            ip4,
            ip6,
            delta,
            mac: AtomicMac::new(),
        }
    }

    pub fn mac(&self) -> Option<MacAddr> {
        self.mac.load()
    }

    pub fn is_resolved(&self) -> bool {
        self.mac.load().is_some()
    }

    /// Resolves the server's `family` address on `egress`.
    pub fn resolve<R>(&self, family: Family, resolver: &mut R, egress: &InterfaceRecord) -> Option<MacAddr>
    where
        R: NeighborResolver + ?Sized,
    {
        let target = match family {
            Family::V4 => IpAddr::V4(self.ip4?),
            Family::V6 => IpAddr::V6(self.ip6?),
        };
        let mac = resolve_with_retry(resolver, target, egress, false).mac()?;
        self.mac.store(Some(mac));
        debug!(server = %target, %mac, "server resolved");
        Some(mac)
    }

    /// Resolves whichever server address answers first, IPv4 before IPv6.
    pub fn resolve_any<R>(&self, resolver: &mut R, egress: &InterfaceRecord) -> Option<MacAddr>
    where
        R: NeighborResolver + ?Sized,
    {
        [Family::V4, Family::V6]
            .into_iter()
            .find_map(|family| self.resolve(family, resolver, egress))
    }

    /// Disables on all three parties any family one of them lacks.
    pub fn merge_families(&mut self, ingress: &mut InterfaceRecord, egress: &mut InterfaceRecord) {
        if ingress.v4_enable && egress.v4_enable && self.ip4.is_some() {
            info!("backend v4 enable");
        } else {
            info!("backend v4 disable");
            ingress.v4_enable = false;
            egress.v4_enable = false;
            self.ip4 = None;
        }
        if ingress.v6_enable && egress.v6_enable && self.ip6.is_some() {
            info!("backend v6 enable");
        } else {
            info!("backend v6 disable");
            ingress.v6_enable = false;
            egress.v6_enable = false;
            self.ip6 = None;
        }
    }
}

/// State both backend workers and the control loop read.
#[derive(Debug)]
pub struct BackendShared {
    pub ingress: InterfaceRecord,
    pub egress: InterfaceRecord,
    pub vip_mode: bool,
    pub server: ServerInfo,
    /// Default gateway MACs on the ingress side
    pub gateway: GatewayCache,
    pub telemetry: Arc<BackTelemetry>,
}

impl BackendShared {
    pub fn new(
        ingress: InterfaceRecord,
        egress: InterfaceRecord,
        vip_mode: bool,
        server: ServerInfo,
        telemetry: Arc<BackTelemetry>,
    ) -> Self {
        Self {
            ingress,
            egress,
            vip_mode,
            server,
            gateway: GatewayCache::new(),
            telemetry,
        }
    }

    /// Resolves the default gateways of the enabled families.
    pub fn refresh_gateways<R>(&self, resolver: &mut R)
    where
        R: NeighborResolver + ?Sized,
    {
        if self.ingress.v4_enable {
            self.gateway.refresh(Family::V4, resolver, &self.ingress);
        }
        if self.ingress.v6_enable {
            self.gateway.refresh(Family::V6, resolver, &self.ingress);
        }
    }
}

/// Title of a client table in the dump.
pub fn client_title(family: Family, upstream: bool) -> &'static str {
    match (family, upstream) {
        (Family::V6, true) => "\nIPv6 client info (client to server)\n",
        (Family::V6, false) => "\nIPv6 client info (server to client)\n",
        (Family::V4, true) => "\nIPv4 client info (client to server)\n",
        (Family::V4, false) => "\nIPv4 client info (server to client)\n",
    }
}

/// Client-side worker.
pub struct BackendIngress {
    shared: Arc<BackendShared>,
    resolver: Box<dyn NeighborResolver>,
    /// Ingress socket
    local: Arc<dyn FrameSink>,
    /// Egress socket
    peer: Arc<dyn FrameSink>,
    up4: ClientTable<Ipv4Addr>,
    up6: ClientTable<Ipv6Addr>,
}

impl BackendIngress {
    pub fn new(
        shared: Arc<BackendShared>,
        resolver: Box<dyn NeighborResolver>,
        local: Arc<dyn FrameSink>,
        peer: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            shared,
            resolver,
            local,
            peer,
            up4: ClientTable::new(),
            up6: ClientTable::new(),
        }
    }

    fn stat(&self, kind: BackStat) {
        self.shared.telemetry.inc(kind);
    }

    pub fn clients_v4(&self) -> &ClientTable<Ipv4Addr> {
        &self.up4
    }

    pub fn clients_v6(&self) -> &ClientTable<Ipv6Addr> {
        &self.up6
    }

    /// Upstream clients of `family`.
    pub fn render_clients(&self, family: Family, out: &mut String) {
        match family {
            Family::V4 => self.up4.render(out),
            Family::V6 => self.up6.render(out),
        }
    }

    pub fn process(&mut self, frame: &mut [u8]) {
        if frame.len() <= HEADER_SIZE {
            self.stat(BackStat::RxDropShortIn);
            return;
        }
        let Ok(eth) = Frame::parse(frame) else {
            self.stat(BackStat::RxDropShortIn);
            return;
        };
        let (dst, src, ethertype) = (eth.dst_mac(), eth.src_mac(), eth.ethertype());
        if src == self.shared.ingress.mac {
            return;
        }

        if dst.is_multicast() {
            self.stat(BackStat::RxPacketMcIn);
            self.multicast(frame, ethertype);
            return;
        }

        match EtherType::from_u16(ethertype) {
            Some(EtherType::Ipv4) => {
                self.stat(BackStat::RxPacketV4In);
                if frame.len() >= MIN_V4_FRAME {
                    self.forward_v4(frame);
                } else {
                    self.stat(BackStat::RxDropShortIn);
                }
            }
            Some(EtherType::Ipv6) => {
                self.stat(BackStat::RxPacketV6In);
                if frame.len() <= MIN_V6_FRAME {
                    self.stat(BackStat::RxDropShortIn);
                } else if proxy::is_solicitation(frame) {
                    if self.shared.vip_mode {
                        self.unicast_ns(frame);
                    }
                } else {
                    self.forward_v6(frame);
                }
            }
            Some(EtherType::Arp) => {
                let iface = &self.shared.ingress;
                if iface.v4_enable {
                    if let Answer::Arp(reply) = proxy::answer_arp(frame, iface) {
                        self.local.send_frame(&reply);
                        self.stat(BackStat::TxArpReplyIn);
                    }
                }
            }
            _ => self.stat(BackStat::RxDropNoIpIn),
        }
    }

    fn multicast(&mut self, frame: &[u8], ethertype: u16) {
        match proxy::answer_multicast(frame, &self.shared.ingress) {
            Answer::Arp(reply) => {
                self.local.send_frame(&reply);
                self.stat(BackStat::TxArpReplyIn);
            }
            Answer::Na(reply) => {
                self.local.send_frame(&reply);
                self.stat(BackStat::TxNaIn);
            }
            Answer::Nothing => {}
            Answer::Drop => {
                self.stat(BackStat::RxDropIn);
                self.shared
                    .telemetry
                    .event(b"mcd0", frame.len() as u64, u64::from(ethertype), frame);
            }
        }
    }

    fn unicast_ns(&mut self, frame: &[u8]) {
        match proxy::answer_unicast_ns(frame, &self.shared.ingress) {
            Answer::Na(reply) => {
                self.local.send_frame(&reply);
                self.stat(BackStat::TxNaIn);
            }
            _ => self.stat(BackStat::RxDropIn),
        }
    }

    /// Server MAC, resolved through the `family` address on first use.
    fn server_mac(&mut self, family: Family) -> Option<MacAddr> {
        let shared = &self.shared;
        shared
            .server
            .mac()
            .or_else(|| shared.server.resolve(family, self.resolver.as_mut(), &shared.egress))
    }

    fn forward_v4(&mut self, frame: &mut [u8]) {
        self.shared.telemetry.event(b"pri4", frame.len() as u64, 0, frame);
        let Ok(ip) = Ipv4Header::parse(&frame[HEADER_SIZE..]) else {
            self.stat(BackStat::RxDropShortIn);
            return;
        };
        let (src, dst) = (ip.src_addr(), ip.dst_addr());
        if dst != self.shared.ingress.vip4 {
            self.stat(BackStat::RxDropAddrV4In);
            return;
        }
        self.up4.touch(src, SystemTime::now());

        let (Some(server), Some(mac)) = (self.shared.server.ip4, self.server_mac(Family::V4)) else {
            self.stat(BackStat::RxDropIn);
            return;
        };
        ethernet::set_dst_mac(frame, mac);
        if ipv4::rewrite_destination(&mut frame[HEADER_SIZE..], server, self.shared.server.delta).is_err() {
            self.stat(BackStat::RxDropShortIn);
            return;
        }
        self.peer.send_frame(frame);
        self.stat(BackStat::TxPacketV4In);
    }

    fn forward_v6(&mut self, frame: &mut [u8]) {
        self.shared.telemetry.event(b"prc6", frame.len() as u64, 0, frame);
        let Ok(ip) = Ipv6Header::parse(&frame[HEADER_SIZE..]) else {
            self.stat(BackStat::RxDropShortIn);
            return;
        };
        let (src, dst) = (ip.src_addr(), ip.dst_addr());
        if dst != self.shared.ingress.vip6 {
            self.stat(BackStat::RxDropAddrV6In);
            return;
        }
        self.up6.touch(src, SystemTime::now());

        let (Some(server), Some(mac)) = (self.shared.server.ip6, self.server_mac(Family::V6)) else {
            self.stat(BackStat::RxDropIn);
            return;
        };
        ethernet::set_dst_mac(frame, mac);
        if ipv6::rewrite_destination(&mut frame[HEADER_SIZE..], &server).is_err() {
            self.stat(BackStat::RxDropShortIn);
            return;
        }
        self.peer.send_frame(frame);
        self.stat(BackStat::TxPacketV6In);
    }
}

impl PacketEngine for BackendIngress {
    fn process(&mut self, frame: &mut [u8]) {
        BackendIngress::process(self, frame);
    }
}

/// How server replies are returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressMode {
    /// Forward unchanged
    Virtual,
    /// Frames the server addressed to this host go to the default gateway
    Real,
}

impl EgressMode {
    pub fn from_vip_mode(vip_mode: bool) -> Self {
        if vip_mode {
            EgressMode::Virtual
        } else {
            EgressMode::Real
        }
    }
}

/// Server-side worker.
pub struct BackendEgress {
    shared: Arc<BackendShared>,
    mode: EgressMode,
    resolver: Box<dyn NeighborResolver>,
    /// Egress socket
    local: Arc<dyn FrameSink>,
    /// Ingress socket
    peer: Arc<dyn FrameSink>,
    down4: ClientTable<Ipv4Addr>,
    down6: ClientTable<Ipv6Addr>,
}

impl BackendEgress {
    pub fn new(
        shared: Arc<BackendShared>,
        resolver: Box<dyn NeighborResolver>,
        local: Arc<dyn FrameSink>,
        peer: Arc<dyn FrameSink>,
    ) -> Self {
        let mode = EgressMode::from_vip_mode(shared.vip_mode);
        Self {
            shared,
            mode,
            resolver,
            local,
            peer,
            down4: ClientTable::new(),
            down6: ClientTable::new(),
        }
    }

    fn stat(&self, kind: BackStat) {
        self.shared.telemetry.inc(kind);
    }

    pub fn mode(&self) -> EgressMode {
        self.mode
    }

    pub fn clients_v4(&self) -> &ClientTable<Ipv4Addr> {
        &self.down4
    }

    pub fn clients_v6(&self) -> &ClientTable<Ipv6Addr> {
        &self.down6
    }

    /// Downstream clients of `family`.
    pub fn render_clients(&self, family: Family, out: &mut String) {
        match family {
            Family::V4 => self.down4.render(out),
            Family::V6 => self.down6.render(out),
        }
    }

    pub fn process(&mut self, frame: &mut [u8]) {
        if frame.len() <= HEADER_SIZE {
            self.stat(BackStat::RxDropShortEg);
            return;
        }
        let Ok(eth) = Frame::parse(frame) else {
            self.stat(BackStat::RxDropShortEg);
            return;
        };
        let (dst, src, ethertype) = (eth.dst_mac(), eth.src_mac(), eth.ethertype());
        if src == self.shared.egress.mac {
            return;
        }

        if dst.is_multicast() {
            self.stat(BackStat::RxPacketMcEg);
            self.multicast(frame, dst, ethertype);
            return;
        }

        match EtherType::from_u16(ethertype) {
            Some(EtherType::Ipv4) => {
                self.stat(BackStat::RxPacketV4Eg);
                if frame.len() >= MIN_V4_FRAME {
                    self.return_v4(frame);
                } else {
                    self.stat(BackStat::RxDropShortEg);
                }
            }
            Some(EtherType::Ipv6) => {
                self.stat(BackStat::RxPacketV6Eg);
                if frame.len() <= MIN_V6_FRAME {
                    self.stat(BackStat::RxDropShortEg);
                } else if proxy::is_solicitation(frame) {
                    self.unicast_ns(frame, dst);
                } else {
                    self.return_v6(frame);
                }
            }
            Some(EtherType::Arp) => {
                if self.shared.egress.v4_enable {
                    self.arp_reply(frame);
                }
            }
            _ => self.stat(BackStat::RxDropNoIpEg),
        }
    }

    fn multicast(&mut self, frame: &[u8], dst: MacAddr, ethertype: u16) {
        let shared = Arc::clone(&self.shared);
        let egress = &shared.egress;
        if dst.is_broadcast() {
            if ethertype == EtherType::Arp as u16 && egress.v4_enable {
                self.arp_reply(frame);
                return;
            }
        } else if ethertype == EtherType::Ipv6 as u16
            && egress.v6_enable
            && dst.is_ipv6_multicast()
            && proxy::is_solicitation(frame)
        {
            if shared.vip_mode && dst == egress.fmmac {
                if let Ok(sol) = proxy::solicitation(frame, Some(&egress.vip6)) {
                    self.gateway_na(&sol, true);
                    return;
                }
            } else if dst.0[2] == 0xff && dst.0[3..6] != proxy::group_suffix(&egress.sip6) {
                if let Ok(sol) = proxy::solicitation(frame, None) {
                    self.proxy_na(&sol, true);
                    return;
                }
            }
        }
        shared
            .telemetry
            .event(b"mceg", frame.len() as u64, u64::from(ethertype), frame);
        self.stat(BackStat::RxDropEg);
    }

    fn unicast_ns(&mut self, frame: &[u8], dst: MacAddr) {
        let shared = Arc::clone(&self.shared);
        let egress = &shared.egress;
        if !egress.v6_enable {
            self.stat(BackStat::RxDropEg);
            return;
        }
        if dst == egress.mac {
            if shared.vip_mode {
                if let Ok(sol) = proxy::solicitation(frame, Some(&egress.vip6)) {
                    self.gateway_na(&sol, false);
                }
            }
        } else if let Ok(sol) = proxy::solicitation(frame, None) {
            self.proxy_na(&sol, false);
        }
    }

    /// Answers a solicitation for the egress virtual address with the
    /// default gateway's MAC.
    fn gateway_na(&mut self, sol: &Solicit, multicast: bool) {
        let Some(mac) = self.gateway_mac(Family::V6) else {
            debug!(target_addr = %sol.target, "no v6 gateway for advertisement");
            return;
        };
        let reply = proxy::neighbor_advertisement(sol, sol.target, mac, multicast);
        self.local.send_frame(&reply);
        self.stat(BackStat::TxNaEg);
    }

    /// Answers for a client with its MAC as seen on the ingress side.
    /// Multicast solicitations must be sent to the target's own group.
    fn proxy_na(&mut self, sol: &Solicit, multicast: bool) {
        if multicast && sol.dst_mac.0[3..6] != proxy::group_suffix(&sol.target) {
            return;
        }
        let target = IpAddr::V6(sol.target);
        let Some(mac) = resolve_with_retry(self.resolver.as_mut(), target, &self.shared.ingress, false).mac()
        else {
            debug!(%target, "proxy advertisement target unresolved");
            return;
        };
        let reply = proxy::neighbor_advertisement(sol, sol.target, mac, multicast);
        self.local.send_frame(&reply);
        self.stat(BackStat::TxProxyNa);
    }

    /// Gateway MAC, refreshing the cache up to [`RESOLVE_ATTEMPTS`] times.
    fn gateway_mac(&mut self, family: Family) -> Option<MacAddr> {
        for _ in 0..RESOLVE_ATTEMPTS {
            if let Some(mac) = self.shared.gateway.get(family) {
                return Some(mac);
            }
            self.shared
                .gateway
                .refresh(family, self.resolver.as_mut(), &self.shared.ingress);
        }
        None
    }

    fn arp_reply(&mut self, frame: &[u8]) {
        let Some(req) = proxy::arp_request(frame) else {
            return;
        };
        let tpa = req.target_ip;
        let shared = Arc::clone(&self.shared);
        let egress = &shared.egress;
        if shared.vip_mode && tpa == egress.vip4 {
            if let Some(mac) = self.gateway_mac(Family::V4) {
                self.send_arp(&req, mac);
                self.stat(BackStat::TxArpReplyEg);
            }
        } else if tpa != egress.sip4 && Some(tpa) != shared.server.ip4 {
            self.proxy_arp(&req);
        }
    }

    fn proxy_arp(&mut self, req: &ArpPacket) {
        let target = IpAddr::V4(req.target_ip);
        match resolve_with_retry(self.resolver.as_mut(), target, &self.shared.ingress, false).mac() {
            Some(mac) => {
                self.send_arp(req, mac);
                self.stat(BackStat::TxProxyArp);
            }
            None => debug!(%target, "proxy arp target unresolved"),
        }
    }

    fn send_arp(&self, req: &ArpPacket, mac: MacAddr) {
        self.local.send_frame(&proxy::arp_reply_frame(req, mac));
    }

    fn return_v4(&mut self, frame: &mut [u8]) {
        let tag = match self.mode {
            EgressMode::Virtual => b"pre4",
            EgressMode::Real => b"prn4",
        };
        self.shared.telemetry.event(tag, frame.len() as u64, 0, frame);
        let Ok(ip) = Ipv4Header::parse(&frame[HEADER_SIZE..]) else {
            self.stat(BackStat::RxDropShortEg);
            return;
        };
        self.down4.touch(ip.dst_addr(), SystemTime::now());
        if !self.redirect_to_gateway(frame, Family::V4) {
            self.stat(BackStat::TxDropMac4);
            return;
        }
        self.peer.send_frame(frame);
        self.stat(BackStat::TxPacketV4Eg);
    }

    fn return_v6(&mut self, frame: &mut [u8]) {
        let tag = match self.mode {
            EgressMode::Virtual => b"pre6",
            EgressMode::Real => b"prn6",
        };
        self.shared.telemetry.event(tag, frame.len() as u64, 0, frame);
        let Ok(ip) = Ipv6Header::parse(&frame[HEADER_SIZE..]) else {
            self.stat(BackStat::RxDropShortEg);
            return;
        };
        self.down6.touch(ip.dst_addr(), SystemTime::now());
        if !self.redirect_to_gateway(frame, Family::V6) {
            self.stat(BackStat::TxDropMac6);
            return;
        }
        self.peer.send_frame(frame);
        self.stat(BackStat::TxPacketV6Eg);
    }

    /// In real-IP mode, points frames addressed to the egress MAC at the
    /// default gateway. Returns false when that gateway cannot be resolved.
    fn redirect_to_gateway(&mut self, frame: &mut [u8], family: Family) -> bool {
        if self.mode == EgressMode::Virtual {
            return true;
        }
        let addressed_to_us = frame[..6] == self.shared.egress.mac.0;
        if !addressed_to_us {
            return true;
        }
        let shared = &self.shared;
        match shared
            .gateway
            .get_or_refresh(family, self.resolver.as_mut(), &shared.ingress)
        {
            Some(mac) => {
                ethernet::set_dst_mac(frame, mac);
                true
            }
            None => false,
        }
    }
}

impl PacketEngine for BackendEgress {
    fn process(&mut self, frame: &mut [u8]) {
        BackendEgress::process(self, frame);
    }
}

/// Client section of a backend dump from the already rendered tables,
/// keyed by family and direction.
pub fn render_client_section<F>(out: &mut String, mut table: F)
where
    F: FnMut(Family, bool) -> String,
{
    for family in [Family::V6, Family::V4] {
        for upstream in [true, false] {
            out.push_str(client_title(family, upstream));
            out.push_str(&table(family, upstream));
        }
    }
}
