//! ARP and Neighbor Discovery answering.
//!
//! The translators own no IP stack, so they answer address resolution for
//! the addresses they serve themselves. These helpers only decide and build
//! frames; the engines send them and keep the counters.

use std::net::Ipv6Addr;

use crate::capture::InterfaceRecord;
use crate::protocol::arp::ArpPacket;
use crate::protocol::checksum::{icmpv6_checksum, ipv6_pseudo_header_sum, IPPROTO_ICMPV6};
use crate::protocol::ethernet::{Frame, FrameBuilder, HEADER_SIZE};
use crate::protocol::icmpv6::{validate_solicitation, NeighborAdvertisement, NeighborSolicitation};
use crate::protocol::ipv6::{self, Ipv6Header};
use crate::protocol::{EtherType, MacAddr};
use crate::Result;

/// What to do with an address-resolution frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Arp(Vec<u8>),
    Na(Vec<u8>),
    /// Not for us, but nothing to count
    Nothing,
    /// Counted as a drop
    Drop,
}

/// A Neighbor Solicitation that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solicit {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: Ipv6Addr,
    pub dst_ip: Ipv6Addr,
    pub target: Ipv6Addr,
}

/// ARP body of `frame`, when it carries a request of the kind the
/// translators answer.
pub fn arp_request(frame: &[u8]) -> Option<ArpPacket> {
    let eth = Frame::parse(frame).ok()?;
    if eth.ethertype() != EtherType::Arp as u16 {
        return None;
    }
    ArpPacket::parse_request(eth.payload()).ok()
}

/// Reply to `req` saying the requested address is at `mac`.
pub fn arp_reply_frame(req: &ArpPacket, mac: MacAddr) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(req.sender_mac)
        .src_mac(mac)
        .ethertype(EtherType::Arp)
        .payload(&req.answer(mac).to_bytes())
        .build()
}

/// Broadcast request announcing the interface's own IPv4 address.
pub fn gratuitous_arp(iface: &InterfaceRecord) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(MacAddr::BROADCAST)
        .src_mac(iface.mac)
        .ethertype(EtherType::Arp)
        .payload(&ArpPacket::gratuitous(iface.mac, iface.sip4).to_bytes())
        .build()
}

/// Answers an ARP request for `iface.vip4`.
pub fn answer_arp(frame: &[u8], iface: &InterfaceRecord) -> Answer {
    match arp_request(frame) {
        Some(req) if req.target_ip == iface.vip4 => Answer::Arp(arp_reply_frame(&req, iface.mac)),
        _ => Answer::Nothing,
    }
}

/// Whether `frame` carries a Neighbor Solicitation, valid or not.
pub fn is_solicitation(frame: &[u8]) -> bool {
    let Some(payload) = frame.get(HEADER_SIZE..) else {
        return false;
    };
    Ipv6Header::parse(payload)
        .ok()
        .and_then(|ip6| NeighborSolicitation::detect(&ip6))
        .is_some()
}

/// Parses and validates the solicitation in `frame`. With `expected` set
/// the target must be that address.
pub fn solicitation(frame: &[u8], expected: Option<&Ipv6Addr>) -> Result<Solicit> {
    let eth = Frame::parse(frame)?;
    let ip6 = Ipv6Header::parse(eth.payload())?;
    let ns = NeighborSolicitation::detect(&ip6)
        .ok_or_else(|| crate::Error::InvalidPacket("not a neighbor solicitation".into()))?;
    validate_solicitation(&ip6, &ns, expected)?;
    Ok(Solicit {
        src_mac: eth.src_mac(),
        dst_mac: eth.dst_mac(),
        src_ip: ip6.src_addr(),
        dst_ip: ip6.dst_addr(),
        target: ns.target_addr(),
    })
}

/// Advertisement answering `sol` with `target` at `mac`, sent from `mac`.
pub fn neighbor_advertisement(sol: &Solicit, target: Ipv6Addr, mac: MacAddr, multicast: bool) -> Vec<u8> {
    let mut msg = NeighborAdvertisement::answer(target, mac, multicast).to_bytes();
    let plen = msg.len() as u16;
    let base = ipv6_pseudo_header_sum(&target, &sol.src_ip, plen, IPPROTO_ICMPV6);
    let sum = icmpv6_checksum(&msg, base);
    msg[2..4].copy_from_slice(&sum.to_be_bytes());

    let header = ipv6::build_header(&target, &sol.src_ip, plen, IPPROTO_ICMPV6, 255);
    let mut payload = header.to_vec();
    payload.extend_from_slice(&msg);
    FrameBuilder::new()
        .dst_mac(sol.src_mac)
        .src_mac(mac)
        .ethertype(EtherType::Ipv6)
        .payload(&payload)
        .build()
}

/// Multicast and broadcast frames on a client-facing interface: ARP for
/// `vip4`, or a solicitation for `vip6` sent to its solicited-node group.
pub fn answer_multicast(frame: &[u8], iface: &InterfaceRecord) -> Answer {
    let Ok(eth) = Frame::parse(frame) else {
        return Answer::Drop;
    };
    let dst = eth.dst_mac();
    let ethertype = eth.ethertype();

    if dst.is_broadcast() {
        if ethertype == EtherType::Arp as u16 && iface.v4_enable {
            return answer_arp(frame, iface);
        }
    } else if ethertype == EtherType::Ipv6 as u16 && iface.v6_enable && dst == iface.fmmac {
        if let Ok(sol) = solicitation(frame, Some(&iface.vip6)) {
            return Answer::Na(neighbor_advertisement(&sol, iface.vip6, iface.mac, true));
        }
    }
    Answer::Drop
}

/// Unicast solicitation sent to `vip6`.
pub fn answer_unicast_ns(frame: &[u8], iface: &InterfaceRecord) -> Answer {
    if !iface.v6_enable {
        return Answer::Drop;
    }
    match solicitation(frame, Some(&iface.vip6)) {
        Ok(sol) if sol.dst_ip == iface.vip6 => {
            Answer::Na(neighbor_advertisement(&sol, iface.vip6, iface.mac, false))
        }
        _ => Answer::Drop,
    }
}

/// Last three bytes of `addr`, the part a solicited-node group keeps.
pub fn group_suffix(addr: &Ipv6Addr) -> [u8; 3] {
    let o = addr.octets();
    [o[13], o[14], o[15]]
}
