//! Frame builders shared by the integration tests.
#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr};

use sasat::capture::InterfaceRecord;
use sasat::protocol::arp::{ArpOp, ArpPacket};
use sasat::protocol::checksum::{fold, icmpv6_checksum, internet_checksum, ipv6_pseudo_header_sum, IPPROTO_ICMPV6};
use sasat::protocol::ethernet::FrameBuilder;
use sasat::protocol::ipv6;
use sasat::protocol::{EtherType, MacAddr};

pub fn mac(last: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, last])
}

pub fn v4(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

pub fn v6(s: &str) -> Ipv6Addr {
    s.parse().unwrap()
}

/// An enabled dual-stack interface answering for `vip4`/`vip6`.
pub fn iface(name: &str, mac: MacAddr, sip4: &str, vip4: &str, sip6: &str, vip6: &str) -> InterfaceRecord {
    let mut rec = InterfaceRecord::new(name, mac);
    rec.sip4 = v4(sip4);
    rec.sip6 = v6(sip6);
    rec.v4_enable = true;
    rec.v6_enable = true;
    rec.apply_virtual(true, Some(vip4), Some(vip6), sasat::capture::Side::Ingress);
    rec
}

pub fn ipv4_checksum_ok(header: &[u8]) -> bool {
    !fold(internet_checksum(header)) == 0
}

/// Ethernet + IPv4/UDP with an 8-byte payload and a valid header checksum.
pub fn udp4(dst_mac: MacAddr, src_mac: MacAddr, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let mut ip = vec![0u8; 36];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&36u16.to_be_bytes());
    ip[8] = 64;
    ip[9] = 17;
    ip[12..16].copy_from_slice(&src.octets());
    ip[16..20].copy_from_slice(&dst.octets());
    let sum = !fold(internet_checksum(&ip[..20]));
    ip[10..12].copy_from_slice(&sum.to_be_bytes());
    FrameBuilder::new()
        .dst_mac(dst_mac)
        .src_mac(src_mac)
        .ethertype(EtherType::Ipv4)
        .payload(&ip)
        .build()
}

/// Ethernet + IPv6/UDP with an 8-byte payload.
pub fn udp6(dst_mac: MacAddr, src_mac: MacAddr, src: Ipv6Addr, dst: Ipv6Addr) -> Vec<u8> {
    let mut ip = ipv6::build_header(&src, &dst, 8, 17, 64).to_vec();
    ip.extend_from_slice(&[0u8; 8]);
    FrameBuilder::new()
        .dst_mac(dst_mac)
        .src_mac(src_mac)
        .ethertype(EtherType::Ipv6)
        .payload(&ip)
        .build()
}

pub fn arp_request(dst_mac: MacAddr, src_mac: MacAddr, sender: Ipv4Addr, target: Ipv4Addr) -> Vec<u8> {
    let req = ArpPacket {
        operation: ArpOp::Request,
        sender_mac: src_mac,
        sender_ip: sender,
        target_mac: MacAddr::ZERO,
        target_ip: target,
    };
    FrameBuilder::new()
        .dst_mac(dst_mac)
        .src_mac(src_mac)
        .ethertype(EtherType::Arp)
        .payload(&req.to_bytes())
        .build()
}

/// Neighbor Solicitation for `target` with a source link-layer option.
pub fn ns(
    dst_mac: MacAddr,
    src_mac: MacAddr,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    target: Ipv6Addr,
    hop_limit: u8,
) -> Vec<u8> {
    let mut msg = vec![0u8; 24];
    msg[0] = 135;
    msg[8..24].copy_from_slice(&target.octets());
    msg.extend_from_slice(&[1, 1]);
    msg.extend_from_slice(&src_mac.0);
    let plen = msg.len() as u16;
    let sum = icmpv6_checksum(&msg, ipv6_pseudo_header_sum(&src, &dst, plen, IPPROTO_ICMPV6));
    msg[2..4].copy_from_slice(&sum.to_be_bytes());

    let mut payload = ipv6::build_header(&src, &dst, plen, IPPROTO_ICMPV6, hop_limit).to_vec();
    payload.extend_from_slice(&msg);
    FrameBuilder::new()
        .dst_mac(dst_mac)
        .src_mac(src_mac)
        .ethertype(EtherType::Ipv6)
        .payload(&payload)
        .build()
}
