//! ICMPv6 - RFC 4443, Neighbor Discovery - RFC 4861
//!
//! Only the pieces the translators touch: recognizing and validating
//! Neighbor Solicitations, building Neighbor Advertisements, and the
//! echo request used to prime neighbor caches.

use super::checksum::icmpv6_sum;
use super::ipv6::Ipv6Header;
use super::MacAddr;
use crate::{Error, Result};
use std::net::Ipv6Addr;

/// Neighbor Solicitation/Advertisement message size (without options)
pub const NDP_MSG_SIZE: usize = 24;

/// Size of the echo request sent by the neighbor prober
pub const ECHO_PROBE_SIZE: usize = 64;

/// ICMPv6 message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Icmpv6Type {
    EchoRequest = 128,
    EchoReply = 129,
    NeighborSolicitation = 135,
    NeighborAdvertisement = 136,
}

impl Icmpv6Type {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            128 => Some(Icmpv6Type::EchoRequest),
            129 => Some(Icmpv6Type::EchoReply),
            135 => Some(Icmpv6Type::NeighborSolicitation),
            136 => Some(Icmpv6Type::NeighborAdvertisement),
            _ => None,
        }
    }
}

/// NDP option types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NdpOptionType {
    SourceLinkLayerAddress = 1,
    TargetLinkLayerAddress = 2,
}

/// NA flag bits (first byte after the checksum)
pub mod na_flags {
    pub const ROUTER: u8 = 0x80;
    pub const SOLICITED: u8 = 0x40;
    pub const OVERRIDE: u8 = 0x20;
}

/// A Neighbor Solicitation found inside an IPv6 packet.
///
/// `message` is bounded by the IPv6 payload length when the frame holds
/// that much, otherwise by what was received.
#[derive(Debug)]
pub struct NeighborSolicitation<'a> {
    message: &'a [u8],
    declared_len: usize,
}

impl<'a> NeighborSolicitation<'a> {
    /// Returns the solicitation carried by `ip6`, if it carries one.
    ///
    /// Only the shape is checked here; see [`validate_solicitation`].
    pub fn detect(ip6: &Ipv6Header<'a>) -> Option<Self> {
        if ip6.next_header() != super::checksum::IPPROTO_ICMPV6 {
            return None;
        }
        let declared_len = ip6.payload_length() as usize;
        let payload = ip6.payload();
        if declared_len < NDP_MSG_SIZE || payload.len() < NDP_MSG_SIZE {
            return None;
        }
        if payload[0] != Icmpv6Type::NeighborSolicitation as u8 {
            return None;
        }
        let message = &payload[..declared_len.min(payload.len())];
        Some(Self {
            message,
            declared_len,
        })
    }

    pub fn code(&self) -> u8 {
        self.message[1]
    }

    pub fn target_addr(&self) -> Ipv6Addr {
        let mut o = [0u8; 16];
        o.copy_from_slice(&self.message[8..24]);
        Ipv6Addr::from(o)
    }

    /// Option bytes following the fixed part
    pub fn options(&self) -> &'a [u8] {
        &self.message[NDP_MSG_SIZE..]
    }

    /// Full ICMPv6 message, header included
    pub fn as_bytes(&self) -> &'a [u8] {
        self.message
    }

    /// `false` when the IPv6 header claims more than the frame carried
    pub fn is_complete(&self) -> bool {
        self.declared_len == self.message.len()
    }
}

/// Walks an option region made of 8-byte units.
///
/// A zero-length option or one running past the region rejects it.
pub fn validate_options(mut options: &[u8]) -> Result<()> {
    while !options.is_empty() {
        if options.len() < 8 {
            return Err(Error::InvalidPacket("truncated ND option".into()));
        }
        let len = options[1] as usize * 8;
        if len == 0 {
            return Err(Error::InvalidPacket("zero-length ND option".into()));
        }
        if len > options.len() {
            return Err(Error::InvalidPacket("ND option overruns message".into()));
        }
        options = &options[len..];
    }
    Ok(())
}

/// Checks a solicitation before it is answered.
///
/// With `expected` set the target must equal it; with `None` any unicast
/// target is acceptable (proxy answering).
pub fn validate_solicitation(
    ip6: &Ipv6Header<'_>,
    ns: &NeighborSolicitation<'_>,
    expected: Option<&Ipv6Addr>,
) -> Result<()> {
    if ip6.src_addr().is_unspecified() {
        return Err(Error::InvalidPacket("duplicate address detection probe".into()));
    }
    if ip6.hop_limit() != 255 {
        return Err(Error::InvalidPacket("hop limit is not 255".into()));
    }
    if ns.code() != 0 {
        return Err(Error::InvalidPacket("nonzero ICMPv6 code".into()));
    }
    if !ns.is_complete() {
        return Err(Error::InvalidPacket("truncated solicitation".into()));
    }
    if icmpv6_sum(ns.as_bytes(), ip6.pseudo_header_sum()) != 0xffff {
        return Err(Error::InvalidPacket("ICMPv6 checksum mismatch".into()));
    }
    let target = ns.target_addr();
    if target.is_multicast() {
        return Err(Error::InvalidPacket("multicast target".into()));
    }
    if let Some(expected) = expected {
        if target != *expected {
            return Err(Error::InvalidPacket("target is not ours".into()));
        }
    }
    validate_options(ns.options())
}

/// Neighbor Advertisement message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborAdvertisement {
    pub router_flag: bool,
    pub solicited_flag: bool,
    pub override_flag: bool,
    pub target_addr: Ipv6Addr,
    pub target_link_addr: Option<MacAddr>,
}

impl NeighborAdvertisement {
    /// Reply to a solicitation for `target`.
    ///
    /// Multicast solicitations get the override flag and a target
    /// link-layer address option.
    pub fn answer(target: Ipv6Addr, mac: MacAddr, multicast: bool) -> Self {
        Self {
            router_flag: false,
            solicited_flag: true,
            override_flag: multicast,
            target_addr: target,
            target_link_addr: multicast.then_some(mac),
        }
    }

    /// Parse a full ICMPv6 NA message (type/code/checksum included)
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < NDP_MSG_SIZE {
            return Err(Error::Parse("Neighbor Advertisement too short".into()));
        }
        if buffer[0] != Icmpv6Type::NeighborAdvertisement as u8 {
            return Err(Error::Parse("not a Neighbor Advertisement".into()));
        }
        let flags = buffer[4];
        let mut target = [0u8; 16];
        target.copy_from_slice(&buffer[8..24]);

        let opts = &buffer[NDP_MSG_SIZE..];
        let target_link_addr = if opts.len() >= 8
            && opts[0] == NdpOptionType::TargetLinkLayerAddress as u8
            && opts[1] == 1
        {
            MacAddr::from_slice(&opts[2..8])
        } else {
            None
        };

        Ok(Self {
            router_flag: flags & na_flags::ROUTER != 0,
            solicited_flag: flags & na_flags::SOLICITED != 0,
            override_flag: flags & na_flags::OVERRIDE != 0,
            target_addr: Ipv6Addr::from(target),
            target_link_addr,
        })
    }

    /// Build NA message bytes with a zero checksum field
    pub fn to_bytes(&self) -> Vec<u8> {
        let option_len = if self.target_link_addr.is_some() { 8 } else { 0 };
        let mut buf = vec![0u8; NDP_MSG_SIZE + option_len];

        buf[0] = Icmpv6Type::NeighborAdvertisement as u8;
        let mut flags = 0u8;
        if self.router_flag {
            flags |= na_flags::ROUTER;
        }
        if self.solicited_flag {
            flags |= na_flags::SOLICITED;
        }
        if self.override_flag {
            flags |= na_flags::OVERRIDE;
        }
        buf[4] = flags;
        buf[8..24].copy_from_slice(&self.target_addr.octets());

        if let Some(mac) = &self.target_link_addr {
            buf[24] = NdpOptionType::TargetLinkLayerAddress as u8;
            buf[25] = 1;
            buf[26..32].copy_from_slice(&mac.0);
        }
        buf
    }
}

/// Echo request body for a raw ICMPv6 socket; the kernel fills the checksum.
pub fn echo_request(identifier: u16, sequence: u16) -> [u8; ECHO_PROBE_SIZE] {
    let mut buf = [0u8; ECHO_PROBE_SIZE];
    buf[0] = Icmpv6Type::EchoRequest as u8;
    buf[4..6].copy_from_slice(&identifier.to_be_bytes());
    buf[6..8].copy_from_slice(&sequence.to_be_bytes());
    buf
}
