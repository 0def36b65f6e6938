//! ARP (Address Resolution Protocol) - RFC 826, Ethernet/IPv4 only

use super::MacAddr;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// ARP packet size (for Ethernet/IPv4)
pub const ARP_PACKET_SIZE: usize = 28;

/// Fixed header of a request the translators answer:
/// Ethernet, IPv4, hlen 6, plen 4, op REQUEST.
const REQUEST_TEMPLATE: [u8; 8] = [0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01];

/// ARP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

impl ArpOp {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(ArpOp::Request),
            2 => Some(ArpOp::Reply),
            _ => None,
        }
    }
}

/// ARP packet (Ethernet/IPv4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Parse an ARP packet from buffer
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ARP_PACKET_SIZE {
            return Err(Error::Parse("ARP packet too short".into()));
        }
        if buffer[0..6] != REQUEST_TEMPLATE[0..6] {
            return Err(Error::Parse("not an Ethernet/IPv4 ARP header".into()));
        }

        let operation = ArpOp::from_u16(u16::from_be_bytes([buffer[6], buffer[7]]))
            .ok_or_else(|| Error::Parse("invalid ARP operation".into()))?;

        Ok(Self {
            operation,
            sender_mac: read_mac(&buffer[8..14]),
            sender_ip: read_ip(&buffer[14..18]),
            target_mac: read_mac(&buffer[18..24]),
            target_ip: read_ip(&buffer[24..28]),
        })
    }

    /// Parse a packet only if its fixed header matches the request template.
    pub fn parse_request(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ARP_PACKET_SIZE || buffer[..8] != REQUEST_TEMPLATE {
            return Err(Error::InvalidPacket("ARP header template mismatch".into()));
        }
        Self::parse(buffer)
    }

    /// Serialize ARP packet to bytes
    pub fn to_bytes(&self) -> [u8; ARP_PACKET_SIZE] {
        let mut buf = [0u8; ARP_PACKET_SIZE];
        buf[..6].copy_from_slice(&REQUEST_TEMPLATE[..6]);
        buf[6..8].copy_from_slice(&(self.operation as u16).to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac.0);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.0);
        buf[24..28].copy_from_slice(&self.target_ip.octets());
        buf
    }

    /// Answer to this request on behalf of `mac`.
    ///
    /// The requester becomes the target, the requested address becomes the
    /// sender address.
    pub fn answer(&self, mac: MacAddr) -> Self {
        Self {
            operation: ArpOp::Reply,
            sender_mac: mac,
            sender_ip: self.target_ip,
            target_mac: self.sender_mac,
            target_ip: self.sender_ip,
        }
    }

    /// Gratuitous ARP announcing `ip` at `mac` (broadcast request, spa == tpa).
    pub fn gratuitous(mac: MacAddr, ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOp::Request,
            sender_mac: mac,
            sender_ip: ip,
            target_mac: MacAddr::BROADCAST,
            target_ip: ip,
        }
    }

    pub fn is_gratuitous(&self) -> bool {
        self.sender_ip == self.target_ip
    }
}

fn read_mac(b: &[u8]) -> MacAddr {
    MacAddr([b[0], b[1], b[2], b[3], b[4], b[5]])
}

fn read_ip(b: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(b[0], b[1], b[2], b[3])
}
