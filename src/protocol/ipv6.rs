//! IPv6 header access - RFC 8200

use super::checksum::ipv6_pseudo_header_sum;
use crate::{Error, Result};
use std::net::Ipv6Addr;

/// IPv6 header size (fixed, unlike IPv4)
pub const HEADER_SIZE: usize = 40;

const DST_OFFSET: usize = 24;

/// Parsed IPv6 header (zero-copy reference)
#[derive(Debug)]
pub struct Ipv6Header<'a> {
    buffer: &'a [u8],
}

impl<'a> Ipv6Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("IPv6 header too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn version(&self) -> u8 {
        self.buffer[0] >> 4
    }

    /// Payload Length (does not include header)
    pub fn payload_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn next_header(&self) -> u8 {
        self.buffer[6]
    }

    pub fn hop_limit(&self) -> u8 {
        self.buffer[7]
    }

    pub fn src_addr(&self) -> Ipv6Addr {
        read_addr(self.buffer, 8)
    }

    pub fn dst_addr(&self) -> Ipv6Addr {
        read_addr(self.buffer, DST_OFFSET)
    }

    /// Pseudo-header accumulator for the upper-layer checksum
    pub fn pseudo_header_sum(&self) -> u64 {
        ipv6_pseudo_header_sum(
            &self.src_addr(),
            &self.dst_addr(),
            self.payload_length(),
            self.next_header(),
        )
    }

    /// Bytes after the fixed header, as received (may include link padding)
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }
}

fn read_addr(b: &[u8], at: usize) -> Ipv6Addr {
    let mut o = [0u8; 16];
    o.copy_from_slice(&b[at..at + 16]);
    Ipv6Addr::from(o)
}

/// Replaces the destination address of the header at the start of `packet`.
pub fn rewrite_destination(packet: &mut [u8], dst: &Ipv6Addr) -> Result<()> {
    if packet.len() < HEADER_SIZE {
        return Err(Error::Parse("IPv6 header too short".into()));
    }
    packet[DST_OFFSET..DST_OFFSET + 16].copy_from_slice(&dst.octets());
    Ok(())
}

/// Fixed header with zero traffic class and flow label
pub fn build_header(
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
    payload_len: u16,
    next_header: u8,
    hop_limit: u8,
) -> [u8; HEADER_SIZE] {
    let mut h = [0u8; HEADER_SIZE];
    h[0] = 0x60;
    h[4..6].copy_from_slice(&payload_len.to_be_bytes());
    h[6] = next_header;
    h[7] = hop_limit;
    h[8..24].copy_from_slice(&src.octets());
    h[24..40].copy_from_slice(&dst.octets());
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse() {
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::2".parse().unwrap();
        let h = build_header(&src, &dst, 24, 58, 255);
        let hdr = Ipv6Header::parse(&h).unwrap();
        assert_eq!(hdr.version(), 6);
        assert_eq!(hdr.payload_length(), 24);
        assert_eq!(hdr.next_header(), 58);
        assert_eq!(hdr.hop_limit(), 255);
        assert_eq!(hdr.src_addr(), src);
        assert_eq!(hdr.dst_addr(), dst);
        assert!(hdr.payload().is_empty());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(Ipv6Header::parse(&[0x60; 39]).is_err());
    }

    #[test]
    fn test_rewrite_destination() {
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let vip: Ipv6Addr = "2001:db8::100".parse().unwrap();
        let real: Ipv6Addr = "2001:db8:1::10".parse().unwrap();
        let mut pkt = build_header(&src, &vip, 0, 17, 64).to_vec();
        rewrite_destination(&mut pkt, &real).unwrap();
        let hdr = Ipv6Header::parse(&pkt).unwrap();
        assert_eq!(hdr.dst_addr(), real);
        assert_eq!(hdr.src_addr(), src);
    }
}
