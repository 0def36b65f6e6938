//! IPv4 header access - RFC 791
//!
//! The translators only ever look at the addresses and patch the
//! destination plus the header checksum, so this is a thin view.

use super::checksum::apply_checksum_delta;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

const CHECKSUM_OFFSET: usize = 10;
const SRC_OFFSET: usize = 12;
const DST_OFFSET: usize = 16;

/// Parsed IPv4 header (zero-copy reference)
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
}

impl<'a> Ipv4Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 header too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn version(&self) -> u8 {
        self.buffer[0] >> 4
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([
            self.buffer[CHECKSUM_OFFSET],
            self.buffer[CHECKSUM_OFFSET + 1],
        ])
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        read_addr(self.buffer, SRC_OFFSET)
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        read_addr(self.buffer, DST_OFFSET)
    }
}

fn read_addr(b: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(b[at], b[at + 1], b[at + 2], b[at + 3])
}

/// Replaces the destination address of the header at the start of `packet`
/// and patches the header checksum with a precomputed delta.
pub fn rewrite_destination(packet: &mut [u8], dst: Ipv4Addr, delta: u16) -> Result<()> {
    if packet.len() < MIN_HEADER_SIZE {
        return Err(Error::Parse("IPv4 header too short".into()));
    }
    packet[DST_OFFSET..DST_OFFSET + 4].copy_from_slice(&dst.octets());
    let old = u16::from_be_bytes([packet[CHECKSUM_OFFSET], packet[CHECKSUM_OFFSET + 1]]);
    let new = apply_checksum_delta(old, delta);
    packet[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&new.to_be_bytes());
    Ok(())
}
