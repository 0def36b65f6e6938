//! Address hashing and subnet helpers for the flow tables

use std::net::{Ipv4Addr, Ipv6Addr};

/// Bucket index for an IPv4 address: byte-wise sum and shift over the
/// octets in wire order, masked to the table size.
#[inline]
pub fn hash4(addr: &Ipv4Addr, mask: u32) -> usize {
    let o = addr.octets();
    let hi = o[1] as u32 + o[2] as u32;
    let lo = o[0] as u32 + o[3] as u32;
    (((hi << 8) + lo) & mask) as usize
}

/// Bucket index for an IPv6 address: wrapping sum of the four 32-bit words
/// (little-endian interpretation), then a shift-fold.
#[inline]
pub fn hash6(addr: &Ipv6Addr, mask: u32) -> usize {
    let o = addr.octets();
    let h = o
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0u32, u32::wrapping_add);
    (h.wrapping_add(h >> 16).wrapping_add(h >> 24) & mask) as usize
}

/// `(addr & mask) == net` for IPv4
#[inline]
pub fn in_subnet4(addr: &Ipv4Addr, net: &Ipv4Addr, mask: &Ipv4Addr) -> bool {
    u32::from(*addr) & u32::from(*mask) == u32::from(*net)
}

/// `(addr & mask) == net` for IPv6
#[inline]
pub fn in_subnet6(addr: &Ipv6Addr, net: &Ipv6Addr, mask: &Ipv6Addr) -> bool {
    u128::from(*addr) & u128::from(*mask) == u128::from(*net)
}
