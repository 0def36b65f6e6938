//! Internet checksum arithmetic (RFC 1071 / RFC 1624)
//!
//! All sums are taken over big-endian 16-bit words. Results are
//! byte-for-byte what an unmodified stack writes on the wire.

use std::net::{Ipv4Addr, Ipv6Addr};

/// IANA protocol number for ICMPv6
pub const IPPROTO_ICMPV6: u8 = 58;

/// Ones'-complement sum of `bytes` as 16-bit words, not folded.
///
/// An odd trailing byte is padded with a zero low byte.
pub fn internet_checksum(bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    let mut sum: u32 = 0;
    for w in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([w[0], w[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }
    sum
}

/// Folds a 32-bit accumulator down to 16 bits with end-around carry.
pub fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Complemented checksum of an IPv4 header (checksum field included as-is).
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    !fold(internet_checksum(header))
}

/// Accumulates the IPv6 pseudo-header. Folding is left to the caller.
pub fn ipv6_pseudo_header_sum(
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
    payload_len: u16,
    next_header: u8,
) -> u64 {
    let words = src.segments().into_iter().chain(dst.segments());
    words.map(u64::from).sum::<u64>() + payload_len as u64 + next_header as u64
}

/// Folds `bytes` plus a pseudo-header base into a 16-bit sum, uncomplemented.
///
/// A message carrying a correct checksum yields `0xffff`.
pub fn icmpv6_sum(bytes: &[u8], pseudo_base: u64) -> u16 {
    let q = internet_checksum(bytes) as u64 + pseudo_base;
    let l = (q & 0xffff) + ((q >> 16) & 0xffff) + ((q >> 32) & 0xffff) + (q >> 48);
    let mut sum = (l & 0xffff) + (l >> 16);
    if sum > 0xffff {
        sum -= 0xffff;
    }
    sum as u16
}

/// Complemented ICMPv6 checksum, ready to be stored.
pub fn icmpv6_checksum(bytes: &[u8], pseudo_base: u64) -> u16 {
    !icmpv6_sum(bytes, pseudo_base)
}

/// Precomputes the adjustment for replacing `old` by `new` in an IPv4 header.
///
/// Apply it with [`apply_checksum_delta`].
pub fn checksum_delta(old: Ipv4Addr, new: Ipv4Addr) -> u16 {
    let o = !u32::from(old);
    let n = u32::from(new);
    let s = (o >> 16) + (o & 0xffff) + (n >> 16) + (n & 0xffff);
    let mut sum = (s >> 16) + (s & 0xffff);
    if sum > 0xffff {
        sum -= 0xffff;
    }
    !(sum as u16)
}

/// Adds a precomputed delta to a stored checksum, one carry fold.
pub fn apply_checksum_delta(checksum: u16, delta: u16) -> u16 {
    let sum = checksum as u32 + delta as u32;
    ((sum >> 16) + (sum & 0xffff)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    // 20-byte header from RFC 1071 style worked examples
    fn sample_header(dst: Ipv4Addr) -> [u8; 20] {
        let mut h = [
            0x45, 0x00, 0x00, 0x54, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x01, 0x00, 0x00, 0x0a, 0x01,
            0x02, 0x03, 0, 0, 0, 0,
        ];
        h[16..20].copy_from_slice(&dst.octets());
        let c = ipv4_header_checksum(&h);
        h[10..12].copy_from_slice(&c.to_be_bytes());
        h
    }

    fn equivalent(a: u16, b: u16) -> bool {
        // 0x0000 and 0xffff both encode ones'-complement zero
        a == b || (a == 0 && b == 0xffff) || (a == 0xffff && b == 0)
    }

    #[test]
    fn test_internet_checksum_odd_length() {
        assert_eq!(internet_checksum(&[0x01, 0x02, 0x03]), 0x0102 + 0x0300);
        assert_eq!(internet_checksum(&[]), 0);
    }

    #[test]
    fn test_header_checksum_verifies() {
        let h = sample_header(Ipv4Addr::new(203, 0, 113, 10));
        assert_eq!(fold(internet_checksum(&h)), 0xffff);
    }

    #[test]
    fn test_delta_matches_full_recompute() {
        let vip = Ipv4Addr::new(203, 0, 113, 10);
        let targets = [
            Ipv4Addr::new(192, 168, 1, 10),
            Ipv4Addr::new(0, 0, 0, 1),
            Ipv4Addr::new(255, 255, 255, 255),
            Ipv4Addr::new(10, 0, 0, 0),
            vip,
        ];
        for new in targets {
            let mut h = sample_header(vip);
            let old_sum = u16::from_be_bytes([h[10], h[11]]);
            let adjusted = apply_checksum_delta(old_sum, checksum_delta(vip, new));

            h[16..20].copy_from_slice(&new.octets());
            h[10] = 0;
            h[11] = 0;
            let full = ipv4_header_checksum(&h);
            assert!(equivalent(adjusted, full), "{new}: {adjusted:#x} vs {full:#x}");
        }
    }

    #[test]
    fn test_delta_sweep_over_address_space() {
        let vip = Ipv4Addr::new(198, 51, 100, 7);
        let mut x: u32 = 0x1234_5678;
        for _ in 0..2000 {
            x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let new = Ipv4Addr::from(x);
            let mut h = sample_header(vip);
            let old_sum = u16::from_be_bytes([h[10], h[11]]);
            let adjusted = apply_checksum_delta(old_sum, checksum_delta(vip, new));
            h[16..20].copy_from_slice(&new.octets());
            h[10] = 0;
            h[11] = 0;
            assert!(equivalent(adjusted, ipv4_header_checksum(&h)));
        }
    }

    #[test]
    fn test_icmpv6_checksum_validates() {
        let src: Ipv6Addr = "fe80::1".parse().unwrap();
        let dst: Ipv6Addr = "ff02::1:ff00:2".parse().unwrap();
        let mut msg = vec![135u8, 0, 0, 0, 0, 0, 0, 0];
        msg.extend_from_slice(&"2001:db8::2".parse::<Ipv6Addr>().unwrap().octets());
        let base = ipv6_pseudo_header_sum(&src, &dst, msg.len() as u16, IPPROTO_ICMPV6);
        let c = icmpv6_checksum(&msg, base);
        msg[2..4].copy_from_slice(&c.to_be_bytes());
        assert_eq!(icmpv6_sum(&msg, base), 0xffff);

        msg[10] ^= 0x01;
        assert_ne!(icmpv6_sum(&msg, base), 0xffff);
    }
}
