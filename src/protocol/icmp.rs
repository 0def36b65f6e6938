//! ICMP echo request (RFC 792), used to prime IPv4 neighbor entries

use super::checksum::{fold, internet_checksum};

/// ICMP header size, also the size of the probe (no payload)
pub const ICMP_HEADER_SIZE: usize = 8;

/// ICMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    EchoRequest = 8,
}

/// Builds a header-only echo request with its checksum filled in.
pub fn echo_request(identifier: u16, sequence: u16) -> [u8; ICMP_HEADER_SIZE] {
    let mut buf = [0u8; ICMP_HEADER_SIZE];
    buf[0] = IcmpType::EchoRequest as u8;
    buf[4..6].copy_from_slice(&identifier.to_be_bytes());
    buf[6..8].copy_from_slice(&sequence.to_be_bytes());
    let c = !fold(internet_checksum(&buf));
    buf[2..4].copy_from_slice(&c.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_request_checksum() {
        let req = echo_request(0, 42);
        assert_eq!(req[0], 8);
        assert_eq!(req[1], 0);
        assert_eq!(&req[6..8], &[0, 42]);
        assert_eq!(fold(internet_checksum(&req)), 0xffff);
    }
}
