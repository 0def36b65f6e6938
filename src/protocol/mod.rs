//! Wire formats the translators read and rewrite
//!
//! Every parser is a bounds-checked view over the received buffer; the
//! rewrite helpers patch fields in place.

pub mod addr;
pub mod arp;
pub mod checksum;
pub mod ethernet;
pub mod icmp;
pub mod icmpv6;
pub mod ipv4;
pub mod ipv6;
pub mod types;

pub use types::*;
