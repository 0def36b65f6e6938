//! Route and neighbor queries over NETLINK_ROUTE.
//!
//! Two requests are used: `RTM_GETROUTE` for the next hop toward a target
//! (or the default gateway) and an `RTM_GETNEIGH` dump, filtered here by
//! interface and address, for the next hop's MAC.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::time::Duration;

use netlink_packet_core::{
    NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_DUMP, NLM_F_REQUEST,
};
use netlink_packet_route::neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourMessage};
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::{Socket, SocketAddr};
use socket2::{Domain, Protocol, Type};

use super::NextHop;
use crate::protocol::MacAddr;
use crate::{Error, Result};

const NUD_NOARP: u16 = 0x40;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

const RECV_BUF_LEN: usize = 16384;

type RouteNlMessage = NetlinkMessage<RouteNetlinkMessage>;

fn family_of(addr: &IpAddr) -> AddressFamily {
    match addr {
        IpAddr::V4(_) => AddressFamily::Inet,
        IpAddr::V6(_) => AddressFamily::Inet6,
    }
}

fn request(msg: RouteNetlinkMessage, flags: u16, seq: u32) -> RouteNlMessage {
    let mut header = NetlinkHeader::default();
    header.flags = flags;
    header.sequence_number = seq;
    let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(msg));
    packet.finalize();
    packet
}

fn serialize(packet: &RouteNlMessage) -> Vec<u8> {
    let mut buf = vec![0u8; packet.buffer_len()];
    packet.serialize(&mut buf);
    buf
}

/// `RTM_GETROUTE` for `target`; the default route when `default_gw`.
pub fn route_request(target: &IpAddr, default_gw: bool, seq: u32) -> RouteNlMessage {
    let dst = if default_gw {
        match target {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    } else {
        *target
    };
    let mut msg = RouteMessage::default();
    msg.header.address_family = family_of(&dst);
    let addr = match dst {
        IpAddr::V4(a) => {
            msg.header.destination_prefix_length = 32;
            RouteAddress::Inet(a)
        }
        IpAddr::V6(a) => {
            msg.header.destination_prefix_length = 128;
            RouteAddress::Inet6(a)
        }
    };
    msg.attributes.push(RouteAttribute::Destination(addr));
    request(RouteNetlinkMessage::GetRoute(msg), NLM_F_REQUEST, seq)
}

/// `RTM_GETNEIGH` dump for one family.
pub fn neigh_dump_request(family: AddressFamily, seq: u32) -> RouteNlMessage {
    let mut msg = NeighbourMessage::default();
    msg.header.family = family;
    request(
        RouteNetlinkMessage::GetNeighbour(msg),
        NLM_F_REQUEST | NLM_F_DUMP,
        seq,
    )
}

/// Splits a datagram into netlink messages; stops at the first one that
/// does not decode.
fn messages(buf: &[u8]) -> Vec<RouteNlMessage> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let Ok(msg) = RouteNlMessage::deserialize(&buf[offset..]) else {
            break;
        };
        let len = msg.header.length as usize;
        out.push(msg);
        if len == 0 {
            break;
        }
        offset += (len + 3) & !3;
    }
    out
}

fn error_reply(code: Option<i32>) -> Error {
    match code {
        Some(code) => Error::Netlink(format!(
            "RTNETLINK answers: {}",
            io::Error::from_raw_os_error(-code)
        )),
        None => Error::Netlink("empty reply".into()),
    }
}

fn route_address(addr: &RouteAddress) -> Option<IpAddr> {
    match addr {
        RouteAddress::Inet(a) => Some(IpAddr::V4(*a)),
        RouteAddress::Inet6(a) => Some(IpAddr::V6(*a)),
        _ => None,
    }
}

/// Gateway of a route, `None` for an on-link one.
pub fn gateway_of(route: &RouteMessage) -> Option<IpAddr> {
    route
        .attributes
        .iter()
        .find_map(|attr| match attr {
            RouteAttribute::Gateway(gw) => route_address(gw),
            _ => None,
        })
        .filter(|gw| !gw.is_unspecified())
}

/// Parses the route reply: `Some(gateway)`, or `None` for an on-link target.
pub fn parse_route_reply(buf: &[u8], seq: u32) -> Result<Option<IpAddr>> {
    for msg in messages(buf) {
        if msg.header.sequence_number != seq {
            continue;
        }
        match msg.payload {
            NetlinkPayload::Error(err) => return Err(error_reply(err.code.map(|c| c.get()))),
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(route)) => {
                return Ok(gateway_of(&route));
            }
            _ => {}
        }
    }
    Err(Error::Netlink("no route reply".into()))
}

/// Neighbor entry filter.
#[derive(Debug, Clone, Copy)]
pub struct NeighFilter {
    pub family: AddressFamily,
    /// Zero matches every interface
    pub ifindex: u32,
    pub addr: IpAddr,
}

fn neighbour_address(addr: &NeighbourAddress) -> Option<IpAddr> {
    match addr {
        NeighbourAddress::Inet(a) => Some(IpAddr::V4(*a)),
        NeighbourAddress::Inet6(a) => Some(IpAddr::V6(*a)),
        _ => None,
    }
}

/// Link-layer address of `neigh` if it is the usable entry `filter` asks for.
pub fn neighbour_mac(neigh: &NeighbourMessage, filter: &NeighFilter) -> Option<MacAddr> {
    let header = &neigh.header;
    if header.family != filter.family {
        return None;
    }
    if filter.ifindex != 0 && header.ifindex != filter.ifindex {
        return None;
    }
    if u16::from(header.state) & (0xff & !NUD_NOARP) == 0 {
        return None;
    }
    let mut dst_matches = false;
    let mut lladdr = None;
    for attr in &neigh.attributes {
        match attr {
            NeighbourAttribute::Destination(dst) => {
                dst_matches = neighbour_address(dst) == Some(filter.addr)
            }
            NeighbourAttribute::LinkLocalAddress(raw) => lladdr = MacAddr::from_slice(raw),
            _ => {}
        }
    }
    lladdr.filter(|_| dst_matches)
}

/// Scans one dump datagram. Returns whether the dump is complete; a
/// matching entry with a link-layer address updates `mac`.
pub fn scan_neigh_dump(
    buf: &[u8],
    seq: u32,
    filter: &NeighFilter,
    mac: &mut MacAddr,
) -> Result<bool> {
    for msg in messages(buf) {
        if msg.header.sequence_number != seq {
            continue;
        }
        match msg.payload {
            NetlinkPayload::Done(_) => return Ok(true),
            NetlinkPayload::Error(err) => return Err(error_reply(err.code.map(|c| c.get()))),
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewNeighbour(neigh)) => {
                if let Some(found) = neighbour_mac(&neigh, filter) {
                    *mac = found;
                }
            }
            _ => {}
        }
    }
    Ok(false)
}

struct NlSocket {
    socket: Socket,
    seq: u32,
}

impl NlSocket {
    fn open() -> Result<Self> {
        let raw = socket2::Socket::new(
            Domain::from(libc::AF_NETLINK),
            Type::RAW,
            Some(Protocol::from(libc::NETLINK_ROUTE)),
        )
        .map_err(|e| Error::Netlink(format!("Cannot open netlink socket ({e})")))?;
        raw.set_read_timeout(Some(RECV_TIMEOUT))
            .map_err(|e| Error::Netlink(format!("Cannot set netlink timeout ({e})")))?;
        // SAFETY: the descriptor comes straight from into_raw_fd, so the
        // netlink socket is its only owner.
        let mut socket = unsafe { Socket::from_raw_fd(raw.into_raw_fd()) };
        socket
            .bind_auto()
            .map_err(|e| Error::Netlink(format!("Cannot bind netlink socket ({e})")))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::Netlink(format!("Cannot connect netlink socket ({e})")))?;

        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(1);
        Ok(Self { socket, seq: seed })
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn send(&self, packet: &RouteNlMessage) -> Result<()> {
        self.socket
            .send(&serialize(packet), 0)
            .map_err(|e| Error::Netlink(format!("Cannot talk to rtnetlink ({e})")))?;
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.socket.recv(&mut &mut buf[..], 0) {
                Ok(0) => return Err(Error::Netlink("EOF on netlink".into())),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(Error::Netlink("netlink reply timed out".into()))
                }
                Err(e) => return Err(Error::Netlink(e.to_string())),
            }
        }
    }
}

fn if_index(ifname: &str) -> Result<u32> {
    let not_found = || Error::InterfaceNotFound {
        name: ifname.to_string(),
    };
    std::fs::read_to_string(format!("/sys/class/net/{ifname}/ifindex"))
        .map_err(|_| not_found())?
        .trim()
        .parse()
        .map_err(|_| not_found())
}

/// Kernel routing and neighbor tables.
#[derive(Debug, Default)]
pub struct NetlinkRoutes;

impl NetlinkRoutes {
    pub fn new() -> Self {
        Self
    }

    /// Next hop toward `target` and its MAC as known to `ifname`'s
    /// neighbor table (zero when not known yet).
    pub fn lookup(&self, target: IpAddr, ifname: &str, default_gw: bool) -> Result<NextHop> {
        let mut sock = NlSocket::open()?;
        let mut buf = vec![0u8; RECV_BUF_LEN];

        let seq = sock.next_seq();
        sock.send(&route_request(&target, default_gw, seq))?;
        let n = sock.recv(&mut buf)?;
        let gateway = match parse_route_reply(&buf[..n], seq)? {
            Some(gw) => gw,
            None if default_gw => return Err(Error::Netlink("no default gateway".into())),
            None => target,
        };

        let filter = NeighFilter {
            family: family_of(&gateway),
            ifindex: if_index(ifname)?,
            addr: gateway,
        };
        let seq = sock.next_seq();
        sock.send(&neigh_dump_request(filter.family, seq))?;

        let mut mac = MacAddr::ZERO;
        loop {
            let n = sock.recv(&mut buf)?;
            if scan_neigh_dump(&buf[..n], seq, &filter, &mut mac)? {
                break;
            }
        }
        Ok(NextHop { gateway, mac })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netlink_packet_core::{DoneMessage, ErrorMessage};
    use netlink_packet_route::neighbour::NeighbourState;
    use std::num::NonZeroI32;

    fn reply(payload: NetlinkPayload<RouteNetlinkMessage>, seq: u32) -> Vec<u8> {
        let mut header = NetlinkHeader::default();
        header.sequence_number = seq;
        let mut packet = NetlinkMessage::new(header, payload);
        packet.finalize();
        serialize(&packet)
    }

    fn route(gateway: Option<Ipv4Addr>) -> NetlinkPayload<RouteNetlinkMessage> {
        let mut msg = RouteMessage::default();
        msg.header.address_family = AddressFamily::Inet;
        if let Some(gw) = gateway {
            msg.attributes.push(RouteAttribute::Gateway(RouteAddress::Inet(gw)));
        }
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(msg))
    }

    fn neigh(
        family: AddressFamily,
        ifindex: u32,
        state: NeighbourState,
        dst: IpAddr,
        mac: Option<[u8; 6]>,
    ) -> NeighbourMessage {
        let mut msg = NeighbourMessage::default();
        msg.header.family = family;
        msg.header.ifindex = ifindex;
        msg.header.state = state;
        let dst = match dst {
            IpAddr::V4(a) => NeighbourAddress::Inet(a),
            IpAddr::V6(a) => NeighbourAddress::Inet6(a),
        };
        msg.attributes.push(NeighbourAttribute::Destination(dst));
        if let Some(m) = mac {
            msg.attributes.push(NeighbourAttribute::LinkLocalAddress(m.to_vec()));
        }
        msg
    }

    fn neigh_reply(msg: NeighbourMessage, seq: u32) -> Vec<u8> {
        reply(NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewNeighbour(msg)), seq)
    }

    #[test]
    fn test_route_request_for_target() {
        let target = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
        let req = route_request(&target, false, 7);
        assert_eq!(req.header.sequence_number, 7);
        assert_eq!(req.header.flags, NLM_F_REQUEST);
        let NetlinkPayload::InnerMessage(RouteNetlinkMessage::GetRoute(msg)) = &req.payload else {
            panic!("not a route request");
        };
        assert_eq!(msg.header.address_family, AddressFamily::Inet);
        assert_eq!(msg.header.destination_prefix_length, 32);
        assert!(msg
            .attributes
            .contains(&RouteAttribute::Destination(RouteAddress::Inet(Ipv4Addr::new(192, 168, 1, 10)))));

        let req = route_request(&IpAddr::V6("2001:db8::1".parse().unwrap()), true, 8);
        let NetlinkPayload::InnerMessage(RouteNetlinkMessage::GetRoute(msg)) = &req.payload else {
            panic!("not a route request");
        };
        assert_eq!(msg.header.destination_prefix_length, 128);
        assert!(msg
            .attributes
            .contains(&RouteAttribute::Destination(RouteAddress::Inet6(Ipv6Addr::UNSPECIFIED))));
    }

    #[test]
    fn test_neigh_dump_request_flags() {
        let req = neigh_dump_request(AddressFamily::Inet6, 3);
        assert_eq!(req.header.flags, NLM_F_REQUEST | NLM_F_DUMP);
        assert_eq!(serialize(&req).len(), req.header.length as usize);
    }

    #[test]
    fn test_parse_route_reply() {
        let buf = reply(route(Some(Ipv4Addr::new(10, 0, 0, 1))), 5);
        assert_eq!(
            parse_route_reply(&buf, 5).unwrap(),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
        );

        let buf = reply(route(None), 5);
        assert_eq!(parse_route_reply(&buf, 5).unwrap(), None);
        assert!(parse_route_reply(&buf, 6).is_err());
    }

    #[test]
    fn test_parse_route_error() {
        let mut err = ErrorMessage::default();
        err.code = NonZeroI32::new(-libc::ENETUNREACH);
        let buf = reply(NetlinkPayload::Error(err), 9);
        assert!(matches!(parse_route_reply(&buf, 9), Err(Error::Netlink(_))));
    }

    #[test]
    fn test_scan_neigh_dump() {
        let gw = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let filter = NeighFilter {
            family: AddressFamily::Inet,
            ifindex: 3,
            addr: gw,
        };
        let wanted = [0x02, 0x11, 0x22, 0x33, 0x44, 0x55];
        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));

        let mut buf = neigh_reply(neigh(AddressFamily::Inet, 2, NeighbourState::Reachable, gw, Some([9; 6])), 4);
        buf.extend(neigh_reply(neigh(AddressFamily::Inet, 3, NeighbourState::Noarp, gw, Some([8; 6])), 4));
        buf.extend(neigh_reply(neigh(AddressFamily::Inet, 3, NeighbourState::Reachable, other, Some([7; 6])), 4));
        buf.extend(neigh_reply(neigh(AddressFamily::Inet, 3, NeighbourState::Reachable, gw, Some(wanted)), 4));

        let mut mac = MacAddr::ZERO;
        assert!(!scan_neigh_dump(&buf, 4, &filter, &mut mac).unwrap());
        assert_eq!(mac, MacAddr(wanted));

        let done = reply(NetlinkPayload::Done(DoneMessage::default()), 4);
        assert!(scan_neigh_dump(&done, 4, &filter, &mut mac).unwrap());
    }

    #[test]
    fn test_silent_socket_times_out() {
        let sock = NlSocket::open().unwrap();
        let mut buf = vec![0u8; RECV_BUF_LEN];
        let start = std::time::Instant::now();
        let err = sock.recv(&mut buf).unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(start.elapsed() >= RECV_TIMEOUT / 2);
    }

    #[test]
    fn test_incomplete_entry_keeps_zero_mac() {
        let gw: Ipv6Addr = "fe80::1".parse().unwrap();
        let filter = NeighFilter {
            family: AddressFamily::Inet6,
            ifindex: 0,
            addr: IpAddr::V6(gw),
        };
        let entry = neigh(AddressFamily::Inet6, 5, NeighbourState::Incomplete, IpAddr::V6(gw), None);
        assert_eq!(neighbour_mac(&entry, &filter), None);

        let buf = neigh_reply(entry, 1);
        let mut mac = MacAddr::ZERO;
        scan_neigh_dump(&buf, 1, &filter, &mut mac).unwrap();
        assert!(mac.is_zero());
    }
}
