//! Backend translators known to the front translator.

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::debug;

use crate::capture::InterfaceRecord;
use crate::neighbor::{resolve_with_retry, NeighborResolver, Resolution};
use crate::protocol::{Family, MacAddr};

/// Resolution state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// MAC not known yet
    Init,
    Ok,
    /// Zero address: traffic to it is discarded
    Drop,
}

/// Handle to a [`ServerEntry`], stable until the table is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerId {
    pub family: Family,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub status: ServerStatus,
    pub addr: IpAddr,
    /// Next hop toward `addr`, unspecified until the first lookup
    pub gateway: IpAddr,
    pub mac: MacAddr,
    /// Packets forwarded to this server
    pub hit: u32,
    /// Resolution rounds run for this server
    pub resolve_rounds: u32,
}

impl ServerEntry {
    fn new(addr: IpAddr) -> Self {
        let (status, gateway) = match addr {
            IpAddr::V4(a) => (
                if a.is_unspecified() { ServerStatus::Drop } else { ServerStatus::Init },
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ),
            IpAddr::V6(a) => (
                if a.is_unspecified() { ServerStatus::Drop } else { ServerStatus::Init },
                IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            ),
        };
        Self {
            status,
            addr,
            gateway,
            mac: MacAddr::ZERO,
            hit: 0,
            resolve_rounds: 0,
        }
    }

    pub fn family(&self) -> Family {
        if self.addr.is_ipv4() {
            Family::V4
        } else {
            Family::V6
        }
    }
}

/// Per-family server lists in creation order.
#[derive(Debug, Default)]
pub struct ServerTable {
    v4: Vec<ServerEntry>,
    v6: Vec<ServerEntry>,
}

impl ServerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, family: Family) -> &Vec<ServerEntry> {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    fn list_mut(&mut self, family: Family) -> &mut Vec<ServerEntry> {
        match family {
            Family::V4 => &mut self.v4,
            Family::V6 => &mut self.v6,
        }
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.v4.clear();
        self.v6.clear();
    }

    pub fn get(&self, id: ServerId) -> &ServerEntry {
        &self.list(id.family)[id.index]
    }

    pub fn get_mut(&mut self, id: ServerId) -> &mut ServerEntry {
        &mut self.list_mut(id.family)[id.index]
    }

    /// Finds the server with exactly `addr`, creating it when absent.
    pub fn get_or_create(&mut self, addr: IpAddr) -> ServerId {
        let family = if addr.is_ipv4() { Family::V4 } else { Family::V6 };
        let list = self.list_mut(family);
        let index = match list.iter().position(|s| s.addr == addr) {
            Some(i) => i,
            None => {
                list.push(ServerEntry::new(addr));
                list.len() - 1
            }
        };
        ServerId { family, index }
    }

    /// Like [`get_or_create`](Self::get_or_create), resolving the MAC right
    /// away when it is still unknown.
    pub fn get_and_resolve<R>(
        &mut self,
        addr: IpAddr,
        resolver: &mut R,
        iface: &InterfaceRecord,
    ) -> ServerId
    where
        R: NeighborResolver + ?Sized,
    {
        let id = self.get_or_create(addr);
        if self.get(id).status == ServerStatus::Init {
            self.resolve(id, resolver, iface);
        }
        id
    }

    /// Runs one resolution round for `id`. Only promotes `Init` to `Ok`;
    /// a failed round leaves the server `Init`.
    pub fn resolve<R>(&mut self, id: ServerId, resolver: &mut R, iface: &InterfaceRecord)
    where
        R: NeighborResolver + ?Sized,
    {
        let entry = self.get_mut(id);
        entry.resolve_rounds += 1;
        let outcome = resolve_with_retry(resolver, entry.addr, iface, false);
        if let Some(gw) = outcome.gateway() {
            entry.gateway = gw;
        }
        match outcome {
            Resolution::Resolved { mac, .. } => {
                entry.mac = mac;
                if entry.status == ServerStatus::Init {
                    entry.status = ServerStatus::Ok;
                }
                debug!(server = %entry.addr, %mac, "server resolved");
            }
            _ => debug!(server = %entry.addr, "server not resolved"),
        }
    }

    /// `IPv6` then `IPv4`, newest server first, `Drop` servers omitted.
    pub fn render(&self, out: &mut String) {
        for (title, list) in [("IPv6\n", &self.v6), ("IPv4\n", &self.v4)] {
            out.push_str(title);
            let shown = list.iter().rev().filter(|s| s.status != ServerStatus::Drop);
            for (n, s) in shown.enumerate() {
                if s.gateway != s.addr {
                    let _ = writeln!(
                        out,
                        "{:4}) {} via {} ({} packets)",
                        n + 1,
                        s.addr,
                        s.gateway,
                        s.hit
                    );
                } else {
                    let _ = writeln!(out, "{:4}) {} ({} packets)", n + 1, s.addr, s.hit);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::StaticResolver;

    const MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x10]);

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn iface() -> InterfaceRecord {
        InterfaceRecord::new("eth0", MacAddr([0x02, 0, 0, 0, 0, 1]))
    }

    #[test]
    fn test_get_or_create_dedups() {
        let mut t = ServerTable::new();
        let a = t.get_or_create(ip("192.168.1.10"));
        let b = t.get_or_create(ip("192.168.1.11"));
        let c = t.get_or_create(ip("192.168.1.10"));
        let d = t.get_or_create(ip("2001:db8::10"));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(d.family, Family::V6);
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(a).status, ServerStatus::Init);
    }

    #[test]
    fn test_zero_address_is_drop() {
        let mut t = ServerTable::new();
        let id = t.get_or_create(ip("0.0.0.0"));
        assert_eq!(t.get(id).status, ServerStatus::Drop);
        let id6 = t.get_or_create(ip("::"));
        assert_eq!(t.get(id6).status, ServerStatus::Drop);
    }

    #[test]
    fn test_resolve_marks_ok() {
        let mut t = ServerTable::new();
        let mut r = StaticResolver::new().with_neighbor(ip("192.168.1.10"), MAC);
        let id = t.get_and_resolve(ip("192.168.1.10"), &mut r, &iface());
        let s = t.get(id);
        assert_eq!(s.status, ServerStatus::Ok);
        assert_eq!(s.mac, MAC);
        assert_eq!(s.gateway, s.addr);

        // already Ok: no further lookups
        let before = r.lookups;
        t.get_and_resolve(ip("192.168.1.10"), &mut r, &iface());
        assert_eq!(r.lookups, before);
    }

    #[test]
    fn test_failed_resolve_stays_init() {
        let mut t = ServerTable::new();
        let mut r = StaticResolver::new().with_route(ip("10.9.9.9"), ip("10.0.0.1"));
        let id = t.get_and_resolve(ip("10.9.9.9"), &mut r, &iface());
        let s = t.get(id);
        assert_eq!(s.status, ServerStatus::Init);
        assert_eq!(s.gateway, ip("10.0.0.1"));
        assert_eq!(s.resolve_rounds, 1);
    }

    #[test]
    fn test_render() {
        let mut t = ServerTable::new();
        let mut r = StaticResolver::new()
            .with_neighbor(ip("192.168.1.10"), MAC)
            .with_route(ip("10.9.9.9"), ip("10.0.0.1"));
        let a = t.get_and_resolve(ip("192.168.1.10"), &mut r, &iface());
        t.get_and_resolve(ip("10.9.9.9"), &mut r, &iface());
        t.get_or_create(ip("0.0.0.0"));
        t.get_mut(a).hit = 7;

        let mut out = String::new();
        t.render(&mut out);
        assert_eq!(
            out,
            "IPv6\nIPv4\n   1) 10.9.9.9 via 10.0.0.1 (0 packets)\n   2) 192.168.1.10 (7 packets)\n"
        );
    }
}
