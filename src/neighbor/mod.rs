//! Next-hop MAC resolution
//!
//! The kernel owns ARP/ND; the translators only ask it. A lookup returns the
//! next hop toward a target and whatever MAC the neighbor table holds for it.
//! When the MAC is unknown an echo probe makes the kernel resolve it, and the
//! caller looks again after a short settle delay.

mod netlink;
mod probe;

pub use netlink::NetlinkRoutes;
pub use probe::EchoProber;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::trace;

use crate::capture::InterfaceRecord;
use crate::protocol::{Family, MacAddr};
use crate::Result;

/// Attempts made by [`resolve_with_retry`]
pub const RESOLVE_ATTEMPTS: usize = 3;

/// Pause between a probe and the next lookup
pub const SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Next hop toward a target and its MAC (zero when not known yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    pub gateway: IpAddr,
    pub mac: MacAddr,
}

/// Source of next-hop information.
pub trait NeighborResolver: Send {
    /// Next hop toward `target` as seen from `ifname`. With `default_gw` the
    /// default route is asked for and `target` only selects the family.
    fn lookup(&mut self, target: IpAddr, ifname: &str, default_gw: bool) -> Result<NextHop>;

    /// Makes the kernel resolve `nexthop` on `iface`.
    fn probe(&mut self, nexthop: IpAddr, iface: &InterfaceRecord);

    /// Waits for a probe to take effect.
    fn settle(&mut self);
}

/// Outcome of [`resolve_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved { mac: MacAddr, gateway: IpAddr },
    /// A next hop is known but did not answer the probes
    Unresolved { gateway: IpAddr },
    /// Every lookup failed
    Failed,
}

impl Resolution {
    pub fn mac(&self) -> Option<MacAddr> {
        match self {
            Resolution::Resolved { mac, .. } => Some(*mac),
            _ => None,
        }
    }

    pub fn gateway(&self) -> Option<IpAddr> {
        match self {
            Resolution::Resolved { gateway, .. } | Resolution::Unresolved { gateway } => {
                Some(*gateway)
            }
            Resolution::Failed => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }
}

/// Looks up `target` up to [`RESOLVE_ATTEMPTS`] times, probing the next hop
/// after each lookup that comes back without a MAC.
pub fn resolve_with_retry<R>(
    resolver: &mut R,
    target: IpAddr,
    iface: &InterfaceRecord,
    default_gw: bool,
) -> Resolution
where
    R: NeighborResolver + ?Sized,
{
    let mut outcome = Resolution::Failed;
    for attempt in 0..RESOLVE_ATTEMPTS {
        match resolver.lookup(target, &iface.ifname, default_gw) {
            Err(e) => {
                trace!(%target, attempt, error = %e, "next hop lookup failed");
            }
            Ok(hop) if !hop.mac.is_zero() => {
                return Resolution::Resolved {
                    mac: hop.mac,
                    gateway: hop.gateway,
                };
            }
            Ok(hop) => {
                resolver.probe(hop.gateway, iface);
                resolver.settle();
                outcome = Resolution::Unresolved {
                    gateway: hop.gateway,
                };
            }
        }
    }
    outcome
}

/// Netlink lookups plus per-interface echo probers.
#[derive(Debug, Default)]
pub struct SystemResolver {
    routes: NetlinkRoutes,
    probers: HashMap<String, EchoProber>,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NeighborResolver for SystemResolver {
    fn lookup(&mut self, target: IpAddr, ifname: &str, default_gw: bool) -> Result<NextHop> {
        self.routes.lookup(target, ifname, default_gw)
    }

    fn probe(&mut self, nexthop: IpAddr, iface: &InterfaceRecord) {
        self.probers
            .entry(iface.ifname.clone())
            .or_insert_with(|| EchoProber::new(&iface.ifname))
            .probe(nexthop, iface);
    }

    fn settle(&mut self) {
        std::thread::sleep(SETTLE_DELAY);
    }
}

/// A MAC address plus validity bit in one atomic word.
#[derive(Debug, Default)]
pub struct AtomicMac(AtomicU64);

const MAC_VALID: u64 = 1 << 63;

impl AtomicMac {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Option<MacAddr> {
        let word = self.0.load(Ordering::Relaxed);
        if word & MAC_VALID == 0 {
            return None;
        }
        let b = word.to_be_bytes();
        Some(MacAddr([b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub fn store(&self, mac: Option<MacAddr>) {
        let word = match mac {
            Some(MacAddr(m)) => {
                MAC_VALID | u64::from_be_bytes([0, 0, m[0], m[1], m[2], m[3], m[4], m[5]])
            }
            None => 0,
        };
        self.0.store(word, Ordering::Relaxed);
    }
}

/// Default-gateway MACs per family, shared between workers.
#[derive(Debug, Default)]
pub struct GatewayCache {
    v4: AtomicMac,
    v6: AtomicMac,
}

impl GatewayCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, family: Family) -> &AtomicMac {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    pub fn get(&self, family: Family) -> Option<MacAddr> {
        self.slot(family).load()
    }

    pub fn set(&self, family: Family, mac: Option<MacAddr>) {
        self.slot(family).store(mac);
    }

    /// Resolves the default gateway of `family` on `iface` and stores the
    /// outcome, invalidating the entry when resolution fails.
    pub fn refresh<R>(&self, family: Family, resolver: &mut R, iface: &InterfaceRecord) -> Option<MacAddr>
    where
        R: NeighborResolver + ?Sized,
    {
        let any = match family {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let mac = resolve_with_retry(resolver, any, iface, true).mac();
        self.set(family, mac);
        mac
    }

    /// Cached MAC, refreshed first when not valid.
    pub fn get_or_refresh<R>(
        &self,
        family: Family,
        resolver: &mut R,
        iface: &InterfaceRecord,
    ) -> Option<MacAddr>
    where
        R: NeighborResolver + ?Sized,
    {
        self.get(family)
            .or_else(|| self.refresh(family, resolver, iface))
    }
}

/// Resolver driven by a fixed table, for tests and dry runs.
///
/// A target absent from the table fails the lookup. Each probe of a listed
/// next hop counts toward `answer_after`: the MAC only shows up once that
/// many probes have been sent.
#[derive(Debug, Default)]
pub struct StaticResolver {
    routes: HashMap<IpAddr, IpAddr>,
    neighbors: HashMap<IpAddr, (MacAddr, usize)>,
    default_gw: HashMap<Family, IpAddr>,
    probes: HashMap<IpAddr, usize>,
    pub lookups: usize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target reachable on-link with a known MAC.
    pub fn with_neighbor(mut self, addr: IpAddr, mac: MacAddr) -> Self {
        self.routes.insert(addr, addr);
        self.neighbors.insert(addr, (mac, 0));
        self
    }

    /// Target reached through `gateway`.
    pub fn with_route(mut self, target: IpAddr, gateway: IpAddr) -> Self {
        self.routes.insert(target, gateway);
        self
    }

    /// Neighbor whose MAC appears after `answer_after` probes.
    pub fn with_slow_neighbor(mut self, addr: IpAddr, mac: MacAddr, answer_after: usize) -> Self {
        self.routes.entry(addr).or_insert(addr);
        self.neighbors.insert(addr, (mac, answer_after));
        self
    }

    pub fn with_default_gateway(mut self, gateway: IpAddr, mac: MacAddr) -> Self {
        let family = if gateway.is_ipv4() { Family::V4 } else { Family::V6 };
        self.default_gw.insert(family, gateway);
        self.neighbors.insert(gateway, (mac, 0));
        self
    }

    pub fn probes_sent(&self, addr: IpAddr) -> usize {
        self.probes.get(&addr).copied().unwrap_or(0)
    }
}

impl NeighborResolver for StaticResolver {
    fn lookup(&mut self, target: IpAddr, _ifname: &str, default_gw: bool) -> Result<NextHop> {
        self.lookups += 1;
        let gateway = if default_gw {
            let family = if target.is_ipv4() { Family::V4 } else { Family::V6 };
            self.default_gw.get(&family).copied()
        } else {
            self.routes.get(&target).copied()
        }
        .ok_or_else(|| crate::Error::Netlink(format!("no route to {target}")))?;

        let mac = match self.neighbors.get(&gateway) {
            Some((mac, after)) if self.probes_sent(gateway) >= *after => *mac,
            _ => MacAddr::ZERO,
        };
        Ok(NextHop { gateway, mac })
    }

    fn probe(&mut self, nexthop: IpAddr, _iface: &InterfaceRecord) {
        *self.probes.entry(nexthop).or_insert(0) += 1;
    }

    fn settle(&mut self) {}
}
