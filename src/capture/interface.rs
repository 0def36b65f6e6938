//! Interface discovery and the per-interface address record.

use std::ffi::CStr;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::info;

use crate::protocol::MacAddr;
use crate::{Error, Result};

/// Addresses of one translator interface.
///
/// `vip4`/`vip6` are the addresses the translator answers for: configured
/// virtual addresses in virtual-IP mode, the real ones otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub ifname: String,
    pub mac: MacAddr,
    pub sip4: Ipv4Addr,
    pub sip6: Ipv6Addr,
    pub vip4: Ipv4Addr,
    pub vip6: Ipv6Addr,
    pub v4_enable: bool,
    pub v6_enable: bool,
    /// Solicited-node group MAC of `vip6`, zero when IPv6 is disabled
    pub fmmac: MacAddr,
}

/// Which side an interface serves, for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ingress,
    Egress,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Ingress => write!(f, "ingress"),
            Side::Egress => write!(f, "egress"),
        }
    }
}

fn availability(on: bool) -> &'static str {
    if on {
        "available"
    } else {
        "not available"
    }
}

impl InterfaceRecord {
    /// A record without any address; families start disabled.
    pub fn new(ifname: &str, mac: MacAddr) -> Self {
        Self {
            ifname: ifname.to_string(),
            mac,
            sip4: Ipv4Addr::UNSPECIFIED,
            sip6: Ipv6Addr::UNSPECIFIED,
            vip4: Ipv4Addr::UNSPECIFIED,
            vip6: Ipv6Addr::UNSPECIFIED,
            v4_enable: false,
            v6_enable: false,
            fmmac: MacAddr::ZERO,
        }
    }

    /// Queries the kernel for the interface's MAC and addresses.
    pub fn discover(ifname: &str) -> Result<Self> {
        let mac = read_mac(ifname)?;
        let (v4, v6) = select_addresses(interface_addrs(ifname)?);

        let mut record = Self::new(ifname, mac);
        if let Some(a) = v4 {
            record.sip4 = a;
            record.v4_enable = true;
        }
        if let Some(a) = v6 {
            record.sip6 = a;
            record.v6_enable = true;
        }
        info!(
            "interface({}) v4 {}, v6 {}",
            ifname,
            availability(record.v4_enable),
            availability(record.v6_enable)
        );
        Ok(record)
    }

    /// Sets the answered addresses. In virtual-IP mode an enabled family
    /// needs a parseable configured address, otherwise it is disabled.
    pub fn apply_virtual(
        &mut self,
        vip_mode: bool,
        ip4: Option<&str>,
        ip6: Option<&str>,
        side: Side,
    ) {
        if vip_mode {
            if self.v4_enable {
                match ip4.and_then(|s| s.parse().ok()) {
                    Some(a) => self.vip4 = a,
                    None => {
                        info!("VIP(v4 {side}) not set or invalid");
                        self.v4_enable = false;
                    }
                }
            }
            if self.v6_enable {
                match ip6.and_then(|s| s.parse().ok()) {
                    Some(a) => self.vip6 = a,
                    None => {
                        info!("VIP(v6 {side}) not set or invalid");
                        self.v6_enable = false;
                    }
                }
            }
        } else {
            self.vip4 = self.sip4;
            self.vip6 = self.sip6;
        }

        self.fmmac = if self.v6_enable {
            MacAddr::solicited_node(&self.vip6)
        } else {
            MacAddr::ZERO
        };
    }
}

/// First IPv4 address; first non-`fe..` IPv6 address, else the first
/// link-local one.
pub fn select_addresses<I>(addrs: I) -> (Option<Ipv4Addr>, Option<Ipv6Addr>)
where
    I: IntoIterator<Item = IpAddr>,
{
    let mut v4 = None;
    let mut v6 = None;
    let mut link_local = None;
    for addr in addrs {
        match addr {
            IpAddr::V4(a) => {
                v4.get_or_insert(a);
            }
            IpAddr::V6(a) if a.octets()[0] == 0xfe => {
                link_local.get_or_insert(a);
            }
            IpAddr::V6(a) => {
                v6.get_or_insert(a);
            }
        }
    }
    (v4, v6.or(link_local))
}

fn read_mac(ifname: &str) -> Result<MacAddr> {
    let path = format!("/sys/class/net/{ifname}/address");
    let text = std::fs::read_to_string(&path).map_err(|_| Error::InterfaceNotFound {
        name: ifname.to_string(),
    })?;
    text.trim()
        .parse()
        .map_err(|_| Error::Parse(format!("{path}: bad hardware address")))
}

/// Addresses assigned to `ifname`, in kernel order.
fn interface_addrs(ifname: &str) -> Result<Vec<IpAddr>> {
    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
        return Err(Error::last_os("getifaddrs"));
    }

    let mut addrs = Vec::new();
    let mut cur = ifap;
    while !cur.is_null() {
        // SAFETY: cur walks the list getifaddrs returned, freed below.
        let ifa = unsafe { &*cur };
        cur = ifa.ifa_next;

        if ifa.ifa_addr.is_null() || ifa.ifa_name.is_null() {
            continue;
        }
        let name = unsafe { CStr::from_ptr(ifa.ifa_name) };
        if name.to_bytes() != ifname.as_bytes() {
            continue;
        }
        match unsafe { (*ifa.ifa_addr).sa_family } as libc::c_int {
            libc::AF_INET => {
                let sin = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
                addrs.push(IpAddr::V4(Ipv4Addr::from(u32::from_be(
                    sin.sin_addr.s_addr,
                ))));
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in6) };
                addrs.push(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)));
            }
            _ => {}
        }
    }
    unsafe { libc::freeifaddrs(ifap) };
    Ok(addrs)
}
