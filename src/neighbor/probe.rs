//! Echo probes that make the kernel resolve a next hop.

use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::info;

use crate::capture::InterfaceRecord;
use crate::protocol::{icmp, icmpv6};
use crate::{Error, Result};

/// Raw ICMP/ICMPv6 senders pinned to one interface, opened on first use.
#[derive(Debug)]
pub struct EchoProber {
    ifname: String,
    v4: Option<Socket>,
    v6: Option<Socket>,
    seq: u16,
}

impl EchoProber {
    pub fn new(ifname: &str) -> Self {
        Self {
            ifname: ifname.to_string(),
            v4: None,
            v6: None,
            seq: 0,
        }
    }

    /// Sends one echo request to `target` from the interface's own address.
    /// Failures are logged and otherwise ignored.
    pub fn probe(&mut self, target: IpAddr, iface: &InterfaceRecord) {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let (src, msg) = match target {
            IpAddr::V4(_) => (IpAddr::V4(iface.sip4), icmp::echo_request(0, seq).to_vec()),
            IpAddr::V6(_) => (IpAddr::V6(iface.sip6), icmpv6::echo_request(0, seq).to_vec()),
        };
        if let Err(e) = self.send(target, src, &msg) {
            tracing::debug!(ifname = %self.ifname, %target, error = %e, "probe failed");
        }
    }

    fn send(&mut self, dst: IpAddr, src: IpAddr, msg: &[u8]) -> Result<()> {
        let slot = match dst {
            IpAddr::V4(_) => &mut self.v4,
            IpAddr::V6(_) => &mut self.v6,
        };
        if slot.is_none() {
            *slot = Some(open_raw(&self.ifname, src).inspect_err(|_| info!("ping socket error"))?);
        }
        let Some(socket) = slot.as_ref() else {
            return Ok(());
        };
        socket
            .send_to(msg, &SockAddr::from(SocketAddr::new(dst, 0)))
            .map_err(|source| Error::Socket {
                op: "sendto(raw icmp)",
                source,
            })
            .inspect_err(|_| info!("ping send error"))?;
        Ok(())
    }
}

/// Nonblocking raw ICMP socket of `src`'s family, bound to `ifname` and `src`.
fn open_raw(ifname: &str, src: IpAddr) -> Result<Socket> {
    let (domain, protocol) = match src {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    let socket = Socket::new(domain, Type::RAW, Some(protocol)).map_err(|source| Error::Socket {
        op: "socket(raw icmp)",
        source,
    })?;
    socket.set_nonblocking(true).map_err(|source| Error::Socket {
        op: "O_NONBLOCK",
        source,
    })?;
    socket
        .bind_device(Some(ifname.as_bytes()))
        .map_err(|source| Error::Socket {
            op: "SO_BINDTODEVICE",
            source,
        })?;
    socket
        .bind(&SockAddr::from(SocketAddr::new(src, 0)))
        .map_err(|source| Error::Socket {
            op: "bind(raw icmp)",
            source,
        })?;
    Ok(socket)
}
