//! AF_PACKET socket implementation

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use super::{FrameSink, FrameSource};
use crate::{Error, Result};

/// Kernel socket buffer size requested for both directions
pub const SOCKET_BUFFER_SIZE: libc::c_int = 512 * 1024;

/// Link-layer membership requested on the bound interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Unicast to us and broadcast only
    Normal,
    /// All multicast groups, needed to see solicited-node NS traffic
    AllMulti,
    /// Everything on the wire
    Promisc,
}

/// Raw AF_PACKET socket bound to one interface.
///
/// The socket is non-blocking; readiness is awaited by the worker that owns
/// it. Membership is tied to the socket and dropped by the kernel on close.
#[derive(Debug)]
pub struct PacketSocket {
    fd: OwnedFd,
    ifindex: i32,
    ifname: String,
}

impl PacketSocket {
    /// Create a new AF_PACKET socket bound to the specified interface
    pub fn open(ifname: &str, membership: Membership) -> Result<Self> {
        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                (libc::ETH_P_ALL as u16).to_be() as i32,
            )
        };
        if raw < 0 {
            return Err(Error::last_os("socket"));
        }
        // SAFETY: raw is a fresh descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        set_buffer(raw, libc::SO_RCVBUF)?;
        set_buffer(raw, libc::SO_SNDBUF)?;

        let ifindex = get_ifindex(raw, ifname)?;

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: (libc::ETH_P_ALL as u16).to_be(),
            sll_ifindex: ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };
        let ret = unsafe {
            libc::bind(
                raw,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };
        if ret < 0 {
            return Err(Error::last_os("bind"));
        }

        bring_up(raw, ifname)?;

        match membership {
            Membership::Normal => {}
            Membership::AllMulti => add_membership(raw, ifindex, libc::PACKET_MR_ALLMULTI)?,
            Membership::Promisc => add_membership(raw, ifindex, libc::PACKET_MR_PROMISC)?,
        }

        let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(Error::last_os("fcntl(O_NONBLOCK)"));
        }

        Ok(Self {
            fd,
            ifindex,
            ifname: ifname.to_string(),
        })
    }

    /// Receives one frame. `None` when nothing is queued.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n >= 0 {
            return Ok(Some(n as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
            _ => Err(err),
        }
    }

    /// Sends one frame as is.
    pub fn send(&self, frame: &[u8]) -> io::Result<usize> {
        let n = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }
}

impl AsRawFd for PacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl FrameSource for PacketSocket {
    fn recv_frame(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        self.recv(buf)
    }
}

impl FrameSink for PacketSocket {
    fn send_frame(&self, frame: &[u8]) {
        if let Err(e) = self.send(frame) {
            tracing::trace!(ifname = %self.ifname, error = %e, "send failed");
        }
    }
}

fn ifreq_for(ifname: &str) -> Result<libc::ifreq> {
    let ifname_c = CString::new(ifname).map_err(|_| Error::InterfaceNotFound {
        name: ifname.to_string(),
    })?;
    let name_bytes = ifname_c.as_bytes_with_nul();

    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    if name_bytes.len() > ifr.ifr_name.len() {
        return Err(Error::InterfaceNotFound {
            name: ifname.to_string(),
        });
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(ifr)
}

fn get_ifindex(fd: RawFd, ifname: &str) -> Result<i32> {
    let mut ifr = ifreq_for(ifname)?;
    let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
    if ret < 0 {
        return Err(Error::InterfaceNotFound {
            name: ifname.to_string(),
        });
    }
    Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
}

fn bring_up(fd: RawFd, ifname: &str) -> Result<()> {
    let mut ifr = ifreq_for(ifname)?;
    if unsafe { libc::ioctl(fd, libc::SIOCGIFFLAGS, &mut ifr) } < 0 {
        return Err(Error::last_os("SIOCGIFFLAGS"));
    }
    let flags = unsafe { ifr.ifr_ifru.ifru_flags };
    if flags & libc::IFF_UP as libc::c_short != 0 {
        return Ok(());
    }
    ifr.ifr_ifru.ifru_flags = flags | libc::IFF_UP as libc::c_short;
    if unsafe { libc::ioctl(fd, libc::SIOCSIFFLAGS, &mut ifr) } < 0 {
        return Err(Error::last_os("SIOCSIFFLAGS"));
    }
    Ok(())
}

fn set_buffer(fd: RawFd, opt: libc::c_int) -> Result<()> {
    let size = SOCKET_BUFFER_SIZE;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            opt,
            &size as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as u32,
        )
    };
    if ret < 0 {
        return Err(Error::last_os("setsockopt(buffer)"));
    }
    Ok(())
}

fn add_membership(fd: RawFd, ifindex: i32, mr_type: libc::c_int) -> Result<()> {
    let mreq = libc::packet_mreq {
        mr_ifindex: ifindex,
        mr_type: mr_type as u16,
        mr_alen: 0,
        mr_address: [0; 8],
    };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_PACKET,
            libc::PACKET_ADD_MEMBERSHIP,
            &mreq as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::packet_mreq>() as u32,
        )
    };
    if ret < 0 {
        return Err(Error::last_os("PACKET_ADD_MEMBERSHIP"));
    }
    Ok(())
}
