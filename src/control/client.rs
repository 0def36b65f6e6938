//! Blocking command client, used by the `sasat` tool.

use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::protocol::{Request, Response, REQUEST_LEN, RESPONSE_LEN};
use crate::{Error, Result};

/// How long to wait for the translator's answer
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the client's own socket is created
pub const CLIENT_DIR: &str = "/dev/shm";

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// One bound client socket. Its file is removed on drop.
#[derive(Debug)]
pub struct CommandClient {
    socket: UnixDatagram,
    local: PathBuf,
    server: PathBuf,
}

impl CommandClient {
    pub fn new(server: impl Into<PathBuf>) -> Result<Self> {
        Self::bind_in(Path::new(CLIENT_DIR), server)
    }

    /// Creates the client socket under `dir`.
    pub fn bind_in(dir: &Path, server: impl Into<PathBuf>) -> Result<Self> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let local = dir.join(format!("req{}.{}", std::process::id(), id));
        let _ = std::fs::remove_file(&local);
        let socket = UnixDatagram::bind(&local).map_err(|source| Error::Socket {
            op: "bind client socket",
            source,
        })?;
        socket.set_read_timeout(Some(RESPONSE_TIMEOUT))?;
        Ok(Self {
            socket,
            local,
            server: server.into(),
        })
    }

    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.socket.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// Sends `req` and waits for the response.
    pub fn send(&self, req: Request) -> Result<Response> {
        let n = self
            .socket
            .send_to(&req.encode(), &self.server)
            .map_err(|source| Error::Socket {
                op: "sendto",
                source,
            })?;
        if n != REQUEST_LEN {
            return Err(Error::Protocol(format!("short send ({n} bytes)")));
        }

        let mut buf = [0u8; RESPONSE_LEN * 2];
        match self.socket.recv(&mut buf) {
            Ok(n) => Response::decode(&buf[..n]).map_err(|e| Error::Protocol(e.to_string())),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(Error::Protocol("response timeout".to_string()))
            }
            Err(source) => Err(Error::Socket { op: "recv", source }),
        }
    }
}

impl Drop for CommandClient {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.local);
    }
}
