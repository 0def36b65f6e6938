//! Control loop of a running translator
//!
//! Serves the command socket, turns `SIGHUP` into the role's default
//! action and sends gratuitous ARP on the role's own schedule.

use std::fs::Permissions;
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::unix::SocketAddr;
use tokio::net::UnixDatagram;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::handler::{Action, CommandHandler, CommandStat, ControlTarget};
use super::protocol::REQUEST_LEN;
use crate::telemetry::LogSections;
use crate::{Error, Result};

/// Shortest gratuitous ARP period
pub const MIN_GARP_INTERVAL: Duration = Duration::from_secs(1);

/// A translator driven by [`ControlServer::run`].
#[allow(async_fn_in_trait)]
pub trait Daemon: ControlTarget {
    async fn reload(&mut self);

    async fn dump(&mut self, sections: LogSections);

    /// What `SIGHUP` means for this role.
    fn hangup_action(&self) -> Action;

    /// Gratuitous ARP period, `None` for never. Read once when the loop
    /// starts; the first one goes out right away.
    fn garp_interval(&self) -> Option<Duration> {
        None
    }

    /// Announces the role's virtual address.
    fn garp(&mut self) {}
}

async fn execute<D: Daemon>(daemon: &mut D, action: Action) {
    match action {
        Action::Reload => daemon.reload().await,
        Action::Dump(sections) => daemon.dump(sections).await,
    }
}

/// Command socket bound to the rendezvous path. The path is removed when
/// the server is dropped.
#[derive(Debug)]
pub struct ControlServer {
    socket: UnixDatagram,
    path: PathBuf,
    handler: CommandHandler,
}

impl ControlServer {
    /// Binds `path`, replacing a stale socket file, and opens it to every
    /// user. Needs a running tokio runtime.
    pub fn bind(path: &Path) -> Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "stale control socket removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let socket = UnixDatagram::bind(path).map_err(|source| Error::Socket {
            op: "bind control socket",
            source,
        })?;
        std::fs::set_permissions(path, Permissions::from_mode(0o666))?;
        info!(path = %path.display(), "control socket ready");
        Ok(Self {
            socket,
            path: path.to_path_buf(),
            handler: CommandHandler::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serves commands until `SIGTERM` or `SIGINT`.
    pub async fn run<D: Daemon>(&self, daemon: &mut D) -> Result<()> {
        self.run_until(daemon, std::future::pending()).await
    }

    /// Like [`run`](Self::run), also returning once `stop` completes.
    pub async fn run_until<D, F>(&self, daemon: &mut D, stop: F) -> Result<()>
    where
        D: Daemon,
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut garp = daemon.garp_interval().map(|period| {
            let mut timer = tokio::time::interval(period.max(MIN_GARP_INTERVAL));
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        // Room for oversized datagrams, so they fail the length check
        let mut buf = [0u8; REQUEST_LEN * 2];
        loop {
            tokio::select! {
                r = self.socket.recv_from(&mut buf) => match r {
                    Ok((n, peer)) => self.serve(daemon, &buf[..n], &peer).await,
                    Err(e) => warn!(error = %e, "control recv failed"),
                },
                _ = hangup.recv() => {
                    let action = daemon.hangup_action();
                    daemon.count(match action {
                        Action::Reload => CommandStat::UpdatePolicy,
                        Action::Dump(_) => CommandStat::DumpReq,
                    });
                    execute(daemon, action).await;
                }
                _ = terminate.recv() => {
                    info!("SIGTERM received");
                    break;
                }
                _ = interrupt.recv() => {
                    info!("SIGINT received");
                    break;
                }
                _ = &mut stop => break,
                _ = next_garp(&mut garp) => daemon.garp(),
            }
        }
        Ok(())
    }

    async fn serve<D: Daemon>(&self, daemon: &mut D, datagram: &[u8], peer: &SocketAddr) {
        let dispatch = self.handler.handle(&*daemon, datagram);
        if let Some(action) = dispatch.action {
            execute(daemon, action).await;
        }
        let Some(resp) = dispatch.response else {
            return;
        };
        let sent = match peer.as_pathname() {
            Some(to) => self.socket.send_to(&resp.encode(), to).await,
            None => Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "unnamed peer",
            )),
        };
        if let Err(e) = sent {
            let errno = e.raw_os_error().unwrap_or(0) as u64;
            daemon.event_log().record(b"cmd0", 0, errno, None);
            warn!(error = %e, "can not send command response");
        }
    }
}

async fn next_garp(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
