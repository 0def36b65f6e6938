//! Front translator process

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::Snapshot;
use crate::capture::{InterfaceRecord, Membership, PacketSocket, Side};
use crate::config::policy::{self, PolicyLine};
use crate::config::{Config, Role};
use crate::control::{Action, CommandStat, ControlTarget, Daemon};
use crate::dataplane::{proxy, worker, FrontEngine, WorkerHandle};
use crate::neighbor::SystemResolver;
use crate::telemetry::{write_dump, EventLog, FrontStat, FrontTelemetry, LogSections, MessageLog};
use crate::Result;

const WORKER_NAME: &str = "front-ingress";

fn discover(config: &Config) -> Result<InterfaceRecord> {
    let mut iface = InterfaceRecord::discover(&config.ingress.ifname)?;
    iface.apply_virtual(
        config.vip_mode,
        config.ingress.ip4.as_deref(),
        config.ingress.ip6.as_deref(),
        Side::Ingress,
    );
    Ok(iface)
}

/// A missing or unreadable policy file means an empty policy.
fn read_policy(path: &Path) -> Vec<PolicyLine> {
    match policy::load(path) {
        Ok(lines) => {
            info!(path = %path.display(), rules = lines.len(), "policy file read");
            lines
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "can not open policy file");
            Vec::new()
        }
    }
}

async fn start_worker(
    socket: &Arc<PacketSocket>,
    engine: FrontEngine,
) -> Result<WorkerHandle<FrontEngine>> {
    let (handle, ready) = worker::spawn(WORKER_NAME, Arc::clone(socket), engine)?;
    ready.wait().await?;
    Ok(handle)
}

/// The running front translator.
pub struct FrontApp {
    config: Config,
    telemetry: Arc<FrontTelemetry>,
    socket: Arc<PacketSocket>,
    /// Copy of the worker's interface record, for gratuitous ARP
    iface: InterfaceRecord,
    worker: Option<WorkerHandle<FrontEngine>>,
}

impl FrontApp {
    pub async fn start(config: Config, telemetry: Arc<FrontTelemetry>) -> Result<Self> {
        let iface = discover(&config)?;
        let membership = if iface.v6_enable {
            Membership::AllMulti
        } else {
            Membership::Normal
        };
        let socket = Arc::new(PacketSocket::open(&iface.ifname, membership)?);

        let mut engine = FrontEngine::new(
            iface.clone(),
            config.vip_mode,
            Box::new(SystemResolver::new()),
            socket.clone(),
            Arc::clone(&telemetry),
        );
        engine.load_policy(&read_policy(&config.policy_file));
        let worker = start_worker(&socket, engine).await?;
        info!(ifname = %iface.ifname, "start front translator");

        Ok(Self {
            config,
            telemetry,
            socket,
            iface,
            worker: Some(worker),
        })
    }

    pub fn iface(&self) -> &InterfaceRecord {
        &self.iface
    }

    /// Stops the worker.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        info!("front translator stopped");
    }
}

impl ControlTarget for FrontApp {
    fn count(&self, stat: CommandStat) {
        self.telemetry.inc(match stat {
            CommandStat::UpdatePolicy => FrontStat::CmdUpdatePolicy,
            CommandStat::DumpReq => FrontStat::CmdDumpReq,
            CommandStat::Trace => FrontStat::CmdTrace,
            CommandStat::Illegal => FrontStat::CmdIllegal,
        });
    }

    fn event_log(&self) -> &EventLog {
        &self.telemetry.events
    }

    fn message_log(&self) -> &MessageLog {
        &self.telemetry.messages
    }

    fn can_reload(&self) -> bool {
        true
    }
}

impl Daemon for FrontApp {
    /// Stops the worker, rebuilds policy state and interface information
    /// and starts a fresh worker on the same socket.
    async fn reload(&mut self) {
        info!("update policy table");
        let engine = self.worker.take().and_then(WorkerHandle::stop);

        let iface = match discover(&self.config) {
            Ok(iface) => iface,
            Err(e) => {
                warn!(error = %e, "interface information not refreshed");
                self.iface.clone()
            }
        };
        let lines = read_policy(&self.config.policy_file);
        let mut engine = engine.unwrap_or_else(|| {
            FrontEngine::new(
                iface.clone(),
                self.config.vip_mode,
                Box::new(SystemResolver::new()),
                self.socket.clone(),
                Arc::clone(&self.telemetry),
            )
        });
        engine.reload(iface.clone(), &lines);
        self.iface = iface;

        match start_worker(&self.socket, engine).await {
            Ok(worker) => self.worker = Some(worker),
            Err(e) => error!(error = %e, "can not restart front worker"),
        }
    }

    async fn dump(&mut self, sections: LogSections) {
        let tables = match &self.worker {
            Some(worker) => worker
                .inspect(move |engine: &FrontEngine| {
                    let mut out = String::new();
                    engine.render_tables(sections, &mut out);
                    out
                })
                .await
                .unwrap_or_default(),
            None => String::new(),
        };
        let mut snapshot = Snapshot::new(Role::Front, &self.telemetry, tables);
        if let Err(e) = write_dump(&self.config.log_dir, sections, &mut snapshot) {
            debug!(error = %e, "dump failed");
        }
    }

    fn hangup_action(&self) -> Action {
        Action::Reload
    }

    fn garp_interval(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.garp_interval_secs))
    }

    fn garp(&mut self) {
        if !self.iface.v4_enable {
            return;
        }
        if let Err(e) = self.socket.send(&proxy::gratuitous_arp(&self.iface)) {
            warn!(error = %e, "gratuitous arp not sent");
        }
    }
}
