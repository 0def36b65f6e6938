//! Backend translator process

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::Snapshot;
use crate::capture::{InterfaceRecord, Membership, PacketSocket, Side};
use crate::config::{Config, Role};
use crate::control::{Action, CommandStat, ControlTarget, Daemon};
use crate::dataplane::backend::render_client_section;
use crate::dataplane::{
    proxy, worker, BackendEgress, BackendIngress, BackendShared, EgressMode, ServerInfo,
    WorkerHandle,
};
use crate::neighbor::SystemResolver;
use crate::protocol::Family;
use crate::telemetry::dump::{section_header, CLIENT_TITLE};
use crate::telemetry::{write_dump, BackStat, BackTelemetry, EventLog, LogSections, MessageLog};
use crate::Result;

fn discover(config: &Config, side: Side) -> Result<InterfaceRecord> {
    let section = match side {
        Side::Ingress => &config.ingress,
        Side::Egress => &config.egress,
    };
    let mut iface = InterfaceRecord::discover(&section.ifname)?;
    iface.apply_virtual(
        config.vip_mode,
        section.ip4.as_deref(),
        section.ip6.as_deref(),
        side,
    );
    Ok(iface)
}

/// Server addresses from the configuration; an unset or bad address leaves
/// a trace event.
fn server_info(config: &Config, telemetry: &BackTelemetry, vip4: Ipv4Addr) -> ServerInfo {
    let ip4 = config.server.ip4.as_deref().and_then(|s| s.parse::<Ipv4Addr>().ok());
    if ip4.is_none() {
        telemetry.events.record(b"gft0", 0, 0, None);
    }
    let ip6 = config.server.ip6.as_deref().and_then(|s| s.parse::<Ipv6Addr>().ok());
    if ip6.is_none() {
        telemetry.events.record(b"gft1", 0, 0, None);
    }
    ServerInfo::new(ip4, ip6, vip4)
}

/// Both directions' client tables of one family, as rendered on the workers.
#[derive(Default)]
struct ClientTexts {
    v4: String,
    v6: String,
}

impl ClientTexts {
    fn get(&self, family: Family) -> String {
        match family {
            Family::V4 => self.v4.clone(),
            Family::V6 => self.v6.clone(),
        }
    }
}

/// The running backend translator.
pub struct BackendApp {
    config: Config,
    shared: Arc<BackendShared>,
    ingress_socket: Arc<PacketSocket>,
    ingress: Option<WorkerHandle<BackendIngress>>,
    egress: Option<WorkerHandle<BackendEgress>>,
}

impl BackendApp {
    pub async fn start(config: Config, telemetry: Arc<BackTelemetry>) -> Result<Self> {
        let mut ingress = discover(&config, Side::Ingress)?;
        let mut egress = discover(&config, Side::Egress)?;
        let mut server = server_info(&config, &telemetry, ingress.vip4);
        server.merge_families(&mut ingress, &mut egress);

        let mut resolver = SystemResolver::new();
        if server.resolve_any(&mut resolver, &egress).is_none() {
            info!("server mac not resolved yet");
        }

        let ingress_membership = if ingress.v6_enable {
            Membership::AllMulti
        } else {
            Membership::Normal
        };
        let ingress_socket = Arc::new(PacketSocket::open(&ingress.ifname, ingress_membership)?);
        let egress_socket = Arc::new(PacketSocket::open(&egress.ifname, Membership::Promisc)?);

        let shared = Arc::new(BackendShared::new(
            ingress,
            egress,
            config.vip_mode,
            server,
            telemetry,
        ));
        shared.refresh_gateways(&mut resolver);

        let egress_engine = BackendEgress::new(
            Arc::clone(&shared),
            Box::new(resolver),
            egress_socket.clone(),
            ingress_socket.clone(),
        );
        let (egress_worker, egress_ready) =
            worker::spawn("backend-egress", Arc::clone(&egress_socket), egress_engine)?;

        let ingress_engine = BackendIngress::new(
            Arc::clone(&shared),
            Box::new(SystemResolver::new()),
            ingress_socket.clone(),
            egress_socket.clone(),
        );
        let (ingress_worker, ingress_ready) =
            worker::spawn("backend-ingress", Arc::clone(&ingress_socket), ingress_engine)?;

        egress_ready.wait().await?;
        ingress_ready.wait().await?;
        info!(
            ingress = %shared.ingress.ifname,
            egress = %shared.egress.ifname,
            mode = ?EgressMode::from_vip_mode(shared.vip_mode),
            "start backend translator"
        );

        Ok(Self {
            config,
            shared,
            ingress_socket,
            ingress: Some(ingress_worker),
            egress: Some(egress_worker),
        })
    }

    pub fn shared(&self) -> &Arc<BackendShared> {
        &self.shared
    }

    /// Stops both workers.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.ingress.take() {
            worker.stop();
        }
        if let Some(worker) = self.egress.take() {
            worker.stop();
        }
        info!("backend translator stopped");
    }

    async fn render_clients(&self) -> String {
        let mut up = ClientTexts::default();
        if let Some(worker) = &self.ingress {
            up = worker
                .inspect(|engine: &BackendIngress| {
                    let mut texts = ClientTexts::default();
                    engine.render_clients(Family::V4, &mut texts.v4);
                    engine.render_clients(Family::V6, &mut texts.v6);
                    texts
                })
                .await
                .unwrap_or_default();
        }
        let mut down = ClientTexts::default();
        if let Some(worker) = &self.egress {
            down = worker
                .inspect(|engine: &BackendEgress| {
                    let mut texts = ClientTexts::default();
                    engine.render_clients(Family::V4, &mut texts.v4);
                    engine.render_clients(Family::V6, &mut texts.v6);
                    texts
                })
                .await
                .unwrap_or_default();
        }

        let mut out = String::new();
        section_header(&mut out, CLIENT_TITLE);
        render_client_section(&mut out, |family, upstream| {
            if upstream {
                up.get(family)
            } else {
                down.get(family)
            }
        });
        out
    }
}

impl ControlTarget for BackendApp {
    fn count(&self, stat: CommandStat) {
        let kind = match stat {
            CommandStat::DumpReq => BackStat::CmdDumpReq,
            CommandStat::Trace => BackStat::CmdTrace,
            CommandStat::UpdatePolicy | CommandStat::Illegal => BackStat::CmdIllegal,
        };
        self.shared.telemetry.inc(kind);
    }

    fn event_log(&self) -> &EventLog {
        &self.shared.telemetry.events
    }

    fn message_log(&self) -> &MessageLog {
        &self.shared.telemetry.messages
    }

    fn can_reload(&self) -> bool {
        false
    }
}

impl Daemon for BackendApp {
    async fn reload(&mut self) {
        debug!("policy reload is served by the front translator only");
    }

    async fn dump(&mut self, sections: LogSections) {
        let tables = if sections.contains(LogSections::CLIENT) {
            self.render_clients().await
        } else {
            String::new()
        };
        let mut snapshot = Snapshot::new(Role::Backend, &self.shared.telemetry, tables);
        if let Err(e) = write_dump(&self.config.log_dir, sections, &mut snapshot) {
            debug!(error = %e, "dump failed");
        }
    }

    fn hangup_action(&self) -> Action {
        Action::Dump(LogSections::ALL)
    }

    fn garp_interval(&self) -> Option<Duration> {
        self.shared
            .ingress
            .v4_enable
            .then(|| Duration::from_secs(self.config.garp_interval_secs))
    }

    fn garp(&mut self) {
        if let Err(e) = self.ingress_socket.send(&proxy::gratuitous_arp(&self.shared.ingress)) {
            warn!(error = %e, "gratuitous arp not sent");
        }
    }
}
