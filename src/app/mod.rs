//! Translator processes
//!
//! Wires configuration, sockets, workers and the control loop together for
//! each role.

mod backend;
mod front;
mod pidfile;

pub use backend::BackendApp;
pub use front::FrontApp;
pub use pidfile::PidFile;

use std::sync::Arc;

use tracing::error;

use crate::config::{Config, Role};
use crate::control::{ControlServer, Daemon};
use crate::telemetry::{init_logging, DumpSource, EventLog, LogSections, MessageLog, StatKind, Telemetry};
use crate::Result;

/// A dump's view of one translator: shared telemetry plus tables rendered
/// by the workers beforehand.
pub(crate) struct Snapshot<'a, K: StatKind> {
    role: Role,
    telemetry: &'a Telemetry<K>,
    tables: String,
}

impl<'a, K: StatKind> Snapshot<'a, K> {
    pub(crate) fn new(role: Role, telemetry: &'a Telemetry<K>, tables: String) -> Self {
        Self {
            role,
            telemetry,
            tables,
        }
    }
}

impl<K: StatKind> DumpSource for Snapshot<'_, K> {
    fn role(&self) -> Role {
        self.role
    }

    fn render_stats(&self, out: &mut String) {
        self.telemetry.stats.render(out);
    }

    fn message_log(&self) -> &MessageLog {
        &self.telemetry.messages
    }

    fn event_log(&self) -> &EventLog {
        &self.telemetry.events
    }

    fn render_tables(&mut self, _sections: LogSections, out: &mut String) {
        out.push_str(&self.tables);
    }
}

/// Runs a translator of `role` until it is told to stop. Logging is set up
/// here so the dump's message section sees startup.
pub fn run(role: Role, config: Config) -> Result<()> {
    let messages = Arc::new(MessageLog::new());
    init_logging(Some(&config.log), Some(Arc::clone(&messages)));

    let _pid = PidFile::create(&config.pid_file)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = ControlServer::bind(&config.ud_file)?;
        match role {
            Role::Front => {
                let mut app = FrontApp::start(config, Arc::new(Telemetry::new(messages))).await?;
                let served = serve(&server, &mut app).await;
                app.shutdown();
                served
            }
            Role::Backend => {
                let mut app = BackendApp::start(config, Arc::new(Telemetry::new(messages))).await?;
                let served = serve(&server, &mut app).await;
                app.shutdown();
                served
            }
        }
    })
}

async fn serve<D: Daemon>(server: &ControlServer, app: &mut D) -> Result<()> {
    let served = server.run(app).await;
    if let Err(e) = &served {
        error!(error = %e, "control loop failed");
    }
    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::dump::render_dump;
    use crate::telemetry::FrontStat;
    use std::time::SystemTime;

    #[test]
    fn test_snapshot_appends_tables() {
        let telemetry: Telemetry<FrontStat> = Telemetry::new(Arc::new(MessageLog::new()));
        telemetry.inc(FrontStat::CmdDumpReq);
        let mut snap = Snapshot::new(Role::Front, &telemetry, "\nrendered tables\n".into());

        let text = render_dump(
            LogSections::STAT | LogSections::POLICY,
            &mut snap,
            SystemTime::now(),
        );
        assert!(text.starts_with("Front Translator Log : "));
        assert!(text.contains("         1:command dump req\n"));
        assert!(text.ends_with("\nrendered tables\n"));
    }
}
