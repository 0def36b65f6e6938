//! Diagnostic dump files.
//!
//! A dump is a plain-text file named after the local time it was taken,
//! starting with a role header line and followed by the requested sections.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bitflags::bitflags;
use chrono::{DateTime, Local};
use tracing::{info, warn};

use super::trace::{EventLog, MessageLog};
use crate::config::Role;
use crate::Result;

bitflags! {
    /// Dump sections, as carried in the dump request byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LogSections: u8 {
        const STAT = 1;
        const MLOG = 1 << 1;
        const EVTLOG = 1 << 2;
        const CLIENT = 1 << 3;
        const POLICY = 1 << 4;
        const SERVER = 1 << 5;
        const ALL = 0xff;
    }
}

impl LogSections {
    /// Maps a CLI section name (`all`, `stat`, `mlog`, `elog`, `cl`, `pol`,
    /// `svr`) to its bit. Unknown names map to no section.
    pub fn from_cli_name(name: &str) -> Self {
        match name {
            "all" => Self::ALL,
            "stat" => Self::STAT,
            "mlog" => Self::MLOG,
            "elog" => Self::EVTLOG,
            "cl" => Self::CLIENT,
            "pol" => Self::POLICY,
            "svr" => Self::SERVER,
            _ => Self::empty(),
        }
    }
}

const SEPARATOR: &str = "----------------";

pub const STAT_TITLE: &str = "STATISTICS:";
pub const MLOG_TITLE: &str = "MLOG:";
pub const EVTLOG_TITLE: &str = "EVENTLOG:";
pub const CLIENT_TITLE: &str = "CLIENT INFO:";
pub const POLICY_TITLE: &str = "POLICY STATUS:";
pub const SERVER_TITLE: &str = "BACKEND TRANSLATOR INFO:";

/// Everything a dump reads.
pub trait DumpSource {
    fn role(&self) -> Role;

    fn render_stats(&self, out: &mut String);

    fn message_log(&self) -> &MessageLog;

    fn event_log(&self) -> &EventLog;

    /// Renders the client, policy and server sections selected in
    /// `sections`, in that order. These live in worker-owned tables.
    fn render_tables(&mut self, sections: LogSections, out: &mut String);
}

/// Appends a section separator and title.
pub fn section_header(out: &mut String, title: &str) {
    let _ = write!(out, "\n{SEPARATOR}\n{title}\n");
}

/// `YYYY-MM-DD HH:MM:SS.mmm` in local time.
pub fn format_time(time: SystemTime) -> String {
    let dt: DateTime<Local> = time.into();
    dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// `ctime(3)` style, newline included.
fn format_ctime(time: SystemTime) -> String {
    let dt: DateTime<Local> = time.into();
    dt.format("%a %b %e %H:%M:%S %Y\n").to_string()
}

pub fn dump_file_name(time: SystemTime) -> String {
    let dt: DateTime<Local> = time.into();
    dt.format("sasat%m-%d_%H-%M-%S.log").to_string()
}

fn header_line(role: Role) -> &'static str {
    match role {
        Role::Front => "Front Translator Log",
        Role::Backend => "Backend Translator Log",
    }
}

pub fn render_messages(log: &MessageLog, out: &mut String) {
    section_header(out, MLOG_TITLE);
    out.push_str(&format_ctime(log.started()));
    for msg in log.snapshot() {
        let _ = write!(
            out,
            "\nseq :{}\ntime:{}\nmsg :{}\n",
            msg.seq,
            format_time(msg.time),
            msg.text
        );
    }
}

pub fn render_events(log: &EventLog, out: &mut String) {
    section_header(out, EVTLOG_TITLE);
    out.push_str(&format_ctime(log.started()));
    for ev in log.snapshot() {
        let _ = write!(
            out,
            "\nseq :{}\ntid :{}\ntime:{}\ndata:{:x}/{:x}\n",
            ev.seq,
            ev.tag_str(),
            format_time(ev.time),
            ev.info1,
            ev.info2
        );
        for row in ev.data.chunks(8) {
            out.push_str("    ");
            for b in row {
                let _ = write!(out, " {b:02x}");
            }
            out.push('\n');
        }
    }
}

/// Renders the selected sections into a string, header included.
pub fn render_dump(sections: LogSections, source: &mut dyn DumpSource, now: SystemTime) -> String {
    let mut out = String::new();
    let _ = write!(out, "{} : {}", header_line(source.role()), format_ctime(now));

    if sections.contains(LogSections::STAT) {
        section_header(&mut out, STAT_TITLE);
        source.render_stats(&mut out);
    }
    if sections.contains(LogSections::MLOG) {
        render_messages(source.message_log(), &mut out);
    }
    if sections.contains(LogSections::EVTLOG) {
        render_events(source.event_log(), &mut out);
    }
    let tables = sections & (LogSections::CLIENT | LogSections::POLICY | LogSections::SERVER);
    if !tables.is_empty() {
        source.render_tables(tables, &mut out);
    }
    out
}

/// Writes a dump of `sections` into `dir`. An empty selection writes
/// nothing and returns `None`.
pub fn write_dump(
    dir: &Path,
    sections: LogSections,
    source: &mut dyn DumpSource,
) -> Result<Option<PathBuf>> {
    if sections.is_empty() {
        return Ok(None);
    }
    let now = SystemTime::now();
    let path = dir.join(dump_file_name(now));
    let text = render_dump(sections, source, now);

    if let Err(e) = std::fs::write(&path, text) {
        warn!(path = %path.display(), error = %e, "can not write log dump");
        return Err(e.into());
    }
    info!(path = %path.display(), "log dump written");
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::metrics::{BackStat, StatTable};

    struct Fake {
        stats: StatTable<BackStat>,
        mlog: MessageLog,
        elog: EventLog,
        asked: Option<LogSections>,
    }

    impl Fake {
        fn new() -> Self {
            Self {
                stats: StatTable::new(),
                mlog: MessageLog::new(),
                elog: EventLog::new(),
                asked: None,
            }
        }
    }

    impl DumpSource for Fake {
        fn role(&self) -> Role {
            Role::Backend
        }
        fn render_stats(&self, out: &mut String) {
            self.stats.render(out);
        }
        fn message_log(&self) -> &MessageLog {
            &self.mlog
        }
        fn event_log(&self) -> &EventLog {
            &self.elog
        }
        fn render_tables(&mut self, sections: LogSections, out: &mut String) {
            self.asked = Some(sections);
            section_header(out, CLIENT_TITLE);
        }
    }

    #[test]
    fn test_section_names() {
        assert_eq!(LogSections::from_cli_name("stat"), LogSections::STAT);
        assert_eq!(LogSections::from_cli_name("pol").bits(), 16);
        assert_eq!(LogSections::from_cli_name("all").bits(), 0xff);
        assert!(LogSections::from_cli_name("bogus").is_empty());
        assert_eq!(
            (LogSections::from_cli_name("cl") | LogSections::from_cli_name("svr")).bits(),
            8 | 32
        );
    }

    #[test]
    fn test_render_selected_sections() {
        let mut src = Fake::new();
        src.stats.inc(BackStat::RxPacketV4In);
        src.mlog.push("start backend translator");
        src.elog.record(b"pri4", 0x3c, 0, Some(&[1, 2, 3]));

        let text = render_dump(
            LogSections::STAT | LogSections::MLOG | LogSections::EVTLOG,
            &mut src,
            SystemTime::now(),
        );

        assert!(text.starts_with("Backend Translator Log : "));
        assert!(text.contains("\n----------------\nSTATISTICS:\n"));
        assert!(text.contains("         1:rx packets v4(in)\n"));
        assert!(text.contains("\nseq :1\n"));
        assert!(text.contains("msg :start backend translator\n"));
        assert!(text.contains("tid :pri4\n"));
        assert!(text.contains("data:3c/0\n"));
        assert!(text.contains("     01 02 03 00 00 00 00 00\n"));
        assert!(src.asked.is_none());
    }

    #[test]
    fn test_tables_requested_only_when_selected() {
        let mut src = Fake::new();
        let text = render_dump(LogSections::ALL, &mut src, SystemTime::now());
        assert!(text.contains(CLIENT_TITLE));
        let asked = src.asked.unwrap();
        assert!(asked.contains(LogSections::CLIENT | LogSections::POLICY | LogSections::SERVER));
        assert!(!asked.contains(LogSections::STAT));
    }

    #[test]
    fn test_write_dump_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = Fake::new();

        assert!(write_dump(dir.path(), LogSections::empty(), &mut src)
            .unwrap()
            .is_none());

        let path = write_dump(dir.path(), LogSections::STAT, &mut src)
            .unwrap()
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("sasat") && name.ends_with(".log"));
        assert_eq!(name.len(), "sasatMM-DD_hh-mm-ss.log".len());
        let body = std::fs::read_to_string(path).unwrap();
        assert!(body.contains(STAT_TITLE));
    }
}
