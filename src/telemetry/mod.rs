//! Telemetry module for logging, statistics and diagnostic traces.
//!
//! Provides:
//! - Logging configuration and initialization
//! - Enum-indexed packet statistics
//! - Event and message rings
//! - Dump files combining all of the above

pub mod dump;
mod logging;
mod metrics;
mod trace;

use std::sync::Arc;

pub use dump::{write_dump, DumpSource, LogSections};
pub use logging::{init_logging, LogConfig, MessageLogLayer};
pub use metrics::{BackStat, Counter, FrontStat, StatKind, StatTable};
pub use trace::{Event, EventLog, Message, MessageLog, EVENT_DATA_LEN, MESSAGE_LEN};

/// Diagnostic state shared by a translator's workers and its control loop.
#[derive(Debug)]
pub struct Telemetry<K: StatKind> {
    pub stats: StatTable<K>,
    pub events: EventLog,
    pub messages: Arc<MessageLog>,
}

impl<K: StatKind> Telemetry<K> {
    pub fn new(messages: Arc<MessageLog>) -> Self {
        Self {
            stats: StatTable::new(),
            events: EventLog::new(),
            messages,
        }
    }

    #[inline]
    pub fn inc(&self, kind: K) {
        self.stats.inc(kind);
    }

    /// Event record with the leading bytes of `frame`.
    #[inline]
    pub fn event(&self, tag: &[u8; 4], info1: u64, info2: u64, frame: &[u8]) {
        self.events.record(tag, info1, info2, Some(frame));
    }
}

pub type FrontTelemetry = Telemetry<FrontStat>;
pub type BackTelemetry = Telemetry<BackStat>;
