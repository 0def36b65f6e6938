//! In-memory trace rings dumped on request.
//!
//! [`EventLog`] keeps the last packet-path events with a slice of the frame,
//! [`MessageLog`] keeps the last operational messages. Both overwrite the
//! oldest slot when full and yield entries oldest first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

/// Bytes of frame data kept per event
pub const EVENT_DATA_LEN: usize = 56;
/// Event ring capacity
pub const MAX_EVENTS: usize = 2048;
/// Bytes kept per message, longer text is cut
pub const MESSAGE_LEN: usize = 112;
/// Message ring capacity
pub const MAX_MESSAGES: usize = 256;

/// Fixed-capacity ring of the most recent `capacity` values.
#[derive(Debug)]
struct Ring<T> {
    slots: Vec<Option<T>>,
    pos: usize,
}

impl<T: Clone> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            pos: 0,
        }
    }

    fn push(&mut self, value: T) {
        self.slots[self.pos] = Some(value);
        self.pos = (self.pos + 1) % self.slots.len();
    }

    fn oldest_first(&self) -> Vec<T> {
        let (newer, older) = self.slots.split_at(self.pos);
        older.iter().chain(newer).flatten().cloned().collect()
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub seq: u32,
    pub tag: [u8; 4],
    pub time: SystemTime,
    pub info1: u64,
    pub info2: u64,
    pub data: [u8; EVENT_DATA_LEN],
}

impl Event {
    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }
}

#[derive(Debug)]
struct EventRing {
    ring: Ring<Event>,
    seq: u32,
}

/// Packet-path event trace, switchable at runtime.
#[derive(Debug)]
pub struct EventLog {
    enabled: AtomicBool,
    started: SystemTime,
    inner: Mutex<EventRing>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            started: SystemTime::now(),
            inner: Mutex::new(EventRing {
                ring: Ring::new(MAX_EVENTS),
                seq: 0,
            }),
        }
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn started(&self) -> SystemTime {
        self.started
    }

    /// Records an event. `data` is copied up to [`EVENT_DATA_LEN`] bytes;
    /// without data the slot starts with four blanks.
    pub fn record(&self, tag: &[u8; 4], info1: u64, info2: u64, data: Option<&[u8]>) {
        if !self.is_enabled() {
            return;
        }
        let mut buf = [0u8; EVENT_DATA_LEN];
        match data {
            Some(d) => {
                let n = d.len().min(EVENT_DATA_LEN);
                buf[..n].copy_from_slice(&d[..n]);
            }
            None => buf[..4].copy_from_slice(b"    "),
        }

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.seq = inner.seq.wrapping_add(1);
        let seq = inner.seq;
        inner.ring.push(Event {
            seq,
            tag: *tag,
            time: SystemTime::now(),
            info1,
            info2,
            data: buf,
        });
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.inner
            .lock()
            .map(|inner| inner.ring.oldest_first())
            .unwrap_or_default()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub seq: u32,
    pub time: SystemTime,
    pub text: String,
}

#[derive(Debug)]
struct MessageRing {
    ring: Ring<Message>,
    seq: u32,
}

/// Operational message history, fed by the `tracing` layer in
/// [`super::logging`].
#[derive(Debug)]
pub struct MessageLog {
    started: SystemTime,
    inner: Mutex<MessageRing>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self {
            started: SystemTime::now(),
            inner: Mutex::new(MessageRing {
                ring: Ring::new(MAX_MESSAGES),
                seq: 0,
            }),
        }
    }

    pub fn started(&self) -> SystemTime {
        self.started
    }

    pub fn push(&self, text: &str) {
        let text = truncate(text, MESSAGE_LEN - 1).to_string();
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.seq = inner.seq.wrapping_add(1);
        let seq = inner.seq;
        inner.ring.push(Message {
            seq,
            time: SystemTime::now(),
            text,
        });
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner
            .lock()
            .map(|inner| inner.ring.oldest_first())
            .unwrap_or_default()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Cuts `s` to at most `max` bytes on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_wraps_oldest_first() {
        let mut ring = Ring::new(3);
        for i in 1..=5 {
            ring.push(i);
        }
        assert_eq!(ring.oldest_first(), vec![3, 4, 5]);
    }

    #[test]
    fn test_ring_partial() {
        let mut ring = Ring::new(4);
        ring.push('a');
        ring.push('b');
        assert_eq!(ring.oldest_first(), vec!['a', 'b']);
    }

    #[test]
    fn test_event_log_records_frame_prefix() {
        let log = EventLog::new();
        let frame = [0xaau8; 80];
        log.record(b"prc4", 80, 0, Some(&frame));
        log.record(b"gft0", 0, 0, None);

        let events = log.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[0].tag_str(), "prc4");
        assert_eq!(events[0].info1, 80);
        assert_eq!(events[0].data, [0xaa; EVENT_DATA_LEN]);
        assert_eq!(&events[1].data[..4], b"    ");
    }

    #[test]
    fn test_event_log_disabled() {
        let log = EventLog::new();
        log.set_enabled(false);
        log.record(b"prc6", 1, 2, None);
        assert!(log.snapshot().is_empty());

        log.set_enabled(true);
        log.record(b"prc6", 1, 2, None);
        assert_eq!(log.snapshot().len(), 1);
    }

    #[test]
    fn test_event_log_overwrites() {
        let log = EventLog::new();
        for i in 0..(MAX_EVENTS as u64 + 10) {
            log.record(b"test", i, 0, None);
        }
        let events = log.snapshot();
        assert_eq!(events.len(), MAX_EVENTS);
        assert_eq!(events[0].info1, 10);
        assert_eq!(events[0].seq, 11);
    }

    #[test]
    fn test_message_log_truncates() {
        let log = MessageLog::new();
        log.push(&"x".repeat(300));
        log.push("create v4 policy table (10.0.0.0, 255.0.0.0, 192.168.1.1)");

        let msgs = log.snapshot();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].text.len(), MESSAGE_LEN - 1);
        assert_eq!(msgs[1].seq, 2);
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("aé", 2), "a");
    }
}
