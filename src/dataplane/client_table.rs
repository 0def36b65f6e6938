//! Clients seen by the backend translator, per direction and family.

use std::fmt::Write as _;
use std::time::SystemTime;

use tracing::debug;

use super::arena::{Arena, FlowAddr};
use crate::telemetry::dump::format_time;

/// Entries per table
pub const CLIENT_ENTRIES: usize = 256;

/// Hash buckets per table
pub const CLIENT_BUCKETS: usize = 1024;

#[derive(Debug, Clone)]
pub struct ClientEntry<A> {
    pub addr: A,
    pub hit: u32,
    /// `None` while the slot is free
    pub last_seen: Option<SystemTime>,
}

impl<A: FlowAddr> Default for ClientEntry<A> {
    fn default() -> Self {
        Self {
            addr: A::UNSPECIFIED,
            hit: 0,
            last_seen: None,
        }
    }
}

#[derive(Debug)]
pub struct ClientTable<A: FlowAddr> {
    arena: Arena<ClientEntry<A>>,
    resets: u64,
}

impl<A: FlowAddr> Default for ClientTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: FlowAddr> ClientTable<A> {
    pub fn new() -> Self {
        Self::with_capacity(CLIENT_ENTRIES, CLIENT_BUCKETS)
    }

    pub fn with_capacity(entries: usize, buckets: usize) -> Self {
        Self {
            arena: Arena::new(entries, buckets),
            resets: 0,
        }
    }

    /// Records a packet from `addr`. A full table is wiped first.
    pub fn touch(&mut self, addr: A, now: SystemTime) {
        let bucket = addr.bucket(self.arena.mask());
        if let Some(idx) = self.arena.find(bucket, |e| e.addr == addr) {
            let entry = self.arena.get_mut(idx);
            entry.hit = entry.hit.wrapping_add(1);
            entry.last_seen = Some(now);
            return;
        }

        let idx = match self.arena.alloc() {
            Some(idx) => idx,
            None => {
                let family = A::FAMILY;
                debug!(%family, "client table full, reset");
                self.arena.reset();
                self.resets += 1;
                match self.arena.alloc() {
                    Some(idx) => idx,
                    None => return,
                }
            }
        };
        let entry = self.arena.get_mut(idx);
        entry.addr = addr;
        entry.hit = 1;
        entry.last_seen = Some(now);
        self.arena.link(idx, bucket);
    }

    pub fn get(&self, addr: A) -> Option<&ClientEntry<A>> {
        let bucket = addr.bucket(self.arena.mask());
        self.arena
            .find(bucket, |e| e.addr == addr)
            .map(|idx| self.arena.get(idx))
    }

    pub fn len(&self) -> usize {
        self.arena.capacity() - self.arena.free_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Times the table was wiped for lack of space
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Seen clients in slot order.
    pub fn render(&self, out: &mut String) {
        let seen = self
            .arena
            .slots()
            .filter_map(|e| e.last_seen.map(|t| (e, t)));
        for (n, (e, t)) in seen.enumerate() {
            let _ = writeln!(
                out,
                "{:4}) {} ({} packets) last access: {}",
                n + 1,
                e.addr,
                e.hit,
                format_time(t)
            );
        }
    }
}
