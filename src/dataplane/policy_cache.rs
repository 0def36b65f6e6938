//! Per-family cache of resolved client bindings.
//!
//! Bindings live in a fixed arena. When it runs dry a single overflow entry
//! absorbs the lookup and a patrol is requested; the patrol then frees one
//! hash bucket per worker tick until its cursor wraps.

use std::fmt::Write as _;
use std::time::SystemTime;

use super::arena::{Arena, FlowAddr};
use super::server_table::ServerId;
use crate::protocol::MacAddr;
use crate::telemetry::dump::format_time;

/// Cache slots per family
pub const CACHE_ENTRIES: usize = 1024;

/// Hash buckets per family
pub const CACHE_BUCKETS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryState {
    /// On the free list
    #[default]
    Unused,
    Forward,
    /// Tombstone for a dropping server
    Discard,
}

#[derive(Debug, Clone)]
pub struct CacheEntry<A> {
    pub src: A,
    pub dst: A,
    pub dst_mac: MacAddr,
    pub state: EntryState,
    /// IPv4 header checksum delta, 0 for IPv6
    pub delta: u16,
    pub hit: u32,
    /// Index of the owning rule
    pub rule: usize,
    pub server: Option<ServerId>,
    pub created: SystemTime,
}

impl<A: FlowAddr> Default for CacheEntry<A> {
    fn default() -> Self {
        Self {
            src: A::UNSPECIFIED,
            dst: A::UNSPECIFIED,
            dst_mac: MacAddr::ZERO,
            state: EntryState::Unused,
            delta: 0,
            hit: 0,
            rule: 0,
            server: None,
            created: SystemTime::UNIX_EPOCH,
        }
    }
}

impl<A: FlowAddr> CacheEntry<A> {
    fn binding(&self) -> Option<Binding<A>> {
        match self.state {
            EntryState::Forward => Some(Binding {
                dst: self.dst,
                dst_mac: self.dst_mac,
                delta: self.delta,
            }),
            _ => None,
        }
    }
}

/// Where a client's packets go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding<A> {
    pub dst: A,
    pub dst_mac: MacAddr,
    pub delta: u16,
}

/// A cache hit: the owners whose counters the caller bumps, and the
/// binding (`None` for a tombstone).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHit<A> {
    pub rule: usize,
    pub server: Option<ServerId>,
    pub binding: Option<Binding<A>>,
}

/// A new binding to admit.
#[derive(Debug, Clone, Copy)]
pub struct Admission<A> {
    pub src: A,
    pub dst: A,
    pub dst_mac: MacAddr,
    pub state: EntryState,
    pub delta: u16,
    pub rule: usize,
    pub server: ServerId,
}

#[derive(Debug)]
pub struct PolicyCache<A: FlowAddr> {
    arena: Arena<CacheEntry<A>>,
    overflow: CacheEntry<A>,
    patrol_pending: bool,
    cursor: usize,
}

impl<A: FlowAddr> Default for PolicyCache<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: FlowAddr> PolicyCache<A> {
    pub fn new() -> Self {
        Self::with_capacity(CACHE_ENTRIES, CACHE_BUCKETS)
    }

    pub fn with_capacity(entries: usize, buckets: usize) -> Self {
        Self {
            arena: Arena::new(entries, buckets),
            overflow: CacheEntry::default(),
            patrol_pending: false,
            cursor: 0,
        }
    }

    /// Looks `src` up and counts the hit on the entry.
    pub fn hit(&mut self, src: A) -> Option<CacheHit<A>> {
        let bucket = src.bucket(self.arena.mask());
        let idx = self.arena.find(bucket, |e| e.src == src)?;
        let entry = self.arena.get_mut(idx);
        entry.hit = entry.hit.wrapping_add(1);
        Some(CacheHit {
            rule: entry.rule,
            server: entry.server,
            binding: entry.binding(),
        })
    }

    /// Stores a new binding with one hit already counted. Returns whether it
    /// got a slot of its own; when it did not, the overflow entry took it
    /// and a patrol is now pending.
    pub fn admit(&mut self, new: Admission<A>, now: SystemTime) -> bool {
        let slot = self.arena.alloc();
        let entry = match slot {
            Some(idx) => {
                let entry = self.arena.get_mut(idx);
                entry.hit = 0;
                entry.created = now;
                entry
            }
            None => {
                self.patrol_pending = true;
                &mut self.overflow
            }
        };
        entry.src = new.src;
        entry.dst = new.dst;
        entry.dst_mac = new.dst_mac;
        entry.state = new.state;
        entry.delta = new.delta;
        entry.rule = new.rule;
        entry.server = Some(new.server);
        entry.hit = entry.hit.wrapping_add(1);

        if let Some(idx) = slot {
            self.arena.link(idx, new.src.bucket(self.arena.mask()));
        }
        slot.is_some()
    }

    pub fn patrol_pending(&self) -> bool {
        self.patrol_pending
    }

    /// One patrol step: frees every entry of the first non-empty bucket at
    /// or after the cursor, handing each to `on_evict`. Clears the request
    /// once the cursor has passed the last bucket. Does nothing when no
    /// patrol is pending.
    pub fn patrol_tick<F>(&mut self, mut on_evict: F)
    where
        F: FnMut(&CacheEntry<A>),
    {
        if !self.patrol_pending {
            return;
        }
        let buckets = self.arena.bucket_count();
        while self.cursor < buckets {
            let bucket = self.cursor;
            self.cursor += 1;
            let freed = self.arena.evict_bucket(bucket, |e| {
                on_evict(e);
                e.state = EntryState::Unused;
            });
            if freed > 0 {
                break;
            }
        }
        if self.cursor >= buckets {
            self.cursor = 0;
            self.patrol_pending = false;
        }
    }

    /// Frees everything and cancels a pending patrol.
    pub fn reset(&mut self) {
        self.arena.reset();
        self.overflow = CacheEntry::default();
        self.patrol_pending = false;
        self.cursor = 0;
    }

    pub fn free_len(&self) -> usize {
        self.arena.free_len()
    }

    pub fn live_len(&self) -> usize {
        self.arena.capacity() - self.arena.free_len()
    }

    pub fn overflow(&self) -> &CacheEntry<A> {
        &self.overflow
    }

    /// Live entries in slot order.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry<A>> {
        self.arena.slots().filter(|e| e.state != EntryState::Unused)
    }

    pub fn render(&self, out: &mut String) {
        for (n, e) in self.entries().enumerate() {
            let _ = writeln!(
                out,
                "{:4}) {} ({} packets) create: {}",
                n + 1,
                e.src,
                e.hit,
                format_time(e.created)
            );
        }
    }
}
