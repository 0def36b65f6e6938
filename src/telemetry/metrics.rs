//! Packet statistics.
//!
//! Counters are flat, enum-indexed and lock-free so both backend workers and
//! the control loop can touch them without coordination.

use std::fmt::Write as _;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// An enum naming every slot of a [`StatTable`].
pub trait StatKind: Copy + 'static {
    /// Every variant, in dump order
    const ALL: &'static [Self];

    fn label(self) -> &'static str;

    fn index(self) -> usize;
}

macro_rules! stat_kind {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant,)*
        }

        impl StatKind for $name {
            const ALL: &'static [Self] = &[$($name::$variant,)*];

            fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)*
                }
            }

            fn index(self) -> usize {
                self as usize
            }
        }
    };
}

stat_kind! {
    /// Front translator counters
    FrontStat {
        RxPacketV6 => ":rx packets v6",
        TxPacketV6 => ":tx packets v6",
        RxPacketV4 => ":rx packets v4",
        TxPacketV4 => ":tx packets v4",
        RxPacketMc => ":rx packets multicast",
        TxArpReply => ":tx arp reply ",
        TxNa => ":tx neighbor adv",
        RxDropAddrV6 => ":rx drop (v6 address)",
        RxDropAddrV4 => ":rx drop (v4 address)",
        RxDropNoIp => ":rx drop (not ip)",
        RxDropVlan => ":rx drop (vlan)",
        RxDropShort => ":rx drop (short)",
        RxDropPolicy => ":rx drop (policy)",
        RxDrop => ":rx drop (other)",
        SelectTimeout => ":select",
        ClearPolicyCache => ":clear policy cache",
        CmdUpdatePolicy => ":command update policy",
        CmdDumpReq => ":command dump req",
        CmdTrace => ":command event trace ctrl",
        CmdIllegal => ":command illegal req",
    }
}

stat_kind! {
    /// Backend translator counters, `In` = client side, `Eg` = server side
    BackStat {
        RxPacketV6In => ":rx packets v6(in)",
        TxPacketV6In => ":tx packets v6(in)",
        RxPacketV4In => ":rx packets v4(in)",
        TxPacketV4In => ":tx packets v4(in)",
        RxPacketMcIn => ":rx packets multicast(in)",
        TxArpReplyIn => ":tx arp reply(in)",
        TxNaIn => ":tx neighbor adv(in)",
        RxDropAddrV6In => ":rx drop(v6 address/in)",
        RxDropAddrV4In => ":rx drop(v4 address/in)",
        RxDropNoIpIn => ":rx drop(not ip/in)",
        RxDropShortIn => ":rx drop(short/in)",
        RxDropIn => ":rx drop(other/in)",
        RxPacketV6Eg => ":rx packets v6(out)",
        TxPacketV6Eg => ":tx packets v6(out)",
        RxPacketV4Eg => ":rx packets v4(out)",
        TxPacketV4Eg => ":tx packets v4(out)",
        RxPacketMcEg => ":rx packets multicast(out)",
        TxArpReplyEg => ":tx arp reply(out)",
        TxNaEg => ":tx neighbor adv(out)",
        TxProxyArp => ":tx proxy arp(out)",
        TxProxyNa => ":tx proxy neighbor adv(out)",
        RxDropAddrV6Eg => ":rx drop(v6 address/out)",
        RxDropAddrV4Eg => ":rx drop(v4 address/out)",
        RxDropNoIpEg => ":rx drop(not ip/out)",
        RxDropShortEg => ":rx drop(short/out)",
        RxDropEg => ":rx drop(other/out)",
        TxDropMac6 => ":tx drop(mac error v6/out)",
        TxDropMac4 => ":tx drop(mac error v4/out)",
        CmdDumpReq => ":command dump req",
        CmdTrace => ":command event trace ctrl",
        CmdIllegal => ":command illegal request",
    }
}

/// Fixed table of counters indexed by `K`.
#[derive(Debug)]
pub struct StatTable<K: StatKind> {
    counters: Box<[Counter]>,
    _kind: PhantomData<K>,
}

impl<K: StatKind> StatTable<K> {
    pub fn new() -> Self {
        Self {
            counters: K::ALL.iter().map(|_| Counter::new()).collect(),
            _kind: PhantomData,
        }
    }

    #[inline]
    pub fn inc(&self, kind: K) {
        self.counters[kind.index()].inc();
    }

    pub fn get(&self, kind: K) -> u64 {
        self.counters[kind.index()].get()
    }

    /// Exports all counters as label/value pairs, in dump order.
    pub fn export(&self) -> Vec<(&'static str, u64)> {
        K::ALL.iter().map(|k| (k.label(), self.get(*k))).collect()
    }

    /// One line per counter: value right-aligned to ten columns, then label.
    pub fn render(&self, out: &mut String) {
        for (label, value) in self.export() {
            let _ = writeln!(out, "{value:>10}{label}");
        }
    }
}

impl<K: StatKind> Default for StatTable<K> {
    fn default() -> Self {
        Self::new()
    }
}
