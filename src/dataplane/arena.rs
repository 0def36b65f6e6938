//! Fixed-capacity slot arena with hash chains and a free list.
//!
//! Every slot is either on the free list or linked into exactly one hash
//! bucket; [`Link`] records which. Allocation pops the free-list head,
//! eviction pushes to its tail.

use std::collections::VecDeque;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::protocol::addr::{hash4, hash6, in_subnet4, in_subnet6};
use crate::protocol::checksum::checksum_delta;
use crate::protocol::Family;

/// Where a slot currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Free,
    /// Taken from the free list, not linked yet
    Detached,
    Bucket(usize),
}

#[derive(Debug, Clone)]
struct Slot<T> {
    value: T,
    link: Link,
}

#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    buckets: Vec<VecDeque<usize>>,
    free: VecDeque<usize>,
}

impl<T: Default> Arena<T> {
    /// `buckets` must be a power of two.
    pub fn new(capacity: usize, buckets: usize) -> Self {
        debug_assert!(buckets.is_power_of_two());
        let slots = (0..capacity)
            .map(|_| Slot {
                value: T::default(),
                link: Link::Free,
            })
            .collect();
        Self {
            slots,
            buckets: vec![VecDeque::new(); buckets],
            free: (0..capacity).collect(),
        }
    }

    /// Wipes every slot and relinks all of them to the free list.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.value = T::default();
            slot.link = Link::Free;
        }
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.free = (0..self.slots.len()).collect();
    }
}

impl<T> Arena<T> {
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Mask applied to address hashes
    pub fn mask(&self) -> u32 {
        (self.buckets.len() - 1) as u32
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn find<F>(&self, bucket: usize, mut pred: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        self.buckets[bucket]
            .iter()
            .copied()
            .find(|&i| pred(&self.slots[i].value))
    }

    /// Takes the free-list head.
    pub fn alloc(&mut self) -> Option<usize> {
        let idx = self.free.pop_front()?;
        self.slots[idx].link = Link::Detached;
        Some(idx)
    }

    /// Links a detached slot at the head of `bucket`.
    pub fn link(&mut self, idx: usize, bucket: usize) {
        debug_assert_eq!(self.slots[idx].link, Link::Detached);
        self.buckets[bucket].push_front(idx);
        self.slots[idx].link = Link::Bucket(bucket);
    }

    /// Moves every slot of `bucket` to the free-list tail, calling
    /// `on_evict` on each. Returns how many were moved.
    pub fn evict_bucket<F>(&mut self, bucket: usize, mut on_evict: F) -> usize
    where
        F: FnMut(&mut T),
    {
        let chain = std::mem::take(&mut self.buckets[bucket]);
        let n = chain.len();
        for idx in chain {
            on_evict(&mut self.slots[idx].value);
            self.slots[idx].link = Link::Free;
            self.free.push_back(idx);
        }
        n
    }

    pub fn is_bucket_empty(&self, bucket: usize) -> bool {
        self.buckets[bucket].is_empty()
    }

    pub fn link_of(&self, idx: usize) -> Link {
        self.slots[idx].link
    }

    pub fn get(&self, idx: usize) -> &T {
        &self.slots[idx].value
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        &mut self.slots[idx].value
    }

    /// All slots in storage order, linked or not.
    pub fn slots(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|s| &s.value)
    }
}

/// Address type of a per-family table.
pub trait FlowAddr: Copy + Eq + fmt::Display + fmt::Debug + Send + 'static {
    const FAMILY: Family;
    const UNSPECIFIED: Self;

    fn bucket(&self, mask: u32) -> usize;

    fn in_subnet(&self, net: &Self, mask: &Self) -> bool;

    /// `self & mask`
    fn masked(&self, mask: &Self) -> Self;

    /// Header checksum delta for rewriting `from` into `to`; IPv6 has no
    /// header checksum.
    fn rewrite_delta(from: &Self, to: &Self) -> u16;

    fn from_ip(ip: IpAddr) -> Option<Self>;

    fn into_ip(self) -> IpAddr;
}

impl FlowAddr for Ipv4Addr {
    const FAMILY: Family = Family::V4;
    const UNSPECIFIED: Self = Ipv4Addr::UNSPECIFIED;

    fn bucket(&self, mask: u32) -> usize {
        hash4(self, mask)
    }

    fn in_subnet(&self, net: &Self, mask: &Self) -> bool {
        in_subnet4(self, net, mask)
    }

    fn masked(&self, mask: &Self) -> Self {
        Ipv4Addr::from(u32::from(*self) & u32::from(*mask))
    }

    fn rewrite_delta(from: &Self, to: &Self) -> u16 {
        checksum_delta(*from, *to)
    }

    fn from_ip(ip: IpAddr) -> Option<Self> {
        match ip {
            IpAddr::V4(a) => Some(a),
            IpAddr::V6(_) => None,
        }
    }

    fn into_ip(self) -> IpAddr {
        IpAddr::V4(self)
    }
}

impl FlowAddr for Ipv6Addr {
    const FAMILY: Family = Family::V6;
    const UNSPECIFIED: Self = Ipv6Addr::UNSPECIFIED;

    fn bucket(&self, mask: u32) -> usize {
        hash6(self, mask)
    }

    fn in_subnet(&self, net: &Self, mask: &Self) -> bool {
        in_subnet6(self, net, mask)
    }

    fn masked(&self, mask: &Self) -> Self {
        Ipv6Addr::from(u128::from(*self) & u128::from(*mask))
    }

    fn rewrite_delta(_from: &Self, _to: &Self) -> u16 {
        0
    }

    fn from_ip(ip: IpAddr) -> Option<Self> {
        match ip {
            IpAddr::V6(a) => Some(a),
            IpAddr::V4(_) => None,
        }
    }

    fn into_ip(self) -> IpAddr {
        IpAddr::V6(self)
    }
}
