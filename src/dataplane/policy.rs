//! Front translator policy: rules, their cache and the servers they name.

use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::SystemTime;

use tracing::{debug, info};

use super::arena::FlowAddr;
use super::policy_cache::{Admission, Binding, EntryState, PolicyCache};
use super::server_table::{ServerId, ServerStatus, ServerTable};
use crate::capture::InterfaceRecord;
use crate::config::policy::PolicyLine;
use crate::neighbor::{NeighborResolver, RESOLVE_ATTEMPTS};
use crate::protocol::Family;

/// One `source, mask, server` rule.
#[derive(Debug, Clone)]
pub struct Rule<A> {
    /// Source network, already masked
    pub net: A,
    pub mask: A,
    pub server: ServerId,
    /// Packets matched
    pub hit: u32,
    /// Cache entries currently bound through this rule
    pub use_count: u32,
    /// Line as shown in dumps
    pub line: String,
}

/// Rules of one family plus their cache.
#[derive(Debug)]
pub struct FamilyPolicy<A: FlowAddr> {
    rules: Vec<Rule<A>>,
    cache: PolicyCache<A>,
}

impl<A: FlowAddr> Default for FamilyPolicy<A> {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            cache: PolicyCache::new(),
        }
    }
}

impl<A: FlowAddr> FamilyPolicy<A> {
    pub fn rules(&self) -> &[Rule<A>] {
        &self.rules
    }

    pub fn cache(&self) -> &PolicyCache<A> {
        &self.cache
    }

    fn clear(&mut self) {
        self.rules.clear();
        self.cache.reset();
    }

    /// Binding for packets from `src` toward `vip`.
    fn resolve<R>(
        &mut self,
        src: A,
        vip: A,
        servers: &mut ServerTable,
        resolver: &mut R,
        iface: &InterfaceRecord,
    ) -> Option<Binding<A>>
    where
        R: NeighborResolver + ?Sized,
    {
        if let Some(hit) = self.cache.hit(src) {
            if let Some(rule) = self.rules.get_mut(hit.rule) {
                rule.hit = rule.hit.wrapping_add(1);
            }
            if let Some(id) = hit.server {
                let server = servers.get_mut(id);
                server.hit = server.hit.wrapping_add(1);
            }
            return hit.binding;
        }

        // first match wins, even when its server cannot be reached
        let rule_idx = self
            .rules
            .iter()
            .position(|r| src.in_subnet(&r.net, &r.mask))?;
        let server_id = self.rules[rule_idx].server;

        for _ in 0..RESOLVE_ATTEMPTS {
            if servers.get(server_id).status != ServerStatus::Init {
                break;
            }
            servers.resolve(server_id, resolver, iface);
        }

        let server = servers.get_mut(server_id);
        let state = match server.status {
            ServerStatus::Init => {
                debug!(%src, server = %server.addr, "server unresolved");
                return None;
            }
            ServerStatus::Ok => EntryState::Forward,
            ServerStatus::Drop => EntryState::Discard,
        };
        let dst = A::from_ip(server.addr)?;
        let delta = match state {
            EntryState::Forward => A::rewrite_delta(&vip, &dst),
            _ => 0,
        };
        server.hit = server.hit.wrapping_add(1);

        let admission = Admission {
            src,
            dst,
            dst_mac: server.mac,
            state,
            delta,
            rule: rule_idx,
            server: server_id,
        };
        let cached = self.cache.admit(admission, SystemTime::now());

        let rule = &mut self.rules[rule_idx];
        rule.hit = rule.hit.wrapping_add(1);
        if cached {
            rule.use_count += 1;
        }

        match state {
            EntryState::Forward => Some(Binding {
                dst,
                dst_mac: admission.dst_mac,
                delta,
            }),
            _ => None,
        }
    }

    /// One patrol step; returns whether a patrol was pending.
    fn patrol_tick(&mut self) -> bool {
        if !self.cache.patrol_pending() {
            return false;
        }
        let rules = &mut self.rules;
        self.cache.patrol_tick(|e| {
            if let Some(rule) = rules.get_mut(e.rule) {
                rule.use_count = rule.use_count.saturating_sub(1);
            }
        });
        true
    }

    fn render_rules(&self, out: &mut String) {
        for (n, r) in self.rules.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:4}) {} (hit:{} client:{})",
                n + 1,
                r.line,
                r.hit,
                r.use_count
            );
        }
    }
}

/// All policy state owned by the front worker.
#[derive(Debug, Default)]
pub struct PolicyTable {
    v4: FamilyPolicy<Ipv4Addr>,
    v6: FamilyPolicy<Ipv6Addr>,
    servers: ServerTable,
    generation: u64,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every rule, server and cached binding and starts a new
    /// generation.
    pub fn reset(&mut self) {
        self.v4.clear();
        self.v6.clear();
        self.servers.clear();
        self.generation += 1;
    }

    /// Incremented by every [`reset`](Self::reset)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Appends `lines` as rules. Lines of a family the interface does not
    /// carry are skipped. Servers are created as rules name them and
    /// resolved right away.
    pub fn load<R>(&mut self, lines: &[PolicyLine], iface: &InterfaceRecord, resolver: &mut R)
    where
        R: NeighborResolver + ?Sized,
    {
        for line in lines {
            let enabled = match line.family {
                Family::V4 => iface.v4_enable,
                Family::V6 => iface.v6_enable,
            };
            if !enabled {
                info!("policy skipped (interface not available {})", line.family);
                continue;
            }
            let server = self.servers.get_and_resolve(line.server, resolver, iface);
            match line.family {
                Family::V4 => {
                    push_rule(&mut self.v4, line, server);
                    info!("create v4 policy table ({})", line.text);
                }
                Family::V6 => {
                    push_rule(&mut self.v6, line, server);
                    info!("create v6 policy table ({})", line.text);
                }
            }
        }
    }

    pub fn resolve4<R>(
        &mut self,
        src: Ipv4Addr,
        resolver: &mut R,
        iface: &InterfaceRecord,
    ) -> Option<Binding<Ipv4Addr>>
    where
        R: NeighborResolver + ?Sized,
    {
        self.v4
            .resolve(src, iface.vip4, &mut self.servers, resolver, iface)
    }

    pub fn resolve6<R>(
        &mut self,
        src: Ipv6Addr,
        resolver: &mut R,
        iface: &InterfaceRecord,
    ) -> Option<Binding<Ipv6Addr>>
    where
        R: NeighborResolver + ?Sized,
    {
        self.v6
            .resolve(src, iface.vip6, &mut self.servers, resolver, iface)
    }

    pub fn patrol_pending(&self) -> bool {
        self.v4.cache.patrol_pending() || self.v6.cache.patrol_pending()
    }

    /// Advances every pending patrol by one bucket. Returns whether any
    /// was pending.
    pub fn patrol_tick(&mut self) -> bool {
        let v4 = self.v4.patrol_tick();
        let v6 = self.v6.patrol_tick();
        v4 || v6
    }

    pub fn v4(&self) -> &FamilyPolicy<Ipv4Addr> {
        &self.v4
    }

    pub fn v6(&self) -> &FamilyPolicy<Ipv6Addr> {
        &self.v6
    }

    pub fn servers(&self) -> &ServerTable {
        &self.servers
    }

    /// Cached clients, IPv6 first.
    pub fn render_clients(&self, out: &mut String) {
        out.push_str("IPv6\n");
        self.v6.cache.render(out);
        out.push_str("IPv4\n");
        self.v4.cache.render(out);
    }

    /// Rules with their counters, IPv6 first.
    pub fn render_rules(&self, out: &mut String) {
        out.push_str("IPv6\n");
        self.v6.render_rules(out);
        out.push_str("IPv4\n");
        self.v4.render_rules(out);
    }

    pub fn render_servers(&self, out: &mut String) {
        self.servers.render(out);
    }
}

fn push_rule<A: FlowAddr>(policy: &mut FamilyPolicy<A>, line: &PolicyLine, server: ServerId) {
    let (Some(net), Some(mask)) = (A::from_ip(line.source), A::from_ip(line.mask)) else {
        return;
    };
    policy.rules.push(Rule {
        net: net.masked(&mask),
        mask,
        server,
        hit: 0,
        use_count: 0,
        line: line.text.clone(),
    });
}
