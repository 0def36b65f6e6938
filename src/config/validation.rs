//! Configuration validation

use std::net::{Ipv4Addr, Ipv6Addr};

use super::{Config, Role};

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration for `role` and return warnings/errors
pub fn validate(config: &Config, role: Role) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_interfaces(config, role, &mut result);
    if config.vip_mode {
        validate_virtual_addresses(config, role, &mut result);
    }
    if role == Role::Backend {
        validate_server(config, &mut result);
    }
    if config.garp_interval_secs == 0 {
        result.warn("garp_interval_secs: 0 sends a gratuitous ARP every second");
    }

    result
}

fn check_v4(field: &str, value: &Option<String>, result: &mut ValidationResult) -> bool {
    match value {
        None => false,
        Some(s) if s.parse::<Ipv4Addr>().is_ok() => true,
        Some(s) => {
            result.error(format!("{field}: '{s}' is not an IPv4 address"));
            false
        }
    }
}

fn check_v6(field: &str, value: &Option<String>, result: &mut ValidationResult) -> bool {
    match value {
        None => false,
        Some(s) if s.parse::<Ipv6Addr>().is_ok() => true,
        Some(s) => {
            result.error(format!("{field}: '{s}' is not an IPv6 address"));
            false
        }
    }
}

fn validate_interfaces(config: &Config, role: Role, result: &mut ValidationResult) {
    if config.ingress.ifname.is_empty() {
        result.error("ingress.ifname: interface name is empty");
    }
    if role == Role::Backend {
        if config.egress.ifname.is_empty() {
            result.error("egress.ifname: interface name is empty");
        }
        if config.ingress.ifname == config.egress.ifname {
            result.error(format!(
                "ingress and egress use the same interface '{}'",
                config.ingress.ifname
            ));
        }
    }
}

fn validate_virtual_addresses(config: &Config, role: Role, result: &mut ValidationResult) {
    let v4 = check_v4("ingress.ip4", &config.ingress.ip4, result);
    let v6 = check_v6("ingress.ip6", &config.ingress.ip6, result);
    if !v4 && !v6 {
        result.warn("vip_mode: no virtual address on ingress, nothing will be translated");
    }

    if role == Role::Backend {
        let v4 = check_v4("egress.ip4", &config.egress.ip4, result);
        let v6 = check_v6("egress.ip6", &config.egress.ip6, result);
        if !v4 && !v6 {
            result.warn("vip_mode: no virtual address on egress");
        }
    }
}

fn validate_server(config: &Config, result: &mut ValidationResult) {
    let v4 = check_v4("server.ip4", &config.server.ip4, result);
    let v6 = check_v6("server.ip6", &config.server.ip6, result);
    if !v4 && !v6 {
        result.error("server: backend translator requires a server address");
    }
}
