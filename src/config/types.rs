//! Configuration types

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::properties::*;
use crate::telemetry::LogConfig;

pub const DEFAULT_UD_FILE: &str = "/dev/shm/.sasat";
pub const DEFAULT_PID_FILE: &str = "/var/run/sasat.pid";
pub const DEFAULT_LOG_DIR: &str = "/var/opt/sasat/log/";
pub const DEFAULT_POLICY_FILE: &str = "/var/opt/sasat/etc/sasat.policy";
pub const DEFAULT_GARP_INTERVAL: u64 = 40;

/// Which translator a process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Front,
    Backend,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Front => write!(f, "front"),
            Role::Backend => write!(f, "backend"),
        }
    }
}

/// Daemon configuration (TOML, or converted from a property file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Translate for the configured virtual addresses instead of the
    /// interfaces' own
    pub vip_mode: bool,
    pub ud_file: PathBuf,
    pub pid_file: PathBuf,
    pub log_dir: PathBuf,
    pub policy_file: PathBuf,
    pub garp_interval_secs: u64,
    pub ingress: InterfaceConfig,
    pub egress: InterfaceConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

/// One side of a translator. Addresses are kept as written; an address
/// that does not parse disables its family at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub ifname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip6: Option<String>,
}

impl InterfaceConfig {
    fn named(ifname: &str) -> Self {
        Self {
            ifname: ifname.to_string(),
            ip4: None,
            ip6: None,
        }
    }
}

/// Real address of the server behind a backend translator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip6: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vip_mode: true,
            ud_file: PathBuf::from(DEFAULT_UD_FILE),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            policy_file: PathBuf::from(DEFAULT_POLICY_FILE),
            garp_interval_secs: DEFAULT_GARP_INTERVAL,
            ingress: InterfaceConfig::named("eth0"),
            egress: InterfaceConfig::named("eth1"),
            server: ServerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Builds a configuration from property-file keys; keys the property
    /// format has no name for keep their defaults.
    pub fn from_properties(props: &Properties) -> Self {
        let mut config = Config::default();
        let get = |key: &str| props.get(key).map(str::to_string);

        if let Some(name) = get(KEY_IFNAME_INGRESS) {
            config.ingress.ifname = name;
        }
        if let Some(name) = get(KEY_IFNAME_EGRESS) {
            config.egress.ifname = name;
        }
        if let Some(path) = get(KEY_UD_FILE) {
            config.ud_file = PathBuf::from(path);
        }
        config.vip_mode = props.get_property_int(KEY_VIP_MODE) == 1;
        config.ingress.ip4 = get(KEY_VIP4);
        config.ingress.ip6 = get(KEY_VIP6);
        config.egress.ip4 = get(KEY_EGRESS_IP4);
        config.egress.ip6 = get(KEY_EGRESS_IP6);
        config.server.ip4 = get(KEY_SVR_IP4);
        config.server.ip6 = get(KEY_SVR_IP6);
        config
    }
}

impl PropertyProvider for Config {
    fn get_property(&self, key: &str) -> Option<String> {
        let path = |p: &PathBuf| Some(p.display().to_string());
        match key {
            "vip_mode" => Some(u8::from(self.vip_mode).to_string()),
            "ud_file" => path(&self.ud_file),
            "pid_file" => path(&self.pid_file),
            "log_dir" => path(&self.log_dir),
            "policy_file" => path(&self.policy_file),
            "garp_interval_secs" => Some(self.garp_interval_secs.to_string()),
            "in.ifname" => Some(self.ingress.ifname.clone()),
            "in.ip4" => self.ingress.ip4.clone(),
            "in.ip6" => self.ingress.ip6.clone(),
            "eg.ifname" => Some(self.egress.ifname.clone()),
            "eg.ip4" => self.egress.ip4.clone(),
            "eg.ip6" => self.egress.ip6.clone(),
            "svr.ip4" => self.server.ip4.clone(),
            "svr.ip6" => self.server.ip6.clone(),
            "log.level" => Some(self.log.level.clone()),
            "log.format" => Some(self.log.format.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_properties() {
        let props = Properties::parse(
            "in.ifname=ens1\neg.ifname=ens2\nvip_mode=1\nin.ip4=192.0.2.10\nsvr.ip4=10.0.0.5\n",
        );
        let config = Config::from_properties(&props);
        assert!(config.vip_mode);
        assert_eq!(config.ingress.ifname, "ens1");
        assert_eq!(config.egress.ifname, "ens2");
        assert_eq!(config.ingress.ip4.as_deref(), Some("192.0.2.10"));
        assert_eq!(config.server.ip4.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.server.ip6, None);
        assert_eq!(config.garp_interval_secs, DEFAULT_GARP_INTERVAL);
    }

    #[test]
    fn test_vip_mode_only_when_one() {
        let config = Config::from_properties(&Properties::parse("vip_mode=2\n"));
        assert!(!config.vip_mode);
        let config = Config::from_properties(&Properties::default());
        assert!(!config.vip_mode);
    }

    #[test]
    fn test_toml_roundtrip_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            vip_mode = false
            [ingress]
            ifname = "eth3"
            ip6 = "2001:db8::1"
            [log]
            level = "debug"
            "#,
        )
        .unwrap();
        assert!(!config.vip_mode);
        assert_eq!(config.ingress.ifname, "eth3");
        assert_eq!(config.egress.ifname, "eth1");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "pretty");
        assert_eq!(config.pid_file, PathBuf::from(DEFAULT_PID_FILE));

        let text = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_property_provider_by_key() {
        let config = Config::default();
        assert_eq!(config.get_property("in.ifname").as_deref(), Some("eth0"));
        assert_eq!(config.get_property_int("vip_mode"), 1);
        assert_eq!(config.get_property_int("garp_interval_secs"), 40);
        assert_eq!(config.get_property("svr.ip4"), None);
        assert_eq!(config.get_property("nope"), None);
    }
}
