//! `key=value` property files.
//!
//! ```text
//! # front translator
//! in.ifname=eth0
//! vip_mode=1
//! in.ip4= 192.0.2.1
//! ```

use std::path::Path;

use tracing::info;

use super::Role;
use crate::{Error, Result};

pub const DEFAULT_PROPERTY_FILE: &str = "/var/opt/sasat/etc/sasat.conf";

pub const KEY_IFNAME_INGRESS: &str = "in.ifname";
pub const KEY_IFNAME_EGRESS: &str = "eg.ifname";
pub const KEY_UD_FILE: &str = "ud_file";
pub const KEY_VIP_MODE: &str = "vip_mode";
pub const KEY_VIP4: &str = "in.ip4";
pub const KEY_VIP6: &str = "in.ip6";
pub const KEY_EGRESS_IP4: &str = "eg.ip4";
pub const KEY_EGRESS_IP6: &str = "eg.ip6";
pub const KEY_SVR_IP4: &str = "svr.ip4";
pub const KEY_SVR_IP6: &str = "svr.ip6";

/// Read access to configuration by dotted key.
pub trait PropertyProvider {
    fn get_property(&self, key: &str) -> Option<String>;

    /// Leading decimal digits of the value, 0 when missing or not numeric.
    fn get_property_int(&self, key: &str) -> i64 {
        self.get_property(key)
            .map(|v| leading_int(&v))
            .unwrap_or(0)
    }
}

/// Parsed property file. Later definitions of a key win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    /// Parses property text. Malformed lines are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut props = Self::default();
        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                info!("init anycast prop def error({line})");
                continue;
            };
            if key.is_empty() {
                info!("anycast prop parse error({line})");
                continue;
            }
            props.set(key, value.trim_start_matches([' ', '\t']).trim_end());
        }
        props
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(Error::Io)?;
        Ok(Self::parse(&text))
    }

    /// Loads `path`, falling back to the built-in defaults of `role` when
    /// the file can not be read.
    pub fn load_or_defaults<P: AsRef<Path>>(path: P, role: Role) -> Self {
        match Self::load(path) {
            Ok(props) => props,
            Err(_) => {
                info!("property file not found");
                Self::defaults(role)
            }
        }
    }

    pub fn defaults(role: Role) -> Self {
        let mut props = Self::default();
        props.set(KEY_IFNAME_INGRESS, "eth0");
        if role == Role::Backend {
            props.set(KEY_IFNAME_EGRESS, "eth1");
        }
        props.set(KEY_UD_FILE, super::types::DEFAULT_UD_FILE);
        props.set(KEY_VIP_MODE, "1");
        props
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl PropertyProvider for Properties {
    fn get_property(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }
}

/// `strtol(s, NULL, 10)`: optional sign, then digits, anything else stops.
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (neg, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let n = digits[..end].parse::<i64>().unwrap_or(0);
    if neg {
        -n
    } else {
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_properties() {
        let props = Properties::parse(
            "# comment\n\nin.ifname=eth2\nvip_mode= 0\nbroken line\n=novalue\nin.ip4=\t192.0.2.1  \n",
        );
        assert_eq!(props.get("in.ifname"), Some("eth2"));
        assert_eq!(props.get("in.ip4"), Some("192.0.2.1"));
        assert_eq!(props.get_property_int("vip_mode"), 0);
        assert_eq!(props.get("broken line"), None);
        assert_eq!(props.get(""), None);
    }

    #[test]
    fn test_later_definition_wins() {
        let props = Properties::parse("vip_mode=1\nvip_mode=0\n");
        assert_eq!(props.get_property_int("vip_mode"), 0);
    }

    #[test]
    fn test_get_property_int() {
        let props = Properties::parse("a=42\nb=17abc\nc=xyz\nd=-3\n");
        assert_eq!(props.get_property_int("a"), 42);
        assert_eq!(props.get_property_int("b"), 17);
        assert_eq!(props.get_property_int("c"), 0);
        assert_eq!(props.get_property_int("d"), -3);
        assert_eq!(props.get_property_int("missing"), 0);
    }

    #[test]
    fn test_defaults_per_role() {
        let front = Properties::defaults(Role::Front);
        assert_eq!(front.get(KEY_IFNAME_INGRESS), Some("eth0"));
        assert_eq!(front.get(KEY_IFNAME_EGRESS), None);
        assert_eq!(front.get(KEY_UD_FILE), Some("/dev/shm/.sasat"));
        assert_eq!(front.get_property_int(KEY_VIP_MODE), 1);

        let back = Properties::defaults(Role::Backend);
        assert_eq!(back.get(KEY_IFNAME_EGRESS), Some("eth1"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let props = Properties::load_or_defaults(dir.path().join("none.conf"), Role::Backend);
        assert_eq!(props, Properties::defaults(Role::Backend));
    }
}
