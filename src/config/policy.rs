//! Front translator policy file.
//!
//! One rule per line, `source, mask, server`, all of the same family:
//!
//! ```text
//! [v4]
//! 10.0.0.0,     255.0.0.0,     192.168.1.10
//! 2001:db8::,   ffff:ffff::,   2001:db8:1::10
//! ```
//!
//! Lines starting with `#` or `[` are ignored, as are blank lines. Rules
//! keep file order; the first match wins.

use std::net::IpAddr;
use std::path::Path;

use tracing::info;

use crate::protocol::Family;
use crate::{Error, Result};

/// A parsed rule line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyLine {
    pub family: Family,
    pub source: IpAddr,
    pub mask: IpAddr,
    pub server: IpAddr,
    /// Normalised text of the line, shown in dumps
    pub text: String,
}

/// Textual family guess: anything with a colon is IPv6, digits with up to
/// three dots are IPv4.
fn guess_family(part: &str) -> Option<Family> {
    if part.contains(':') {
        return Some(Family::V6);
    }
    let mut dots = 0;
    for c in part.chars() {
        match c {
            '0'..='9' => {}
            '.' if dots < 3 => dots += 1,
            _ => return None,
        }
    }
    Some(Family::V4)
}

fn parse_addr(part: &str, family: Family) -> Option<IpAddr> {
    let addr: IpAddr = part.parse().ok()?;
    match (family, addr) {
        (Family::V4, IpAddr::V4(_)) | (Family::V6, IpAddr::V6(_)) => Some(addr),
        _ => None,
    }
}

/// Parses one rule line, logging why it is rejected.
pub fn parse_line(line: &str) -> Option<PolicyLine> {
    let mut parts: Vec<&str> = Vec::with_capacity(3);
    for field in line.splitn(3, ',') {
        let field = field.trim_start();
        let end = field.find([' ', '\t']).unwrap_or(field.len());
        parts.push(&field[..end]);
    }

    let mut family = None;
    for part in &parts {
        let Some(f) = guess_family(part) else {
            info!("policy family error? ({part})");
            return None;
        };
        match family {
            None => family = Some(f),
            Some(first) if first != f => {
                info!("policy family mismatch ({}/{})", parts[0], part);
                return None;
            }
            Some(_) => {}
        }
    }
    let family = family?;

    if parts.len() < 3 {
        info!("policy format error ({line})");
        return None;
    }

    let (Some(source), Some(mask), Some(server)) = (
        parse_addr(parts[0], family),
        parse_addr(parts[1], family),
        parse_addr(parts[2], family),
    ) else {
        info!("policy address error ({line})");
        return None;
    };

    Some(PolicyLine {
        family,
        source,
        mask,
        server,
        text: format!("{}, {}, {}", parts[0], parts[1], parts[2]),
    })
}

/// Parses a whole policy file body.
pub fn parse(text: &str) -> Vec<PolicyLine> {
    text.lines()
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('['))
        .filter_map(parse_line)
        .collect()
}

pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<PolicyLine>> {
    let text = std::fs::read_to_string(path).map_err(Error::Io)?;
    Ok(parse(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_guess_family() {
        assert_eq!(guess_family("10.0.0.1"), Some(Family::V4));
        assert_eq!(guess_family("2001:db8::1"), Some(Family::V6));
        assert_eq!(guess_family("1.2.3.4.5"), None);
        assert_eq!(guess_family("host"), None);
    }

    #[test]
    fn test_parse_v4_line() {
        let line = parse_line("  10.0.0.0 , 255.0.0.0,192.168.1.10 # web").unwrap();
        assert_eq!(line.family, Family::V4);
        assert_eq!(line.source, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)));
        assert_eq!(line.mask, IpAddr::V4(Ipv4Addr::new(255, 0, 0, 0)));
        assert_eq!(line.server, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(line.text, "10.0.0.0, 255.0.0.0, 192.168.1.10");
    }

    #[test]
    fn test_parse_v6_line() {
        let line = parse_line("2001:db8::, ffff:ffff::, 2001:db8:1::10").unwrap();
        assert_eq!(line.family, Family::V6);
        assert_eq!(
            line.server,
            IpAddr::V6("2001:db8:1::10".parse::<Ipv6Addr>().unwrap())
        );
    }

    #[test]
    fn test_rejects_bad_lines() {
        assert!(parse_line("10.0.0.0, ffff::, 192.168.1.1").is_none());
        assert!(parse_line("10.0.0.0, 255.0.0.0").is_none());
        assert!(parse_line("example.com, 255.0.0.0, 10.0.0.1").is_none());
        assert!(parse_line("10.0.0.300, 255.0.0.0, 10.0.0.1").is_none());
    }

    #[test]
    fn test_parse_skips_comments_and_sections() {
        let rules = parse(
            "# policy\n[v4]\n\n10.0.0.0,255.0.0.0,192.168.1.10\n10.1.0.0,255.255.0.0,192.168.1.11\nbogus\n",
        );
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].text, "10.1.0.0, 255.255.0.0, 192.168.1.11");
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sasat.policy");
        std::fs::write(&path, "0.0.0.0, 0.0.0.0, 0.0.0.0\n").unwrap();
        let rules = load(&path).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(load(dir.path().join("missing")).is_err());
    }
}
