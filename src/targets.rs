use ipnet::{IpNet, Ipv4Net};
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{EngineError, EngineResult};

/// Widest IPv4 range a single bulk target may expand to.
const MIN_CIDR_PREFIX: u8 = 16;

/// Normalise a user-supplied probe target: an IP literal or a DNS hostname.
pub fn validate_host(raw: &str) -> EngineResult<String> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(EngineError::InvalidTarget(raw.to_string()));
    }
    if t.parse::<IpAddr>().is_ok() || is_hostname(t) {
        Ok(t.to_string())
    } else {
        Err(EngineError::InvalidTarget(raw.to_string()))
    }
}

/// RFC 1123 style hostname. Dotted all-numeric strings must be real IPv4
/// addresses, so `10.0.0` and `300.1.1.1` are rejected.
fn is_hostname(s: &str) -> bool {
    let s = s.strip_suffix('.').unwrap_or(s);
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = s.split('.').collect();
    let label_ok = |l: &&str| {
        !l.is_empty()
            && l.len() <= 63
            && !l.starts_with('-')
            && !l.ends_with('-')
            && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if !labels.iter().all(label_ok) {
        return false;
    }
    !labels.iter().all(|l| l.chars().all(|c| c.is_ascii_digit()))
}

/// Expand bulk target specs: plain hosts pass through validated, IPv4 CIDRs
/// become their host addresses (network and broadcast excluded).
pub fn expand_targets(specs: &[String]) -> EngineResult<Vec<String>> {
    let mut out = Vec::new();
    for spec in specs {
        let s = spec.trim();
        if s.contains('/') {
            let net: IpNet = s
                .parse()
                .map_err(|_| EngineError::InvalidTarget(spec.clone()))?;
            out.extend(expand_cidr(net)?.into_iter().map(|ip| ip.to_string()));
        } else {
            out.push(validate_host(s)?);
        }
    }
    Ok(out)
}

fn expand_cidr(net: IpNet) -> EngineResult<Vec<Ipv4Addr>> {
    match net {
        IpNet::V4(n4) if n4.prefix_len() < MIN_CIDR_PREFIX => {
            Err(EngineError::InvalidTarget(format!("{net} is too large")))
        }
        IpNet::V4(n4) => Ok(ipv4_hosts(n4)),
        IpNet::V6(_) => Err(EngineError::InvalidTarget(format!(
            "{net}: IPv6 ranges are not expanded"
        ))),
    }
}

fn ipv4_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    match net.prefix_len() {
        32 => vec![net.network()],
        31 => vec![Ipv4Addr::from(start), Ipv4Addr::from(end)],
        _ => (start + 1..end).map(Ipv4Addr::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ips_and_hostnames() {
        assert_eq!(validate_host(" 192.168.1.1 ").unwrap(), "192.168.1.1");
        assert!(validate_host("::1").is_ok());
        assert!(validate_host("printer-2.office.lan").is_ok());
        assert!(validate_host("example.com.").is_ok());
    }

    #[test]
    fn rejects_malformed_targets() {
        for bad in ["", "   ", "10.0.0", "300.1.1.1", "-bad.host", "has space", "a..b"] {
            assert!(
                matches!(validate_host(bad), Err(EngineError::InvalidTarget(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn cidr_expands_to_hosts() {
        let ips = expand_targets(&["10.0.0.0/30".to_string(), "gw.lan".to_string()]).unwrap();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2", "gw.lan"]);
    }

    #[test]
    fn single_host_cidr() {
        let ips = expand_targets(&["10.1.1.7/32".to_string()]).unwrap();
        assert_eq!(ips, vec!["10.1.1.7"]);
    }

    #[test]
    fn oversized_and_v6_ranges_rejected() {
        assert!(expand_targets(&["10.0.0.0/8".to_string()]).is_err());
        assert!(expand_targets(&["fe80::/64".to_string()]).is_err());
        assert!(expand_targets(&["10.0.0.0/33".to_string()]).is_err());
    }
}
