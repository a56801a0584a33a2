//! Target address parsing and validation.

use crate::error::{GeoError, GeoResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::net::lookup_host;

/// Resolve a target given as IP literal or hostname to one routable address.
///
/// Hostnames go through the system resolver; IPv4 answers are preferred.
pub async fn resolve_target(input: &str) -> GeoResult<IpAddr> {
    let input = input.trim();
    if input.is_empty() {
        return Err(GeoError::InvalidTarget("empty target".into()));
    }

    let ip = match input.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) => {
            let addrs: Vec<IpAddr> = lookup_host(format!("{input}:0"))
                .await
                .map_err(|e| GeoError::InvalidTarget(format!("cannot resolve {input}: {e}")))?
                .map(|a| a.ip())
                .collect();
            addrs
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
                .ok_or_else(|| GeoError::InvalidTarget(format!("no addresses found for {input}")))?
        }
    };

    ensure_routable(ip)?;
    Ok(ip)
}

/// Reject addresses that no public probe could ever reach.
pub fn ensure_routable(ip: IpAddr) -> GeoResult<()> {
    let private = match ip {
        IpAddr::V4(v4) => is_non_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_non_public_v4(v4),
            None => is_non_public_v6(v6),
        },
    };
    if private {
        return Err(GeoError::InvalidTarget(format!(
            "{ip} is not a publicly routable address"
        )));
    }
    Ok(())
}

fn is_non_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0 // "this network"
        || a >= 240 // reserved
        || (a == 100 && (b & 0xc0) == 64) // shared address space (CGNAT)
        || (a == 198 && (b & 0xfe) == 18) // benchmarking
}

fn is_non_public_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link local
        || (first == 0x2001 && ip.segments()[1] == 0x0db8) // documentation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_public_literals() {
        assert_eq!(
            resolve_target(" 8.8.8.8 ").await.unwrap(),
            "8.8.8.8".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolve_target("2606:4700:4700::1111").await.unwrap(),
            "2606:4700:4700::1111".parse::<IpAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn rejects_empty_and_private_targets() {
        for bad in ["", "127.0.0.1", "10.1.2.3", "192.168.0.1", "169.254.1.1", "::1", "fd00::1", "fe80::1", "::ffff:10.0.0.1"] {
            assert!(
                matches!(resolve_target(bad).await, Err(GeoError::InvalidTarget(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn documentation_ranges_are_not_routable() {
        assert!(ensure_routable("198.51.100.7".parse().unwrap()).is_err());
        assert!(ensure_routable("2001:db8::1".parse().unwrap()).is_err());
        assert!(ensure_routable("1.1.1.1".parse().unwrap()).is_ok());
    }

    #[test]
    fn reserved_v4_ranges_are_not_routable() {
        for bad in ["100.64.0.1", "100.127.255.254", "0.1.2.3", "240.0.0.1", "255.255.255.255", "198.18.0.1"] {
            assert!(ensure_routable(bad.parse().unwrap()).is_err(), "{bad} should be rejected");
        }
        for ok in ["100.63.255.255", "100.128.0.1", "223.255.255.1", "198.20.0.1"] {
            assert!(ensure_routable(ok.parse().unwrap()).is_ok(), "{ok} should be accepted");
        }
    }
}
