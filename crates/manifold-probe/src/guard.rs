//! Server-side request forgery guard for submitted URLs.
//!
//! Applied before probing and before handing a URL to the daemon: the
//! daemon runs inside the trust boundary, so a hostname resolving into
//! private address space must never reach it.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use tokio::net::lookup_host;
use tracing::debug;
use url::Url;

/// Rejection raised by the SSRF guard.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The URL could not be parsed or carries no host.
    #[error("submission url is malformed")]
    MalformedUrl {
        /// The offending URL.
        url: String,
    },
    /// The host resolves into a blocked address range.
    #[error("submission target resolves to a blocked address")]
    BlockedAddress {
        /// Hostname that was resolved.
        host: String,
        /// First blocked address observed.
        address: IpAddr,
    },
}

/// Validate that an HTTP/FTP submission target is routable and public.
///
/// Every resolved address must be acceptable; a single private answer
/// rejects the submission. Lookup failure fails open; the daemon will
/// surface its own resolution error.
///
/// # Errors
///
/// Returns [`GuardError::MalformedUrl`] for unparsable URLs and
/// [`GuardError::BlockedAddress`] when resolution lands in a private,
/// loopback, link-local, reserved, or multicast range.
pub async fn check_submission_target(url: &str) -> Result<(), GuardError> {
    let malformed = || GuardError::MalformedUrl {
        url: url.to_string(),
    };

    let parsed = Url::parse(url).map_err(|_| malformed())?;
    let host = parsed.host_str().ok_or_else(malformed)?.to_string();

    // Literal addresses are checked directly without DNS.
    if let Ok(address) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return if is_blocked(address) {
            Err(GuardError::BlockedAddress { host, address })
        } else {
            Ok(())
        };
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let Ok(addresses) = lookup_host((host.as_str(), port)).await else {
        debug!(host, "hostname did not resolve, leaving rejection to the daemon");
        return Ok(());
    };

    for resolved in addresses {
        let address = resolved.ip();
        if is_blocked(address) {
            return Err(GuardError::BlockedAddress { host: host.clone(), address });
        }
    }
    Ok(())
}

/// Whether an address falls inside a range that must never be fetched on a
/// user's behalf.
#[must_use]
pub(crate) fn is_blocked(address: IpAddr) -> bool {
    match address {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(address: Ipv4Addr) -> bool {
    address.is_unspecified()
        || address.is_loopback()
        || address.is_private()
        || address.is_link_local()
        || address.is_broadcast()
        || address.is_documentation()
        || address.is_multicast()
        // Carrier-grade NAT, 100.64.0.0/10.
        || (address.octets()[0] == 100 && (address.octets()[1] & 0xc0) == 64)
        // 192.0.0.0/24 protocol assignments and 240.0.0.0/4 reserved.
        || (address.octets()[0] == 192 && address.octets()[1] == 0 && address.octets()[2] == 0)
        || address.octets()[0] >= 240
}

fn is_blocked_v6(address: Ipv6Addr) -> bool {
    if let Some(mapped) = address.to_ipv4_mapped() {
        return is_blocked_v4(mapped);
    }
    address.is_unspecified()
        || address.is_loopback()
        || address.is_multicast()
        // fc00::/7 unique local, fe80::/10 link local.
        || (address.segments()[0] & 0xfe00) == 0xfc00
        || (address.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_loopback_is_blocked() {
        let err = check_submission_target("http://127.0.0.1/x").await.unwrap_err();
        assert!(matches!(err, GuardError::BlockedAddress { .. }));

        let err = check_submission_target("http://[::1]/x").await.unwrap_err();
        assert!(matches!(err, GuardError::BlockedAddress { .. }));
    }

    #[tokio::test]
    async fn literal_zero_address_is_blocked() {
        assert!(check_submission_target("http://0.0.0.0/").await.is_err());
    }

    #[tokio::test]
    async fn url_without_host_is_malformed() {
        let err = check_submission_target("not a url").await.unwrap_err();
        assert!(matches!(err, GuardError::MalformedUrl { .. }));
    }

    #[test]
    fn blocked_ranges_cover_private_space() {
        for raw in [
            "10.0.0.1",
            "172.16.5.5",
            "192.168.1.1",
            "169.254.0.10",
            "100.64.0.1",
            "192.0.0.8",
            "240.0.0.1",
            "255.255.255.255",
            "224.0.0.1",
        ] {
            let address: IpAddr = raw.parse().unwrap();
            assert!(is_blocked(address), "{raw} should be blocked");
        }

        for raw in ["93.184.216.34", "1.1.1.1", "2606:4700::1111"] {
            let address: IpAddr = raw.parse().unwrap();
            assert!(!is_blocked(address), "{raw} should be allowed");
        }
    }

    #[test]
    fn v6_local_ranges_are_blocked() {
        for raw in ["fc00::1", "fd12::1", "fe80::1", "ff02::1", "::ffff:10.0.0.1"] {
            let address: IpAddr = raw.parse().unwrap();
            assert!(is_blocked(address), "{raw} should be blocked");
        }
    }
}
