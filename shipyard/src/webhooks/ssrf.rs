//! Outbound URL screening

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use ipnet::{Ipv4Net, Ipv6Net};
use url::{Host, Url};

use crate::errors::ControlError;

static BLOCKED_V4: LazyLock<Vec<Ipv4Net>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",      // unspecified / "this network"
        "10.0.0.0/8",     // RFC1918
        "100.64.0.0/10",  // carrier-grade NAT
        "127.0.0.0/8",    // loopback
        "169.254.0.0/16", // link-local, cloud metadata
        "172.16.0.0/12",  // RFC1918
        "192.168.0.0/16", // RFC1918
        "255.255.255.255/32",
    ]
    .iter()
    .map(|net| net.parse().expect("Invalid network literal"))
    .collect()
});

static BLOCKED_V6: LazyLock<Vec<Ipv6Net>> = LazyLock::new(|| {
    [
        "::/128",    // unspecified
        "::1/128",   // loopback
        "fc00::/7",  // unique local
        "fe80::/10", // link-local
    ]
    .iter()
    .map(|net| net.parse().expect("Invalid network literal"))
    .collect()
});

const BLOCKED_HOST_WORDS: &[&str] = &["internal", "intranet", "corp", "private", "metadata"];

fn blocked_v4(ip: Ipv4Addr) -> bool {
    BLOCKED_V4.iter().any(|net| net.contains(&ip))
}

fn blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return blocked_v4(mapped);
    }
    BLOCKED_V6.iter().any(|net| net.contains(&ip))
}

pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => blocked_v4(v4),
        IpAddr::V6(v6) => blocked_v6(v6),
    }
}

fn blocked_hostname(host: &str) -> Option<&'static str> {
    let host = host.trim_end_matches('.').to_lowercase();
    if host == "localhost" || host.ends_with(".localhost") {
        return Some("localhost");
    }
    BLOCKED_HOST_WORDS
        .iter()
        .find(|word| host.contains(*word))
        .copied()
}

/// Parse `raw` and reject URLs that point at the control plane's own
/// network. Hostnames are judged by name; they are not resolved.
pub fn screen_url(raw: &str) -> Result<Url, ControlError> {
    let url = Url::parse(raw)
        .map_err(|e| ControlError::SsrfBlocked(format!("{}: invalid URL ({})", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ControlError::SsrfBlocked(format!(
            "{}: scheme {} is not allowed",
            raw,
            url.scheme()
        )));
    }

    match url.host() {
        None => Err(ControlError::SsrfBlocked(format!("{}: missing host", raw))),
        Some(Host::Ipv4(ip)) if blocked_v4(ip) => Err(ControlError::SsrfBlocked(format!(
            "{}: address {} is private or reserved",
            raw, ip
        ))),
        Some(Host::Ipv6(ip)) if blocked_v6(ip) => Err(ControlError::SsrfBlocked(format!(
            "{}: address {} is private or reserved",
            raw, ip
        ))),
        Some(Host::Domain(domain)) => match blocked_hostname(domain) {
            Some(reason) => Err(ControlError::SsrfBlocked(format!(
                "{}: hostname matches {}",
                raw, reason
            ))),
            None => Ok(url),
        },
        Some(_) => Ok(url),
    }
}
