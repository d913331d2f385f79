//! Well-known internal address ranges.

use std::net::IpAddr;
use std::sync::LazyLock;

use ipnet::IpNet;

// ============================================================================
// CIDR Defaults
// ============================================================================

const LOOPBACK_CIDRS: &[&str] = &[
    "127.0.0.0/8", // IPv4 loopback
    "::1/128",     // IPv6 loopback
];

/// RFC1918 + RFC4193.
const PRIVATE_CIDRS: &[&str] = &[
    "10.0.0.0/8",     // RFC1918 Class A
    "172.16.0.0/12",  // RFC1918 Class B
    "192.168.0.0/16", // RFC1918 Class C
    "fc00::/7",       // IPv6 Unique Local Addresses (ULA)
];

const LINK_LOCAL_CIDRS: &[&str] = &[
    "169.254.0.0/16", // IPv4 link-local
    "fe80::/10",      // IPv6 link-local
];

static LOOPBACK_NETS: LazyLock<Vec<IpNet>> = LazyLock::new(|| parse_cidr_list(LOOPBACK_CIDRS));
static PRIVATE_NETS: LazyLock<Vec<IpNet>> = LazyLock::new(|| parse_cidr_list(PRIVATE_CIDRS));
static LINK_LOCAL_NETS: LazyLock<Vec<IpNet>> = LazyLock::new(|| parse_cidr_list(LINK_LOCAL_CIDRS));

fn parse_cidr_list(cidrs: &[&str]) -> Vec<IpNet> {
    cidrs
        .iter()
        .filter_map(|s| s.parse::<IpNet>().ok())
        .collect()
}

fn ip_in_any_cidr(ip: IpAddr, cidrs: &[IpNet]) -> bool {
    cidrs.iter().any(|net| net.contains(&ip))
}

/// Map IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) to IPv4.
#[must_use]
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    ip.to_canonical()
}

#[must_use]
pub fn is_loopback(ip: IpAddr) -> bool {
    ip_in_any_cidr(canonical_ip(ip), &LOOPBACK_NETS)
}

/// Check if an IP address is in a private range (RFC1918/RFC4193).
#[must_use]
pub fn is_private_range(ip: IpAddr) -> bool {
    ip_in_any_cidr(canonical_ip(ip), &PRIVATE_NETS)
}

#[must_use]
pub fn is_link_local(ip: IpAddr) -> bool {
    ip_in_any_cidr(canonical_ip(ip), &LINK_LOCAL_NETS)
}

/// Private, loopback or link-local.
#[must_use]
pub fn is_internal(ip: IpAddr) -> bool {
    is_private_range(ip) || is_loopback(ip) || is_link_local(ip)
}
