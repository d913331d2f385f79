//! Trust evaluation matrix: exact matches, ranges, partial bypass and
//! malformed input.

use std::net::IpAddr;

use proptest::prelude::*;
use tollgate_trust::{
    TrustCheck, TrustConfig, TrustEntry, TrustEvaluator, TrustLevel, TrustReason,
};

// ============================================================================
// Test Fixtures
// ============================================================================

fn office_config() -> TrustConfig {
    TrustConfig {
        trusted: vec![
            "10.0.0.0/8".into(),
            "203.0.113.10".into(),
            "2001:db8:abcd::/48".into(),
        ],
        private_networks_partial: true,
        bypass_endpoints: vec!["/health".into()],
    }
}

fn evaluator() -> TrustEvaluator {
    TrustEvaluator::from_config(&office_config()).unwrap()
}

fn level(evaluator: &TrustEvaluator, ip: &str, endpoint: Option<&str>) -> TrustLevel {
    evaluator.check_trust(ip, endpoint).level
}

// ============================================================================
// Full bypass
// ============================================================================

#[test]
fn test_address_inside_trusted_range_is_full() {
    let check = evaluator().check_trust("10.1.2.3", None);

    assert!(check.trusted);
    assert_eq!(check.level, TrustLevel::Full);
    assert_eq!(
        check.reason,
        TrustReason::TrustedRange {
            range: "10.0.0.0/8".parse().unwrap()
        }
    );
}

#[test]
fn test_range_boundaries() {
    let evaluator = evaluator();

    assert_eq!(level(&evaluator, "10.0.0.0", None), TrustLevel::Full);
    assert_eq!(level(&evaluator, "10.255.255.255", None), TrustLevel::Full);
    assert_eq!(level(&evaluator, "11.0.0.0", None), TrustLevel::None);
    assert_eq!(level(&evaluator, "9.255.255.255", None), TrustLevel::None);
}

#[test]
fn test_ipv6_range_and_mapped_ipv4() {
    let evaluator = evaluator();

    assert_eq!(level(&evaluator, "2001:db8:abcd:12::1", None), TrustLevel::Full);
    assert_eq!(level(&evaluator, "2001:db8:abce::1", None), TrustLevel::None);
    assert_eq!(level(&evaluator, "::ffff:203.0.113.10", None), TrustLevel::Full);
    assert_eq!(level(&evaluator, "::ffff:10.20.30.40", None), TrustLevel::Full);
}

#[test]
fn test_first_configured_range_wins() {
    let config = TrustConfig {
        trusted: vec!["192.0.2.0/24".into(), "192.0.2.128/25".into()],
        ..TrustConfig::default()
    };
    let check = TrustEvaluator::from_config(&config)
        .unwrap()
        .check_trust("192.0.2.200", None);

    assert_eq!(
        check.reason,
        TrustReason::TrustedRange {
            range: "192.0.2.0/24".parse().unwrap()
        }
    );
}

#[test]
fn test_full_trust_outranks_bypass_endpoint() {
    assert_eq!(
        level(&evaluator(), "203.0.113.10", Some("/health")),
        TrustLevel::Full
    );
}

// ============================================================================
// Partial bypass
// ============================================================================

#[test]
fn test_bypass_endpoint_is_partial() {
    let check = evaluator().check_trust("198.51.100.7", Some("/health"));

    assert!(check.trusted);
    assert_eq!(check.level, TrustLevel::Partial);
    assert_eq!(check.reason, TrustReason::BypassEndpoint);
}

#[test]
fn test_internal_networks_are_partial() {
    let evaluator = evaluator();

    for ip in ["192.168.1.20", "172.20.0.1", "127.0.0.1", "169.254.1.1", "::1", "fe80::1", "fd00::1"] {
        let check = evaluator.check_trust(ip, Some("/api/orders"));
        assert_eq!(check.level, TrustLevel::Partial, "{ip}");
        assert_eq!(check.reason, TrustReason::InternalNetwork, "{ip}");
    }
}

#[test]
fn test_internal_partial_can_be_disabled() {
    let config = TrustConfig {
        private_networks_partial: false,
        ..office_config()
    };
    let evaluator = TrustEvaluator::from_config(&config).unwrap();

    assert_eq!(level(&evaluator, "192.168.1.20", None), TrustLevel::None);
    assert_eq!(level(&evaluator, "192.168.1.20", Some("/health")), TrustLevel::Partial);
}

// ============================================================================
// Untrusted
// ============================================================================

#[test]
fn test_public_address_is_untrusted() {
    let check = evaluator().check_trust("8.8.8.8", Some("/api/orders"));

    assert_eq!(
        check,
        TrustCheck {
            trusted: false,
            level: TrustLevel::None,
            reason: TrustReason::Untrusted,
        }
    );
}

#[test]
fn test_malformed_input_is_untrusted() {
    let evaluator = evaluator();

    for ip in ["", "   ", "10.0.0", "10.0.0.256", "localhost", "10.0.0.0/8", "::g"] {
        let check = evaluator.check_trust(ip, Some("/health"));
        assert!(!check.trusted, "{ip:?}");
        assert_eq!(check.reason, TrustReason::InvalidAddress, "{ip:?}");
    }
}

#[test]
fn test_invalid_config_entry_is_rejected() {
    let config = TrustConfig {
        trusted: vec!["10.0.0.0/8".into(), "10.0.0.0/40".into()],
        ..TrustConfig::default()
    };

    assert!(TrustEvaluator::from_config(&config).is_err());
}

#[test]
fn test_entries_keep_configured_order() {
    let evaluator = evaluator();
    let listed: Vec<String> = evaluator.entries().iter().map(ToString::to_string).collect();

    assert_eq!(listed, vec!["10.0.0.0/8", "203.0.113.10", "2001:db8:abcd::/48"]);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_check_is_idempotent(octets in any::<[u8; 4]>(), bypass in any::<bool>()) {
        let evaluator = evaluator();
        let ip = IpAddr::from(octets).to_string();
        let endpoint = bypass.then_some("/health");

        prop_assert_eq!(
            evaluator.check_trust(&ip, endpoint),
            evaluator.check_trust(&ip, endpoint)
        );
    }

    #[test]
    fn prop_every_address_in_trusted_v4_range_is_full(
        a in any::<u8>(), prefix in 8u8..=32, host in any::<u32>()
    ) {
        let net: ipnet::Ipv4Net = format!("{a}.0.0.0/{prefix}").parse().unwrap();
        let net = net.trunc();
        let mask = if prefix == 32 { 0 } else { u32::MAX >> prefix };
        let addr = std::net::Ipv4Addr::from(u32::from(net.network()) | (host & mask));

        let mut evaluator = TrustEvaluator::new();
        evaluator.add_trusted(TrustEntry::range(ipnet::IpNet::V4(net)));

        prop_assert!(evaluator.check_addr(IpAddr::V4(addr), None).is_full());
    }

    #[test]
    fn prop_add_then_remove_restores_untrusted(octets in any::<[u8; 4]>()) {
        let addr = IpAddr::from(octets);
        let mut evaluator = TrustEvaluator::new();

        evaluator.add_trusted(TrustEntry::address(addr));
        prop_assert!(evaluator.check_addr(addr, None).is_full());

        evaluator.remove_trusted(&TrustEntry::address(addr));
        prop_assert!(!evaluator.check_addr(addr, None).is_full());
        prop_assert!(evaluator.entries().is_empty());
    }
}
