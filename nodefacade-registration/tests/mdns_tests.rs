use nodefacade_registration::mdns::{endpoint_from_txt, LEGACY_REGISTRATION_SERVICE, REGISTRATION_SERVICE};
use nodefacade_registration::LocatorConfig;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));

fn txt(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn service_types() {
    assert_eq!(REGISTRATION_SERVICE, "_nmos-register._tcp.local.");
    assert_eq!(LEGACY_REGISTRATION_SERVICE, "_nmos-registration._tcp.local.");
}

#[test]
fn complete_advertisement() {
    let records = txt(&[("pri", "10"), ("api_ver", "v1.2,v1.3"), ("api_proto", "http")]);
    let endpoint = endpoint_from_txt(ADDR, 8235, &records, &LocatorConfig::default()).unwrap();

    assert_eq!(endpoint.href, "http://192.0.2.10:8235");
    assert_eq!(endpoint.priority, 10);
    assert_eq!(endpoint.api_version, "v1.3");
    assert_eq!(
        endpoint.api_root(),
        "http://192.0.2.10:8235/x-nmos/registration/v1.3"
    );
}

#[test]
fn protocol_defaults_to_http() {
    let records = txt(&[("pri", "100"), ("api_ver", "v1.3")]);
    let endpoint = endpoint_from_txt(ADDR, 80, &records, &LocatorConfig::default()).unwrap();
    assert!(endpoint.href.starts_with("http://"));
}

#[test]
fn ipv6_addresses_are_bracketed() {
    let records = txt(&[("pri", "1"), ("api_ver", "v1.3")]);
    let endpoint =
        endpoint_from_txt(IpAddr::V6(Ipv6Addr::LOCALHOST), 80, &records, &LocatorConfig::default())
            .unwrap();
    assert_eq!(endpoint.href, "http://[::1]:80");
}

#[test]
fn missing_or_bad_priority_is_ignored() {
    let config = LocatorConfig::default();
    assert!(endpoint_from_txt(ADDR, 80, &txt(&[("api_ver", "v1.3")]), &config).is_none());
    assert!(
        endpoint_from_txt(ADDR, 80, &txt(&[("pri", "high"), ("api_ver", "v1.3")]), &config)
            .is_none()
    );
}

#[test]
fn unsupported_version_is_ignored() {
    let config = LocatorConfig::default();
    let records = txt(&[("pri", "10"), ("api_ver", "v1.0,v1.1")]);
    assert!(endpoint_from_txt(ADDR, 80, &records, &config).is_none());
    assert!(endpoint_from_txt(ADDR, 80, &txt(&[("pri", "10")]), &config).is_none());
}

#[test]
fn protocol_must_match() {
    let records = txt(&[("pri", "10"), ("api_ver", "v1.3"), ("api_proto", "https")]);
    assert!(endpoint_from_txt(ADDR, 443, &records, &LocatorConfig::default()).is_none());

    let secure = LocatorConfig {
        protocol: "https".into(),
        ..Default::default()
    };
    let endpoint = endpoint_from_txt(ADDR, 443, &records, &secure).unwrap();
    assert_eq!(endpoint.href, "https://192.0.2.10:443");
}
