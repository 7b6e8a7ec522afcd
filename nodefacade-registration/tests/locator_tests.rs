use nodefacade_registration::{LocatorConfig, RegistryEndpoint, RegistryLocator};
use std::time::Duration;
use tokio::time::Instant;

fn hrefs(endpoints: &[RegistryEndpoint]) -> Vec<&str> {
    endpoints.iter().map(|e| e.href.as_str()).collect()
}

// ── Ordering ─────────────────────────────────────────────────────

#[test]
fn static_endpoints_are_ordered_by_priority() {
    let locator = RegistryLocator::new_static(vec![
        RegistryEndpoint::new("http://b:80", 20),
        RegistryEndpoint::new("http://a:80", 10),
        RegistryEndpoint::new("http://c:80", 20),
    ]);
    assert!(locator.is_static());
    assert_eq!(
        hrefs(&locator.endpoints()),
        vec!["http://a:80", "http://b:80", "http://c:80"]
    );
}

#[test]
fn static_locator_ignores_advertisements() {
    let locator = RegistryLocator::new_static(vec![RegistryEndpoint::new("http://a:80", 10)]);
    assert!(!locator.advertise("x", RegistryEndpoint::new("http://x:80", 0)));
    assert!(!locator.withdraw("http://a:80"));
    assert_eq!(hrefs(&locator.endpoints()), vec!["http://a:80"]);
}

#[test]
fn advertisements_update_the_list() {
    let locator = RegistryLocator::discovering();
    assert!(locator.endpoints().is_empty());

    assert!(locator.advertise("reg-b", RegistryEndpoint::new("http://b:80", 20)));
    assert!(locator.advertise("reg-a", RegistryEndpoint::new("http://a:80", 10)));
    assert_eq!(hrefs(&locator.endpoints()), vec!["http://a:80", "http://b:80"]);

    assert!(locator.withdraw("reg-a"));
    assert_eq!(hrefs(&locator.endpoints()), vec!["http://b:80"]);
    assert!(!locator.withdraw("reg-a"));
}

#[test]
fn readvertising_the_same_endpoint_is_not_a_change() {
    let locator = RegistryLocator::discovering();
    assert!(locator.advertise("reg-a", RegistryEndpoint::new("http://a:80", 10)));
    assert!(!locator.advertise("reg-a", RegistryEndpoint::new("http://a:80", 10)));
}

#[test]
fn same_registry_under_two_names_is_listed_once() {
    let locator = RegistryLocator::discovering();
    locator.advertise("new-type", RegistryEndpoint::new("http://a:80", 30));
    locator.advertise("legacy-type", RegistryEndpoint::new("http://a:80", 10));

    let endpoints = locator.endpoints();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].priority, 10);

    locator.withdraw("legacy-type");
    assert_eq!(locator.endpoints()[0].priority, 30);
}

#[test]
fn config_with_registries_is_static() {
    let config = LocatorConfig {
        static_registries: vec![RegistryEndpoint::new("http://a:80/", 1)],
        ..Default::default()
    };
    let locator = RegistryLocator::from_config(&config);
    assert!(locator.is_static());
    assert_eq!(hrefs(&locator.endpoints()), vec!["http://a:80"]);

    assert!(!RegistryLocator::from_config(&LocatorConfig::default()).is_static());
}

// ── Notification ─────────────────────────────────────────────────

#[tokio::test]
async fn subscribers_see_changes() {
    let locator = RegistryLocator::discovering();
    let mut rx = locator.subscribe();

    locator.advertise("reg-a", RegistryEndpoint::new("http://a:80", 10));
    rx.changed().await.unwrap();
    assert_eq!(hrefs(&rx.borrow_and_update()), vec!["http://a:80"]);

    locator.withdraw("reg-a");
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_empty());
}

#[tokio::test]
async fn unchanged_list_does_not_notify() {
    let locator = RegistryLocator::discovering();
    locator.advertise("reg-a", RegistryEndpoint::new("http://a:80", 10));
    let rx = locator.subscribe();

    locator.advertise("reg-a", RegistryEndpoint::new("http://a:80", 10));
    assert!(!rx.has_changed().unwrap());
}

// ── Cooldown ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cooling_down_endpoint_is_not_a_candidate() {
    let a = RegistryEndpoint::new("http://a:80", 10);
    let b = RegistryEndpoint::new("http://b:80", 20);
    let locator = RegistryLocator::new_static(vec![a.clone(), b.clone()]);
    let now = Instant::now();

    locator.cool_down(&a, now + Duration::from_secs(30));
    assert!(locator.is_cooling_down(&a.href, now));
    assert_eq!(locator.candidates(now), vec![b]);
    // Still listed, only withheld.
    assert!(locator.contains(&a.href));
    assert_eq!(
        locator.next_cooldown_expiry(now),
        Some(now + Duration::from_secs(30))
    );

    tokio::time::advance(Duration::from_secs(31)).await;
    let later = Instant::now();
    assert!(!locator.is_cooling_down(&a.href, later));
    assert_eq!(locator.candidates(later)[0], a);
    assert_eq!(locator.next_cooldown_expiry(later), None);
}

#[tokio::test(start_paused = true)]
async fn only_endpoint_cooling_down_leaves_no_candidates() {
    let a = RegistryEndpoint::new("http://a:80", 10);
    let locator = RegistryLocator::new_static(vec![a.clone()]);
    let now = Instant::now();

    locator.cool_down(&a, now + Duration::from_secs(5));
    assert!(locator.candidates(now).is_empty());
}
