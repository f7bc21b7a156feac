use bar_netlink::{Link, LinkUpdate, OperState};
use std::net::IpAddr;
use std::time::Duration;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[test]
fn all_sees_each_change_once() {
    let t = bar_netlink::test_mode();
    let mut all = bar_netlink::all();
    assert!(all.get_and_mark().is_empty());

    let id = t.add_link(Link::new("eno1"));
    assert!(all.has_changed());
    assert_eq!(all.get_and_mark().len(), 1);
    assert!(!all.has_changed());

    for s in ["10.0.0.1", "10.0.2.1", "::1"] {
        t.add_ip(id, ip(s));
        assert!(all.has_changed());
        all.get_and_mark();
    }
    // A duplicate address is not a change.
    t.add_ip(id, ip("10.0.2.1"));
    assert!(!all.has_changed());

    let links = all.get();
    assert_eq!(links[0].ips, vec![ip("10.0.0.1"), ip("10.0.2.1"), ip("::1")]);
    bar_netlink::exit_test_mode();
}

#[test]
fn subscriptions_are_per_thread() {
    let t = bar_netlink::test_mode();
    t.add_link(Link::new("wlan0").with_state(OperState::Up));
    assert_eq!(bar_netlink::by_name("wlan0").get().state, OperState::Up);

    let elsewhere = std::thread::spawn(|| {
        let _t = bar_netlink::test_mode();
        bar_netlink::by_name("wlan0").get().state
    })
    .join()
    .unwrap();
    assert_eq!(elsewhere, OperState::Gone);
    bar_netlink::exit_test_mode();
}

#[tokio::test]
async fn next_coalesces_and_ends_on_unsubscribe() {
    let t = bar_netlink::test_mode();
    let mut best = bar_netlink::with_prefix("en");
    assert_eq!(best.get_and_mark(), None);

    let a = t.add_link(Link::new("enp1s0").with_state(OperState::Down));
    t.add_link(Link::new("eno2").with_state(OperState::Down));
    t.update_link(
        a,
        LinkUpdate {
            state: Some(OperState::Up),
            ..LinkUpdate::default()
        },
    );

    let woke = tokio::time::timeout(Duration::from_secs(1), best.next()).await.unwrap();
    assert!(woke);
    assert_eq!(best.get_and_mark().map(|l| l.name), Some("enp1s0".to_string()));
    assert!(!best.has_changed());

    best.unsubscribe();
    assert!(!best.next().await);
    bar_netlink::exit_test_mode();
}
