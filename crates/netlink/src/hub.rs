//! Shared link table and the filtered views handed to subscribers.

use crate::link::{best_first, Link, OperState};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, RwLock, RwLockWriteGuard, Weak};
use tokio::sync::watch;
use tracing::debug;

enum Feed {
    ByName(String, watch::Sender<Link>),
    Prefix(String, watch::Sender<Option<Link>>),
    Any(watch::Sender<Option<Link>>),
    All(watch::Sender<Vec<Link>>),
}

struct Subscriber {
    id: u64,
    feed: Feed,
}

#[derive(Default)]
struct State {
    links: BTreeMap<u32, Link>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

impl State {
    fn by_name(&self, name: &str) -> Link {
        self.links
            .values()
            .find(|l| l.name == name)
            .cloned()
            .unwrap_or_else(|| Link::gone(name))
    }

    fn best(&self, prefix: &str) -> Option<Link> {
        self.links
            .values()
            .filter(|l| l.name.starts_with(prefix))
            .min_by(|a, b| best_first(a, b))
            .cloned()
    }

    fn all(&self) -> Vec<Link> {
        let mut all: Vec<Link> = self.links.values().cloned().collect();
        all.sort_by(best_first);
        all
    }

    /// Push the current view to every subscriber whose view changed.
    fn publish(&mut self) {
        self.subscribers.retain(|s| match &s.feed {
            Feed::ByName(_, tx) => !tx.is_closed(),
            Feed::Prefix(_, tx) | Feed::Any(tx) => !tx.is_closed(),
            Feed::All(tx) => !tx.is_closed(),
        });
        for sub in &self.subscribers {
            match &sub.feed {
                Feed::ByName(name, tx) => update(tx, self.by_name(name)),
                Feed::Prefix(prefix, tx) => update(tx, self.best(prefix)),
                Feed::Any(tx) => update(tx, self.best("")),
                Feed::All(tx) => update(tx, self.all()),
            }
        }
    }
}

fn update<T: PartialEq>(tx: &watch::Sender<T>, value: T) {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

/// The link table. One per process, or one per [`crate::Tester`].
#[derive(Default)]
pub struct Hub {
    state: RwLock<State>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or update the link at `index`. Addresses already known for
    /// the index are kept.
    pub fn add_link(&self, index: u32, name: String, state: OperState, hardware_addr: Vec<u8>) {
        let mut st = self.write();
        let mut link = Link {
            name,
            state,
            hardware_addr,
            ips: Vec::new(),
        };
        if let Some(prev) = st.links.get(&index) {
            if prev.same_identity(&link) {
                return;
            }
            link.ips = prev.ips.clone();
            if prev.name != link.name {
                debug!(index, from = %prev.name, to = %link.name, "link renamed");
                // Subscribers to the old name see it go first.
                st.links.remove(&index);
                st.publish();
            }
        }
        debug!(index, name = %link.name, state = %link.state, "link update");
        st.links.insert(index, link);
        st.publish();
    }

    pub fn remove_link(&self, index: u32) {
        let mut st = self.write();
        if let Some(link) = st.links.remove(&index) {
            debug!(index, name = %link.name, "link removed");
            st.publish();
        }
    }

    pub fn add_ip(&self, index: u32, ip: IpAddr) {
        let mut st = self.write();
        let added = st.links.get_mut(&index).is_some_and(|l| l.add_ip(ip));
        if added {
            st.publish();
        }
    }

    pub fn remove_ip(&self, index: u32, ip: IpAddr) {
        let mut st = self.write();
        let removed = st.links.get_mut(&index).is_some_and(|l| l.remove_ip(ip));
        if removed {
            st.publish();
        }
    }

    /// Drop every link and address missing from a fresh dump, after the
    /// kernel may have dropped deletion notifications.
    pub fn retain(&self, links: &HashSet<u32>, ips: &HashSet<(u32, IpAddr)>) {
        let mut st = self.write();
        let before = st.links.len();
        st.links.retain(|index, link| {
            let keep = links.contains(index);
            if !keep {
                debug!(index, name = %link.name, "stale link removed");
            }
            keep
        });
        let mut changed = st.links.len() != before;
        for (index, link) in &mut st.links {
            let had = link.ips.len();
            link.ips.retain(|ip| ips.contains(&(*index, *ip)));
            changed |= link.ips.len() != had;
        }
        if changed {
            st.publish();
        }
    }

    pub fn link(&self, index: u32) -> Option<Link> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .links
            .get(&index)
            .cloned()
    }

    fn subscribe<T>(
        self: &Arc<Self>,
        initial: impl FnOnce(&State) -> T,
        feed: impl FnOnce(watch::Sender<T>) -> Feed,
    ) -> Subscription<T> {
        let mut st = self.write();
        let (tx, rx) = watch::channel(initial(&st));
        st.next_id += 1;
        let id = st.next_id;
        st.subscribers.push(Subscriber { id, feed: feed(tx) });
        Subscription {
            hub: Arc::downgrade(self),
            id,
            rx,
            closed: false,
        }
    }

    /// The link named `name`, or a `Gone` placeholder.
    pub fn by_name(self: &Arc<Self>, name: &str) -> Subscription<Link> {
        self.subscribe(|st| st.by_name(name), |tx| Feed::ByName(name.to_string(), tx))
    }

    /// The best link whose name starts with `prefix`.
    pub fn with_prefix(self: &Arc<Self>, prefix: &str) -> Subscription<Option<Link>> {
        self.subscribe(|st| st.best(prefix), |tx| Feed::Prefix(prefix.to_string(), tx))
    }

    /// The best link overall.
    pub fn any(self: &Arc<Self>) -> Subscription<Option<Link>> {
        self.subscribe(|st| st.best(""), Feed::Any)
    }

    /// Every link, best first.
    pub fn all(self: &Arc<Self>) -> Subscription<Vec<Link>> {
        self.subscribe(State::all, Feed::All)
    }

    fn unsubscribe(&self, id: u64) {
        self.write().subscribers.retain(|s| s.id != id);
    }
}

/// A filtered, coalescing view of the link table.
pub struct Subscription<T> {
    hub: Weak<Hub>,
    id: u64,
    rx: watch::Receiver<T>,
    closed: bool,
}

impl<T: Clone> Subscription<T> {
    /// The current value.
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// The current value, marking it seen for [`Subscription::next`].
    pub fn get_and_mark(&mut self) -> T {
        self.rx.borrow_and_update().clone()
    }

    /// Wait until the value changes after it was last seen. Any number of
    /// changes in between collapse into one wakeup. Returns false once the
    /// subscription is closed.
    pub async fn next(&mut self) -> bool {
        !self.closed && self.rx.changed().await.is_ok()
    }

    /// Whether a change is waiting.
    pub fn has_changed(&self) -> bool {
        !self.closed && self.rx.has_changed().unwrap_or(false)
    }

    /// Stop receiving changes. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn by_name_seeds_gone_and_follows_renames() {
        let hub = Hub::new();
        let mut old = hub.by_name("eth0");
        let mut new = hub.by_name("lan0");
        assert_eq!(old.get_and_mark().state, OperState::Gone);

        hub.add_link(2, "eth0".into(), OperState::Up, vec![1, 2, 3, 4, 5, 6]);
        hub.add_ip(2, ip("10.0.0.5"));
        assert!(old.has_changed());
        assert_eq!(old.get_and_mark().ips, vec![ip("10.0.0.5")]);

        hub.add_link(2, "lan0".into(), OperState::Up, vec![1, 2, 3, 4, 5, 6]);
        assert!(old.has_changed());
        assert_eq!(old.get_and_mark().state, OperState::Gone);
        let renamed = new.get_and_mark();
        assert_eq!(renamed.state, OperState::Up);
        // Addresses survive link updates.
        assert_eq!(renamed.ips, vec![ip("10.0.0.5")]);
    }

    #[test]
    fn unchanged_link_update_is_dropped() {
        let hub = Hub::new();
        hub.add_link(1, "eno1".into(), OperState::Up, vec![]);
        let mut all = hub.all();
        all.get_and_mark();
        hub.add_link(1, "eno1".into(), OperState::Up, vec![]);
        assert!(!all.has_changed());
        hub.add_ip(7, ip("10.0.0.1"));
        hub.remove_ip(1, ip("10.0.0.1"));
        assert!(!all.has_changed());
    }

    #[test]
    fn prefix_and_any_pick_the_best() {
        let hub = Hub::new();
        let prefix = hub.with_prefix("wl");
        let any = hub.any();
        assert_eq!(any.get(), None);

        hub.add_link(1, "lo".into(), OperState::Unknown, vec![]);
        hub.add_link(3, "wlan0".into(), OperState::Dormant, vec![]);
        hub.add_link(4, "wlp2s0".into(), OperState::Up, vec![]);
        hub.add_link(2, "eth0".into(), OperState::Up, vec![]);

        assert_eq!(prefix.get().map(|l| l.name), Some("wlp2s0".to_string()));
        assert_eq!(any.get().map(|l| l.name), Some("eth0".to_string()));

        hub.remove_link(2);
        assert_eq!(any.get().map(|l| l.name), Some("wlp2s0".to_string()));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let hub = Hub::new();
        let mut sub = hub.all();
        sub.unsubscribe();
        sub.unsubscribe();
        hub.add_link(1, "eno1".into(), OperState::Up, vec![]);
        assert!(!sub.has_changed());
        assert!(hub.state.read().unwrap().subscribers.is_empty());
    }

    #[test]
    fn retain_drops_what_a_redump_no_longer_reports() {
        let hub = Hub::new();
        hub.add_link(1, "eno1".into(), OperState::Up, vec![]);
        hub.add_link(2, "wlan0".into(), OperState::Up, vec![]);
        hub.add_ip(1, ip("10.0.0.2"));
        hub.add_ip(1, ip("fe80::1"));
        hub.add_ip(2, ip("192.168.1.4"));
        let mut all = hub.all();
        all.get_and_mark();

        let links = HashSet::from([1]);
        let ips = HashSet::from([(1, ip("10.0.0.2"))]);
        hub.retain(&links, &ips);

        assert!(all.has_changed());
        assert!(hub.link(2).is_none());
        assert_eq!(hub.link(1).unwrap().ips, vec![ip("10.0.0.2")]);

        all.get_and_mark();
        hub.retain(&links, &ips);
        assert!(!all.has_changed());
    }
}
