use crate::hub::{Hub, Subscription};
use crate::link::{Link, OperState};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Partial update for [`Tester::update_link`]; `None` keeps the field.
#[derive(Debug, Clone, Default)]
pub struct LinkUpdate {
    pub name: Option<String>,
    pub state: Option<OperState>,
    pub hardware_addr: Option<Vec<u8>>,
}

/// Drives an isolated link table by hand. Obtained from [`crate::test_mode`].
#[derive(Clone)]
pub struct Tester {
    hub: Arc<Hub>,
    next_index: Arc<AtomicU32>,
}

impl Tester {
    pub(crate) fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            next_index: Arc::new(AtomicU32::new(1)),
        }
    }

    pub(crate) fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Add `link` (addresses included) and return its index.
    pub fn add_link(&self, link: Link) -> u32 {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        self.hub.add_link(index, link.name, link.state, link.hardware_addr);
        for ip in link.ips {
            self.hub.add_ip(index, ip);
        }
        index
    }

    /// Change some fields of an existing link. Unknown indices are ignored.
    pub fn update_link(&self, index: u32, update: LinkUpdate) {
        let Some(current) = self.hub.link(index) else {
            return;
        };
        self.hub.add_link(
            index,
            update.name.unwrap_or(current.name),
            update.state.unwrap_or(current.state),
            update.hardware_addr.unwrap_or(current.hardware_addr),
        );
    }

    pub fn remove_link(&self, index: u32) {
        self.hub.remove_link(index);
    }

    pub fn add_ip(&self, index: u32, ip: IpAddr) {
        self.hub.add_ip(index, ip);
    }

    pub fn remove_ip(&self, index: u32, ip: IpAddr) {
        self.hub.remove_ip(index, ip);
    }

    pub fn by_name(&self, name: &str) -> Subscription<Link> {
        self.hub.by_name(name)
    }

    pub fn with_prefix(&self, prefix: &str) -> Subscription<Option<Link>> {
        self.hub.with_prefix(prefix)
    }

    pub fn any(&self) -> Subscription<Option<Link>> {
        self.hub.any()
    }

    pub fn all(&self) -> Subscription<Vec<Link>> {
        self.hub.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_keeps_unspecified_fields() {
        let t = Tester::new(Hub::new());
        let mut link = Link::new("wlan0").with_state(OperState::Down);
        link.hardware_addr = vec![1, 2, 3, 4, 5, 6];
        link.ips = vec!["192.168.1.4".parse().unwrap()];
        let idx = t.add_link(link);

        let mut sub = t.by_name("wlan0");
        assert_eq!(sub.get_and_mark().state, OperState::Down);

        t.update_link(
            idx,
            LinkUpdate {
                state: Some(OperState::Up),
                ..LinkUpdate::default()
            },
        );
        let now = sub.get_and_mark();
        assert_eq!(now.state, OperState::Up);
        assert_eq!(now.hardware_addr, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(now.ips.len(), 1);

        t.update_link(99, LinkUpdate::default());
        t.remove_link(idx);
        assert_eq!(sub.get().state, OperState::Gone);
    }
}
