use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;

/// Operational state of a link as reported by the kernel, plus `Gone` for
/// links that no longer exist. Ordered from worst to best.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperState {
    #[default]
    Gone,
    Unknown,
    NotPresent,
    Down,
    LowerLayerDown,
    Testing,
    Dormant,
    Up,
}

impl OperState {
    /// Map `IFLA_OPERSTATE` (`IF_OPER_*`).
    pub fn from_kernel(state: u8) -> Self {
        match state {
            1 => OperState::NotPresent,
            2 => OperState::Down,
            3 => OperState::LowerLayerDown,
            4 => OperState::Testing,
            5 => OperState::Dormant,
            6 => OperState::Up,
            _ => OperState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperState::Gone => "gone",
            OperState::Unknown => "unknown",
            OperState::NotPresent => "not present",
            OperState::Down => "down",
            OperState::LowerLayerDown => "lower layer down",
            OperState::Testing => "testing",
            OperState::Dormant => "dormant",
            OperState::Up => "up",
        }
    }
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub state: OperState,
    pub hardware_addr: Vec<u8>,
    /// Addresses in [`ip_priority`] order.
    pub ips: Vec<IpAddr>,
}

impl Link {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Placeholder for a name that is not present.
    pub fn gone(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    #[must_use]
    pub fn with_state(mut self, state: OperState) -> Self {
        self.state = state;
        self
    }

    /// `aa:bb:cc:dd:ee:ff`, or empty when there is no hardware address.
    pub fn hardware_addr_string(&self) -> String {
        self.hardware_addr
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// The highest-priority address, if any.
    pub fn primary_ip(&self) -> Option<IpAddr> {
        self.ips.first().copied()
    }

    /// Insert `ip` keeping priority order. Returns false for duplicates.
    pub(crate) fn add_ip(&mut self, ip: IpAddr) -> bool {
        if self.ips.contains(&ip) {
            return false;
        }
        self.ips.push(ip);
        sort_ips(&mut self.ips);
        true
    }

    pub(crate) fn remove_ip(&mut self, ip: IpAddr) -> bool {
        let before = self.ips.len();
        self.ips.retain(|i| *i != ip);
        self.ips.len() != before
    }

    /// Whether anything but the address list differs.
    pub(crate) fn same_identity(&self, other: &Link) -> bool {
        self.name == other.name && self.state == other.state && self.hardware_addr == other.hardware_addr
    }
}

/// Better links first: state descending, then name ascending.
pub fn best_first(a: &Link, b: &Link) -> Ordering {
    b.state.cmp(&a.state).then_with(|| a.name.cmp(&b.name))
}

/// Rank of an address kind; lower is preferred.
pub fn ip_priority(ip: &IpAddr) -> u8 {
    if is_global_unicast(ip) {
        0
    } else if ip.is_multicast() && !is_interface_local_multicast(ip) && !is_link_local_multicast(ip) {
        1
    } else if is_interface_local_multicast(ip) {
        2
    } else if is_link_local_multicast(ip) {
        3
    } else if is_link_local_unicast(ip) {
        4
    } else if ip.is_loopback() {
        5
    } else {
        6
    }
}

/// Priority order, ties broken by the textual form.
pub fn sort_ips(ips: &mut [IpAddr]) {
    ips.sort_by_cached_key(|ip| (ip_priority(ip), ip.to_string()));
}

fn is_link_local_unicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => v6.segments()[0] & 0xffc0 == 0xfe80,
    }
}

fn is_interface_local_multicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(_) => false,
        IpAddr::V6(v6) => v6.is_multicast() && v6.segments()[0] & 0x000f == 0x1,
    }
}

fn is_link_local_multicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 224 && o[1] == 0 && o[2] == 0
        }
        IpAddr::V6(v6) => v6.is_multicast() && v6.segments()[0] & 0x000f == 0x2,
    }
}

fn is_global_unicast(ip: &IpAddr) -> bool {
    let broadcast = matches!(ip, IpAddr::V4(v4) if v4.is_broadcast());
    !ip.is_unspecified() && !ip.is_loopback() && !ip.is_multicast() && !is_link_local_unicast(ip) && !broadcast
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn priorities() {
        assert_eq!(ip_priority(&ip("10.0.0.1")), 0);
        assert_eq!(ip_priority(&ip("2001:db8::1")), 0);
        assert_eq!(ip_priority(&ip("239.1.2.3")), 1);
        assert_eq!(ip_priority(&ip("ff01::1")), 2);
        assert_eq!(ip_priority(&ip("224.0.0.251")), 3);
        assert_eq!(ip_priority(&ip("ff02::1")), 3);
        assert_eq!(ip_priority(&ip("169.254.3.4")), 4);
        assert_eq!(ip_priority(&ip("fe80::1")), 4);
        assert_eq!(ip_priority(&ip("127.0.0.1")), 5);
        assert_eq!(ip_priority(&ip("::1")), 5);
        assert_eq!(ip_priority(&ip("0.0.0.0")), 6);
    }

    #[test]
    fn ips_sorted_by_priority_then_text() {
        let mut link = Link::new("eno1");
        for s in ["::1", "fe80::1", "10.0.2.1", "10.0.0.1"] {
            assert!(link.add_ip(ip(s)));
        }
        assert!(!link.add_ip(ip("10.0.0.1")));
        let text: Vec<_> = link.ips.iter().map(ToString::to_string).collect();
        assert_eq!(text, ["10.0.0.1", "10.0.2.1", "fe80::1", "::1"]);

        for w in link.ips.windows(2) {
            let (a, b) = (ip_priority(&w[0]), ip_priority(&w[1]));
            assert!(a < b || (a == b && w[0].to_string() <= w[1].to_string()));
        }
        assert!(link.remove_ip(ip("fe80::1")));
        assert!(!link.remove_ip(ip("fe80::1")));
    }

    #[test]
    fn best_ordering() {
        let mut links = vec![
            Link::new("wlan0").with_state(OperState::Dormant),
            Link::new("eth1").with_state(OperState::Up),
            Link::new("eth0").with_state(OperState::Up),
            Link::new("lo").with_state(OperState::Unknown),
        ];
        links.sort_by(best_first);
        let names: Vec<_> = links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["eth0", "eth1", "wlan0", "lo"]);
    }

    #[test]
    fn hardware_addr_text() {
        let mut link = Link::new("eno1");
        assert_eq!(link.hardware_addr_string(), "");
        link.hardware_addr = vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x01];
        assert_eq!(link.hardware_addr_string(), "de:ad:be:ef:00:01");
    }
}
