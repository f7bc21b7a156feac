//! RTNETLINK: decoding route messages and the socket reader feeding the hub.

use crate::error::{NetlinkError, Result};
use crate::hub::Hub;
use crate::link::OperState;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const NLMSG_HDRLEN: usize = 16;
const IFINFOMSG_LEN: usize = 16;
const IFADDRMSG_LEN: usize = 8;
const RTA_HDRLEN: usize = 4;

fn align(len: usize) -> usize {
    (len + 3) & !3
}

/// One decoded routing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    NewLink {
        index: u32,
        name: String,
        state: OperState,
        hardware_addr: Vec<u8>,
    },
    DelLink {
        index: u32,
    },
    NewAddr {
        index: u32,
        ip: IpAddr,
    },
    DelAddr {
        index: u32,
        ip: IpAddr,
    },
    /// End of a dump.
    Done,
    /// `NLMSG_ERROR` with a non-zero errno.
    Error(i32),
}

impl Event {
    /// Apply this event to `hub`.
    pub fn apply(self, hub: &Hub) {
        match self {
            Event::NewLink {
                index,
                name,
                state,
                hardware_addr,
            } => hub.add_link(index, name, state, hardware_addr),
            Event::DelLink { index } => hub.remove_link(index),
            Event::NewAddr { index, ip } => hub.add_ip(index, ip),
            Event::DelAddr { index, ip } => hub.remove_ip(index, ip),
            Event::Done | Event::Error(_) => {}
        }
    }
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Iterate `(type, payload)` over route attributes.
fn attributes(mut buf: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    std::iter::from_fn(move || {
        if buf.len() < RTA_HDRLEN {
            return None;
        }
        let len = usize::from(u16_at(buf, 0));
        let kind = u16_at(buf, 2);
        if len < RTA_HDRLEN || len > buf.len() {
            return None;
        }
        let payload = &buf[RTA_HDRLEN..len];
        buf = &buf[align(len).min(buf.len())..];
        Some((kind, payload))
    })
}

/// Decode every message in one datagram. Messages of other types are
/// skipped.
pub fn parse(mut buf: &[u8]) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    while buf.len() >= NLMSG_HDRLEN {
        let len = u32_at(buf, 0) as usize;
        if len < NLMSG_HDRLEN || len > buf.len() {
            return Err(NetlinkError::Truncated(format!("message length {len} of {}", buf.len())));
        }
        let kind = u16_at(buf, 4);
        let body = &buf[NLMSG_HDRLEN..len];
        if let Some(event) = parse_message(kind, body)? {
            events.push(event);
        }
        buf = &buf[align(len).min(buf.len())..];
    }
    Ok(events)
}

fn parse_message(kind: u16, body: &[u8]) -> Result<Option<Event>> {
    let kind_i32 = i32::from(kind);
    if kind_i32 == libc::NLMSG_DONE {
        return Ok(Some(Event::Done));
    }
    if kind_i32 == libc::NLMSG_ERROR {
        if body.len() < 4 {
            return Err(NetlinkError::Truncated("error message".into()));
        }
        let errno = i32::from_ne_bytes([body[0], body[1], body[2], body[3]]);
        return Ok((errno != 0).then_some(Event::Error(-errno)));
    }
    match kind {
        libc::RTM_NEWLINK | libc::RTM_DELLINK => parse_link(kind, body).map(Some),
        libc::RTM_NEWADDR | libc::RTM_DELADDR => parse_addr(kind, body),
        _ => Ok(None),
    }
}

fn parse_link(kind: u16, body: &[u8]) -> Result<Event> {
    if body.len() < IFINFOMSG_LEN {
        return Err(NetlinkError::Truncated("ifinfomsg".into()));
    }
    let index = u32_at(body, 4);
    if kind == libc::RTM_DELLINK {
        return Ok(Event::DelLink { index });
    }

    let mut name = String::new();
    let mut state = OperState::Unknown;
    let mut hardware_addr = Vec::new();
    for (attr, payload) in attributes(&body[IFINFOMSG_LEN..]) {
        match attr {
            libc::IFLA_IFNAME => {
                let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
                name = String::from_utf8_lossy(&payload[..end]).into_owned();
            }
            libc::IFLA_OPERSTATE => {
                if let Some(s) = payload.first() {
                    state = OperState::from_kernel(*s);
                }
            }
            libc::IFLA_ADDRESS => hardware_addr = payload.to_vec(),
            _ => {}
        }
    }
    Ok(Event::NewLink {
        index,
        name,
        state,
        hardware_addr,
    })
}

fn parse_addr(kind: u16, body: &[u8]) -> Result<Option<Event>> {
    if body.len() < IFADDRMSG_LEN {
        return Err(NetlinkError::Truncated("ifaddrmsg".into()));
    }
    let family = i32::from(body[0]);
    let index = u32_at(body, 4);

    // IFA_LOCAL is the interface's own address on point-to-point links;
    // prefer it over IFA_ADDRESS (the peer) when present.
    let mut address = None;
    let mut local = None;
    for (attr, payload) in attributes(&body[IFADDRMSG_LEN..]) {
        let ip = match (family, payload.len()) {
            (libc::AF_INET, 4) => IpAddr::V4(Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3])),
            (libc::AF_INET6, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(payload);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => continue,
        };
        match attr {
            libc::IFA_ADDRESS => address = Some(ip),
            libc::IFA_LOCAL => local = Some(ip),
            _ => {}
        }
    }
    let Some(ip) = local.or(address) else {
        return Ok(None);
    };
    Ok(Some(if kind == libc::RTM_NEWADDR {
        Event::NewAddr { index, ip }
    } else {
        Event::DelAddr { index, ip }
    }))
}

/// A dump request for `kind` (`RTM_GETLINK` or `RTM_GETADDR`).
pub fn dump_request(kind: u16, seq: u32) -> Vec<u8> {
    let family = if kind == libc::RTM_GETLINK {
        libc::AF_PACKET
    } else {
        libc::AF_UNSPEC
    };
    let payload_len = if kind == libc::RTM_GETLINK {
        IFINFOMSG_LEN
    } else {
        IFADDRMSG_LEN
    };
    let len = NLMSG_HDRLEN + payload_len;
    let flags = (libc::NLM_F_REQUEST | libc::NLM_F_DUMP) as u16;

    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&(len as u32).to_ne_bytes());
    buf.extend_from_slice(&kind.to_ne_bytes());
    buf.extend_from_slice(&flags.to_ne_bytes());
    buf.extend_from_slice(&seq.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes());
    buf.push(family as u8);
    buf.resize(len, 0);
    buf
}

/// Links and addresses reported by a dump.
#[derive(Debug, Default)]
pub struct Seen {
    links: HashSet<u32>,
    ips: HashSet<(u32, IpAddr)>,
}

impl Seen {
    pub fn note(&mut self, event: &Event) {
        match *event {
            Event::NewLink { index, .. } => {
                self.links.insert(index);
            }
            Event::DelLink { index } => {
                self.links.remove(&index);
            }
            Event::NewAddr { index, ip } => {
                self.ips.insert((index, ip));
            }
            Event::DelAddr { index, ip } => {
                self.ips.remove(&(index, ip));
            }
            Event::Done | Event::Error(_) => {}
        }
    }

    /// Remove from `hub` everything this dump did not report.
    pub fn reconcile(&self, hub: &Hub) {
        hub.retain(&self.links, &self.ips);
    }
}

mod socket {
    use super::*;
    use nix::sys::socket::{
        bind, recv, send, socket, AddressFamily, MsgFlags, NetlinkAddr, SockFlag, SockProtocol, SockType,
    };
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::sync::Arc;
    use tracing::{debug, error, warn};

    const RECV_BUF: usize = 64 * 1024;

    pub struct RouteSocket {
        fd: OwnedFd,
        seq: u32,
    }

    impl RouteSocket {
        /// Open a route socket subscribed to link and address changes.
        pub fn open() -> Result<Self> {
            let fd = socket(
                AddressFamily::Netlink,
                SockType::Raw,
                SockFlag::SOCK_CLOEXEC,
                SockProtocol::NetlinkRoute,
            )?;
            let groups = (libc::RTMGRP_LINK | libc::RTMGRP_IPV4_IFADDR | libc::RTMGRP_IPV6_IFADDR) as u32;
            bind(fd.as_raw_fd(), &NetlinkAddr::new(0, groups))?;
            Ok(Self { fd, seq: 0 })
        }

        /// Request a full dump and apply it, along with any notifications
        /// that arrive meanwhile.
        fn dump(&mut self, kind: u16, hub: &Hub, seen: &mut Seen) -> Result<()> {
            self.seq += 1;
            send(self.fd.as_raw_fd(), &dump_request(kind, self.seq), MsgFlags::empty())?;
            let mut buf = vec![0u8; RECV_BUF];
            loop {
                for event in self.receive(&mut buf)? {
                    match event {
                        Event::Done => return Ok(()),
                        Event::Error(errno) => {
                            return Err(NetlinkError::Nix(nix::errno::Errno::from_raw(errno)));
                        }
                        other => {
                            seen.note(&other);
                            other.apply(hub);
                        }
                    }
                }
            }
        }

        /// Dump links then addresses, returning what the kernel reported.
        fn dump_all(&mut self, hub: &Hub) -> Result<Seen> {
            let mut seen = Seen::default();
            self.dump(libc::RTM_GETLINK, hub, &mut seen)?;
            self.dump(libc::RTM_GETADDR, hub, &mut seen)?;
            Ok(seen)
        }

        fn receive(&self, buf: &mut [u8]) -> Result<Vec<Event>> {
            let n = recv(self.fd.as_raw_fd(), buf, MsgFlags::empty())?;
            parse(&buf[..n])
        }

        /// Enumerate current state, then follow changes until the socket
        /// fails.
        pub fn run(mut self, hub: Arc<Hub>) -> Result<()> {
            self.dump_all(&hub)?;
            debug!("netlink: initial dump complete");

            let mut buf = vec![0u8; RECV_BUF];
            loop {
                match self.receive(&mut buf) {
                    Ok(events) => events.into_iter().for_each(|e| e.apply(&hub)),
                    Err(NetlinkError::Truncated(what)) => warn!("netlink: dropping malformed message: {what}"),
                    Err(NetlinkError::Nix(nix::errno::Errno::ENOBUFS)) => {
                        // The kernel dropped notifications; start over.
                        warn!("netlink: receive buffer overrun, re-reading state");
                        // Deletions may be among the lost messages.
                        self.dump_all(&hub)?.reconcile(&hub);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Start the reader thread feeding `hub`.
    pub fn spawn(hub: Arc<Hub>) {
        let spawned = std::thread::Builder::new()
            .name("netlink".into())
            .spawn(move || match RouteSocket::open().and_then(|s| s.run(hub)) {
                Ok(()) => {}
                Err(e) => error!("netlink watcher stopped: {e}"),
            });
        if let Err(e) = spawned {
            error!("cannot start netlink thread: {e}");
        }
    }
}

pub use socket::spawn;

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(kind: u16, payload: &[u8]) -> Vec<u8> {
        let len = RTA_HDRLEN + payload.len();
        let mut out = Vec::new();
        out.extend_from_slice(&(len as u16).to_ne_bytes());
        out.extend_from_slice(&kind.to_ne_bytes());
        out.extend_from_slice(payload);
        out.resize(align(len), 0);
        out
    }

    fn message(kind: u16, body: &[u8]) -> Vec<u8> {
        let len = NLMSG_HDRLEN + body.len();
        let mut out = Vec::new();
        out.extend_from_slice(&(len as u32).to_ne_bytes());
        out.extend_from_slice(&kind.to_ne_bytes());
        out.extend_from_slice(&0u16.to_ne_bytes());
        out.extend_from_slice(&1u32.to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());
        out.extend_from_slice(body);
        out.resize(align(len), 0);
        out
    }

    fn ifinfo(index: u32) -> Vec<u8> {
        let mut out = vec![0u8; IFINFOMSG_LEN];
        out[4..8].copy_from_slice(&index.to_ne_bytes());
        out
    }

    fn ifaddr(family: i32, index: u32) -> Vec<u8> {
        let mut out = vec![0u8; IFADDRMSG_LEN];
        out[0] = family as u8;
        out[4..8].copy_from_slice(&index.to_ne_bytes());
        out
    }

    #[test]
    fn decodes_links_and_addresses() {
        let mut link = ifinfo(3);
        link.extend(attr(libc::IFLA_IFNAME, b"eno1\0"));
        link.extend(attr(libc::IFLA_OPERSTATE, &[6]));
        link.extend(attr(libc::IFLA_ADDRESS, &[1, 2, 3, 4, 5, 6]));

        let mut v4 = ifaddr(libc::AF_INET, 3);
        v4.extend(attr(libc::IFA_ADDRESS, &[10, 0, 0, 9]));
        v4.extend(attr(libc::IFA_LOCAL, &[10, 0, 0, 1]));

        let mut v6 = ifaddr(libc::AF_INET6, 3);
        v6.extend(attr(libc::IFA_ADDRESS, &Ipv6Addr::LOCALHOST.octets()));

        let mut buf = message(libc::RTM_NEWLINK, &link);
        buf.extend(message(libc::RTM_NEWADDR, &v4));
        buf.extend(message(libc::RTM_DELADDR, &v6));
        buf.extend(message(libc::RTM_DELLINK, &ifinfo(3)));
        buf.extend(message(libc::NLMSG_DONE as u16, &[0, 0, 0, 0]));

        let events = parse(&buf).unwrap();
        assert_eq!(
            events,
            vec![
                Event::NewLink {
                    index: 3,
                    name: "eno1".into(),
                    state: OperState::Up,
                    hardware_addr: vec![1, 2, 3, 4, 5, 6],
                },
                Event::NewAddr {
                    index: 3,
                    ip: "10.0.0.1".parse().unwrap()
                },
                Event::DelAddr {
                    index: 3,
                    ip: "::1".parse().unwrap()
                },
                Event::DelLink { index: 3 },
                Event::Done,
            ]
        );
    }

    #[test]
    fn errors_and_truncation() {
        let ack = message(libc::NLMSG_ERROR as u16, &0i32.to_ne_bytes());
        assert_eq!(parse(&ack).unwrap(), vec![]);
        let err = message(libc::NLMSG_ERROR as u16, &(-libc::EPERM).to_ne_bytes());
        assert_eq!(parse(&err).unwrap(), vec![Event::Error(libc::EPERM)]);

        let mut short = message(libc::RTM_NEWLINK, &ifinfo(1));
        short.truncate(20);
        assert!(matches!(parse(&short), Err(NetlinkError::Truncated(_))));
    }

    #[test]
    fn dump_request_layout() {
        let req = dump_request(libc::RTM_GETADDR, 7);
        assert_eq!(req.len(), NLMSG_HDRLEN + IFADDRMSG_LEN);
        assert_eq!(u32_at(&req, 0) as usize, req.len());
        assert_eq!(u16_at(&req, 4), libc::RTM_GETADDR);
        assert_eq!(u32_at(&req, 8), 7);
    }

    #[test]
    fn redump_reconciles_the_hub() {
        let hub = Hub::new();
        let ip = |s: &str| s.parse::<IpAddr>().unwrap();
        hub.add_link(2, "eth0".into(), OperState::Up, vec![]);
        hub.add_link(5, "usb0".into(), OperState::Up, vec![]);
        hub.add_ip(2, ip("10.0.0.7"));
        hub.add_ip(2, ip("10.0.0.8"));

        // usb0 and 10.0.0.8 went away while notifications were lost.
        let events = vec![
            Event::NewLink {
                index: 2,
                name: "eth0".into(),
                state: OperState::Up,
                hardware_addr: vec![],
            },
            Event::NewAddr {
                index: 2,
                ip: ip("10.0.0.7"),
            },
        ];
        let mut seen = Seen::default();
        for event in events {
            seen.note(&event);
            event.apply(&hub);
        }
        seen.reconcile(&hub);

        assert!(hub.link(5).is_none());
        assert_eq!(hub.link(2).unwrap().ips, vec![ip("10.0.0.7")]);
    }
}
