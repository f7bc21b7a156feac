//! Network links and their addresses, followed through RTNETLINK.
//!
//! Subscriptions are coalescing views: a subscriber that falls behind sees
//! only the latest state, never a backlog. [`test_mode`] swaps the kernel
//! feed for a [`Tester`] on the calling thread.

mod error;
mod hub;
#[cfg(target_os = "linux")]
mod kernel;
mod link;
mod tester;

pub use error::{NetlinkError, Result};
pub use hub::{Hub, Subscription};
#[cfg(target_os = "linux")]
pub use kernel::{dump_request, parse, Event};
pub use link::{best_first, ip_priority, sort_ips, Link, OperState};
pub use tester::{LinkUpdate, Tester};

use std::cell::RefCell;
use std::sync::{Arc, LazyLock};

static KERNEL: LazyLock<Arc<Hub>> = LazyLock::new(|| {
    let hub = Hub::new();
    start_reader(hub.clone());
    hub
});

#[cfg(target_os = "linux")]
fn start_reader(hub: Arc<Hub>) {
    kernel::spawn(hub);
}

#[cfg(not(target_os = "linux"))]
fn start_reader(_hub: Arc<Hub>) {
    tracing::warn!("netlink is only available on Linux; no links will be reported");
}

thread_local! {
    static TESTER: RefCell<Option<Tester>> = const { RefCell::new(None) };
}

fn hub() -> Arc<Hub> {
    TESTER
        .with(|t| t.borrow().as_ref().map(|t| t.hub().clone()))
        .unwrap_or_else(|| KERNEL.clone())
}

/// Replace the kernel feed on this thread with an empty, hand-driven table.
pub fn test_mode() -> Tester {
    let tester = Tester::new(Hub::new());
    TESTER.with(|t| *t.borrow_mut() = Some(tester.clone()));
    tester
}

pub fn exit_test_mode() {
    TESTER.with(|t| *t.borrow_mut() = None);
}

/// The link named `name`. While absent it reads as [`OperState::Gone`].
pub fn by_name(name: &str) -> Subscription<Link> {
    hub().by_name(name)
}

/// The best link whose name starts with `prefix`.
pub fn with_prefix(prefix: &str) -> Subscription<Option<Link>> {
    hub().with_prefix(prefix)
}

/// The best link of all.
pub fn any() -> Subscription<Option<Link>> {
    hub().any()
}

/// Every link, best first.
pub fn all() -> Subscription<Vec<Link>> {
    hub().all()
}
