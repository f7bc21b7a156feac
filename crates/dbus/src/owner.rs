//! Tracking which unique connection owns a well-known name.

use crate::bus::Bus;
use crate::connection::{name_owner_changed_rule, parse_name_owner_changed, Connection, Signal};
use crate::error::Result;
use crate::rule::MatchRule;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One owner transition. An empty `owner` means the name was released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerChange {
    pub name: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Namespace(String),
}

impl Pattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::Exact(p) => name == p,
            Pattern::Namespace(p) => name == p || name.strip_prefix(p.as_str()).is_some_and(|r| r.starts_with('.')),
        }
    }

    fn rule(&self) -> MatchRule {
        match self {
            Pattern::Exact(p) => name_owner_changed_rule().arg(0, p.clone()),
            Pattern::Namespace(p) => name_owner_changed_rule().arg_namespace(0, p.clone()),
        }
    }
}

type Owners = Arc<RwLock<BTreeMap<String, String>>>;

/// Watches the owner of one name, or of every name in a namespace.
pub struct NameOwnerWatcher {
    owners: Owners,
    updates: mpsc::UnboundedReceiver<OwnerChange>,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl NameOwnerWatcher {
    /// Watch exactly `name`.
    pub async fn watch_name(bus: &Bus, name: &str) -> Result<Self> {
        Self::start(bus, Pattern::Exact(name.to_string())).await
    }

    /// Watch `namespace` and every name below it (`namespace.*`).
    pub async fn watch_namespace(bus: &Bus, namespace: &str) -> Result<Self> {
        Self::start(bus, Pattern::Namespace(namespace.to_string())).await
    }

    async fn start(bus: &Bus, pattern: Pattern) -> Result<Self> {
        let conn = bus.connect().await?;
        // Install the match before seeding so no transition between the two
        // is lost; replaying a stale signal afterwards converges on the
        // latest owner.
        let signals = conn.signals();
        conn.add_match(pattern.rule()).await?;

        let mut seed = BTreeMap::new();
        for name in conn.list_names().await? {
            if !pattern.matches(&name) {
                continue;
            }
            if let Some(owner) = conn.get_name_owner(&name).await? {
                seed.insert(name, owner);
            }
        }

        let owners: Owners = Arc::new(RwLock::new(seed));
        let (tx, updates) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let closed = Arc::new(AtomicBool::new(false));
        let listener = Listener {
            conn,
            signals,
            pattern,
            owners: owners.clone(),
            tx,
            closed: closed.clone(),
        };
        tokio::spawn(listener.run(cancel.clone()));

        Ok(Self {
            owners,
            updates,
            cancel,
            closed,
        })
    }

    /// Any current owner. For an exact watcher, the owner of the name.
    pub fn owner(&self) -> Option<String> {
        self.owners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .next()
            .cloned()
    }

    /// A copy of the full name → owner map.
    pub fn owners(&self) -> BTreeMap<String, String> {
        self.owners.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wait for the next owner transition. `None` once unsubscribed.
    pub async fn next_update(&mut self) -> Option<OwnerChange> {
        self.updates.recv().await
    }

    pub fn try_update(&mut self) -> Option<OwnerChange> {
        self.updates.try_recv().ok()
    }

    /// Stop watching. The private connection is closed by the background
    /// task as it exits. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.owners.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.updates.close();
    }
}

impl Drop for NameOwnerWatcher {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct Listener {
    conn: Arc<dyn Connection>,
    signals: mpsc::UnboundedReceiver<Signal>,
    pattern: Pattern,
    owners: Owners,
    tx: mpsc::UnboundedSender<OwnerChange>,
    closed: Arc<AtomicBool>,
}

impl Listener {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let signal = tokio::select! {
                _ = cancel.cancelled() => break,
                signal = self.signals.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };
            if let Some(change) = self.apply(&signal) {
                if self.tx.send(change).is_err() {
                    break;
                }
            }
        }
        self.conn.close();
    }

    fn apply(&self, signal: &Signal) -> Option<OwnerChange> {
        let (name, _old, new) = parse_name_owner_changed(signal)?;
        if !self.pattern.matches(name) {
            return None;
        }
        debug!(name, owner = new, "name owner changed");
        let mut map = self.owners.write().unwrap_or_else(|e| e.into_inner());
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        if new.is_empty() {
            map.remove(name);
        } else {
            map.insert(name.to_string(), new.to_string());
        }
        Some(OwnerChange {
            name: name.to_string(),
            owner: new.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_pattern_uses_dot_boundary() {
        let p = Pattern::Namespace("com.example".into());
        assert!(p.matches("com.example"));
        assert!(p.matches("com.example.foo"));
        assert!(!p.matches("com.examplefoo"));
        assert!(!Pattern::Exact("com.example".into()).matches("com.example.foo"));
    }
}
