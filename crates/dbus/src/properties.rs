//! Following the properties of one object across owner changes.
//!
//! The watcher keeps its own connection with a `NameOwnerChanged` match on
//! the service name. While the name has an owner, further matches select
//! `PropertiesChanged` and any custom signals from that owner and object
//! path. When the owner changes every tracked property is fetched again
//! and the difference is reported as one [`PropertiesChange`].

use crate::bus::Bus;
use crate::connection::{
    name_owner_changed_rule, parse_name_owner_changed, Connection, MethodCall, Signal, DBUS_SERVICE,
    PROPERTIES_INTERFACE,
};
use crate::error::{DbusError, Result};
use crate::name::{expand, shorten, DbusName};
use crate::rule::MatchRule;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Old and new value of one property. `None` means absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Property name (short form) to its transition.
pub type PropertiesChange = BTreeMap<String, Change>;

/// What a custom signal handler derives from one signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalUpdate {
    /// New values, keyed by property name.
    pub values: BTreeMap<String, Value>,
    /// Properties to fetch from the object before reporting.
    pub refetch: Vec<String>,
}

/// Maps a custom signal to property values.
///
/// Handlers run on the watcher's task and cannot reach the watcher itself;
/// anything that needs a method call should list the property in
/// [`SignalUpdate::refetch`] instead.
pub type SignalHandler = Arc<dyn Fn(&Signal) -> SignalUpdate + Send + Sync>;

/// Start describing a watcher on `path` of `service`, for `interface`.
pub fn watch_properties(bus: &Bus, service: &str, path: &str, interface: &str) -> PropertiesWatcherBuilder {
    PropertiesWatcherBuilder {
        bus: bus.clone(),
        target: Target {
            service: service.to_string(),
            path: path.to_string(),
            interface: interface.to_string(),
        },
        tracked: BTreeSet::new(),
        on_signal: BTreeSet::new(),
        fetch_only: BTreeSet::new(),
        handlers: Vec::new(),
    }
}

#[derive(Debug, Clone)]
struct Target {
    service: String,
    path: String,
    interface: String,
}

impl Target {
    /// Canonical short name of a property of this interface.
    fn short(&self, name: &str) -> String {
        shorten(&self.interface, &expand(&self.interface, name))
    }

    fn full(&self, name: &str) -> DbusName {
        DbusName::relative(&self.interface, name)
    }
}

pub struct PropertiesWatcherBuilder {
    bus: Bus,
    target: Target,
    tracked: BTreeSet<String>,
    on_signal: BTreeSet<String>,
    fetch_only: BTreeSet<String>,
    handlers: Vec<(DbusName, SignalHandler)>,
}

impl PropertiesWatcherBuilder {
    /// Track these properties through `PropertiesChanged`.
    #[must_use]
    pub fn add(mut self, names: &[&str]) -> Self {
        let names: Vec<_> = names.iter().map(|n| self.target.short(n)).collect();
        self.tracked.extend(names);
        self
    }

    /// Fetch these on every `PropertiesChanged`, even when not listed in it.
    #[must_use]
    pub fn fetch_on_signal(mut self, names: &[&str]) -> Self {
        let names: Vec<_> = names.iter().map(|n| self.target.short(n)).collect();
        self.on_signal.extend(names);
        self
    }

    /// Fetch these on every [`PropertiesWatcher::get`]; never reported as
    /// updates.
    #[must_use]
    pub fn fetch(mut self, names: &[&str]) -> Self {
        let names: Vec<_> = names.iter().map(|n| self.target.short(n)).collect();
        self.fetch_only.extend(names);
        self
    }

    /// Map the custom signal `name` (relative to the interface) to
    /// property values.
    #[must_use]
    pub fn add_signal_handler<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&Signal) -> SignalUpdate + Send + Sync + 'static,
    {
        let name = self.target.full(name);
        self.handlers.push((name, Arc::new(handler)));
        self
    }

    /// Connect, fetch the initial values and start following changes.
    pub async fn build(self) -> Result<PropertiesWatcher> {
        let conn = self.bus.connect().await?;
        let owner_rule = name_owner_changed_rule().arg(0, self.target.service.clone());
        let signals = conn.signals();
        conn.add_match(owner_rule).await?;

        let core = Arc::new(Core {
            conn: conn.clone(),
            target: self.target,
            watched: self.tracked.union(&self.on_signal).cloned().collect(),
            tracked: self.tracked,
            on_signal: self.on_signal,
            fetch_only: self.fetch_only,
            handlers: self.handlers,
            state: RwLock::new(State::default()),
            closed: AtomicBool::new(false),
        });

        let owner = conn.get_name_owner(&core.target.service).await?;
        // The initial values are the starting point, not an update.
        let _ = core.set_owner(owner).await;

        let (tx, updates) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(listen(core.clone(), signals, tx, cancel.clone()));

        Ok(PropertiesWatcher { core, updates, cancel })
    }
}

#[derive(Debug, Default)]
struct State {
    owner: Option<String>,
    values: BTreeMap<String, Value>,
}

struct Core {
    conn: Arc<dyn Connection>,
    target: Target,
    /// `tracked` and `on_signal` together: everything kept in the snapshot.
    watched: BTreeSet<String>,
    tracked: BTreeSet<String>,
    on_signal: BTreeSet<String>,
    fetch_only: BTreeSet<String>,
    handlers: Vec<(DbusName, SignalHandler)>,
    state: RwLock<State>,
    closed: AtomicBool,
}

impl Core {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = State::default();
    }

    fn owner(&self) -> Option<String> {
        if self.is_closed() {
            return None;
        }
        self.state.read().unwrap_or_else(|e| e.into_inner()).owner.clone()
    }

    async fn fetch(&self, owner: &str, name: &str) -> Option<Value> {
        match self
            .conn
            .get_property(owner, &self.target.path, &self.target.full(name))
            .await
        {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(property = name, "fetch failed: {e}");
                None
            }
        }
    }

    fn object_rules(&self, owner: &str) -> Vec<MatchRule> {
        let base = MatchRule::signal().sender(owner).path(self.target.path.clone());
        let mut rules = vec![base
            .clone()
            .interface(PROPERTIES_INTERFACE)
            .member("PropertiesChanged")
            .arg(0, self.target.interface.clone())];
        for (name, _) in &self.handlers {
            rules.push(
                base.clone()
                    .interface(name.interface.clone())
                    .member(name.member.clone()),
            );
        }
        rules
    }

    /// Move to `owner`, re-fetching everything, and return the difference.
    async fn set_owner(&self, owner: Option<String>) -> PropertiesChange {
        let previous = self.owner();
        if previous == owner {
            return PropertiesChange::new();
        }
        if let Some(prev) = &previous {
            for rule in self.object_rules(prev) {
                let _ = self.conn.remove_match(rule).await;
            }
        }

        let mut values = BTreeMap::new();
        if let Some(owner) = &owner {
            for rule in self.object_rules(owner) {
                if let Err(e) = self.conn.add_match(rule).await {
                    warn!(service = %self.target.service, "cannot watch object signals: {e}");
                }
            }
            for name in &self.watched {
                if let Some(v) = self.fetch(owner, name).await {
                    values.insert(name.clone(), v);
                }
            }
        }
        debug!(service = %self.target.service, ?owner, "properties owner changed");

        let old = {
            let mut st = self.state.write().unwrap_or_else(|e| e.into_inner());
            st.owner = owner;
            std::mem::replace(&mut st.values, values.clone())
        };
        let mut change = PropertiesChange::new();
        for name in old.keys().chain(values.keys()) {
            change.entry(name.clone()).or_insert_with(|| Change {
                old: old.get(name).cloned(),
                new: values.get(name).cloned(),
            });
        }
        change
    }

    /// Merge fetched or signalled values into the snapshot and describe
    /// what changed. `only_different` drops entries whose value is equal.
    fn apply(&self, updates: BTreeMap<String, Option<Value>>, only_different: bool) -> PropertiesChange {
        let mut st = self.state.write().unwrap_or_else(|e| e.into_inner());
        let mut change = PropertiesChange::new();
        for (name, new) in updates {
            let old = match &new {
                Some(v) => st.values.insert(name.clone(), v.clone()),
                None => st.values.remove(&name),
            };
            if only_different && old == new {
                continue;
            }
            change.insert(name, Change { old, new });
        }
        change
    }

    async fn properties_changed(&self, owner: &str, signal: &Signal) -> PropertiesChange {
        let mut updates = BTreeMap::new();
        if let Some(changed) = signal.arg(1).and_then(Value::as_dict) {
            for (key, value) in changed {
                let name = self.target.short(key);
                if self.watched.contains(&name) {
                    updates.insert(name, Some(value.clone()));
                }
            }
        }

        let mut refetch: Vec<String> = self
            .on_signal
            .iter()
            .filter(|n| !updates.contains_key(*n))
            .cloned()
            .collect();
        if let Some(invalidated) = signal.arg(2).and_then(Value::as_array) {
            for name in invalidated.iter().filter_map(Value::as_str) {
                let name = self.target.short(name);
                if self.watched.contains(&name) && !refetch.contains(&name) {
                    refetch.push(name);
                }
            }
        }
        for name in refetch {
            let value = self.fetch(owner, &name).await;
            updates.insert(name, value);
        }
        self.apply(updates, false)
    }

    async fn custom_signal(&self, owner: &str, handler: &SignalHandler, signal: &Signal) -> PropertiesChange {
        let update = handler(signal);
        let mut updates: BTreeMap<String, Option<Value>> = update
            .values
            .into_iter()
            .map(|(k, v)| (self.target.short(&k), Some(v)))
            .collect();
        for name in update.refetch {
            let name = self.target.short(&name);
            let value = self.fetch(owner, &name).await;
            updates.insert(name, value);
        }
        self.apply(updates, true)
    }

    async fn handle(&self, signal: &Signal) -> PropertiesChange {
        if signal.sender == DBUS_SERVICE {
            if let Some((name, _, new)) = parse_name_owner_changed(signal) {
                if name == self.target.service {
                    let owner = (!new.is_empty()).then(|| new.to_string());
                    return self.set_owner(owner).await;
                }
            }
            return PropertiesChange::new();
        }

        let Some(owner) = self.owner() else {
            return PropertiesChange::new();
        };
        if signal.sender != owner || signal.path != self.target.path {
            return PropertiesChange::new();
        }
        if signal.name.interface == PROPERTIES_INTERFACE && signal.name.member == "PropertiesChanged" {
            if signal.arg(0).and_then(Value::as_str) == Some(self.target.interface.as_str()) {
                return self.properties_changed(&owner, signal).await;
            }
            return PropertiesChange::new();
        }
        for (name, handler) in &self.handlers {
            if *name == signal.name {
                return self.custom_signal(&owner, handler, signal).await;
            }
        }
        PropertiesChange::new()
    }
}

async fn listen(
    core: Arc<Core>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    tx: mpsc::UnboundedSender<PropertiesChange>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = core.handle(&signal) => change,
        };
        if change.is_empty() || core.is_closed() {
            continue;
        }
        if tx.send(change).is_err() {
            break;
        }
    }
    core.conn.close();
    core.clear();
}

/// Live view of an object's properties. See the module docs.
pub struct PropertiesWatcher {
    core: Arc<Core>,
    updates: mpsc::UnboundedReceiver<PropertiesChange>,
    cancel: CancellationToken,
}

impl PropertiesWatcher {
    /// The last known values, plus fresh values of fetch-only properties.
    /// Empty while the service has no owner.
    pub async fn get(&self) -> BTreeMap<String, Value> {
        if self.core.is_closed() {
            return BTreeMap::new();
        }
        let (owner, mut values) = {
            let st = self.core.state.read().unwrap_or_else(|e| e.into_inner());
            (st.owner.clone(), st.values.clone())
        };
        let Some(owner) = owner else {
            return BTreeMap::new();
        };
        for name in &self.core.fetch_only {
            if let Some(v) = self.core.fetch(&owner, name).await {
                values.insert(name.clone(), v);
            }
        }
        values
    }

    /// Current owner of the service, if any.
    pub fn owner(&self) -> Option<String> {
        self.core.owner()
    }

    /// Call `member` (relative to the interface) on the current owner.
    pub async fn call(&self, member: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        let owner = self
            .core
            .owner()
            .ok_or_else(|| DbusError::Disconnected(self.core.target.service.clone()))?;
        let call = MethodCall::new(owner, self.core.target.path.clone(), self.core.target.full(member)).args(args);
        self.core.conn.call(call).await
    }

    /// Wait for the next change. `None` once unsubscribed.
    pub async fn next_update(&mut self) -> Option<PropertiesChange> {
        self.updates.recv().await
    }

    pub fn try_update(&mut self) -> Option<PropertiesChange> {
        self.updates.try_recv().ok()
    }

    /// Names tracked through `PropertiesChanged`, in short form.
    pub fn tracked(&self) -> impl Iterator<Item = &str> {
        self.core.tracked.iter().map(String::as_str)
    }

    /// Stop watching. The background task closes the connection on its
    /// way out. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.core.clear();
        self.updates.close();
    }
}

impl Drop for PropertiesWatcher {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
