use crate::error::{DbusError, Result};
use crate::name::DbusName;
use crate::rule::MatchRule;
use crate::value::Value;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

pub const DBUS_SERVICE: &str = "org.freedesktop.DBus";
pub const DBUS_PATH: &str = "/org/freedesktop/DBus";
pub const DBUS_INTERFACE: &str = "org.freedesktop.DBus";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Error name returned by the bus driver for unowned names.
pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";

/// A received signal, with its body already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Unique name of the emitter (`:1.42`), or the bus driver.
    pub sender: String,
    pub path: String,
    pub name: DbusName,
    pub body: Vec<Value>,
}

impl Signal {
    pub fn arg(&self, n: usize) -> Option<&Value> {
        self.body.get(n)
    }

    pub fn is(&self, full_name: &str) -> bool {
        self.name.to_string() == full_name
    }
}

/// An outgoing method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub destination: String,
    pub path: String,
    pub method: DbusName,
    pub args: Vec<Value>,
}

impl MethodCall {
    pub fn new(destination: impl Into<String>, path: impl Into<String>, method: DbusName) -> Self {
        Self {
            destination: destination.into(),
            path: path.into(),
            method,
            args: Vec::new(),
        }
    }

    /// A call to the bus driver itself (`org.freedesktop.DBus.<member>`).
    pub fn driver(member: &str) -> Self {
        Self::new(DBUS_SERVICE, DBUS_PATH, DbusName::new(DBUS_INTERFACE, member))
    }

    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    #[must_use]
    pub fn args(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.args.extend(values);
        self
    }
}

/// A connection to a message bus.
///
/// Every method panics once [`Connection::close`] has been called.
pub trait Connection: Send + Sync {
    /// Invoke a method and return the reply body.
    fn call(&self, call: MethodCall) -> BoxFuture<'static, Result<Vec<Value>>>;

    /// Install a match rule. Signals matching any installed rule are
    /// delivered once to every receiver from [`Connection::signals`].
    fn add_match(&self, rule: MatchRule) -> BoxFuture<'static, Result<()>>;

    /// Remove a previously installed rule. Unknown rules are ignored.
    fn remove_match(&self, rule: MatchRule) -> BoxFuture<'static, Result<()>>;

    /// A new receiver of matched signals. Dropping it unsubscribes.
    fn signals(&self) -> mpsc::UnboundedReceiver<Signal>;

    /// Our own unique name on the bus, if known.
    fn unique_name(&self) -> Option<String>;

    /// Close the connection. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

impl dyn Connection {
    /// All names currently on the bus, unique ids included.
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let reply = self.call(MethodCall::driver("ListNames")).await?;
        let names = reply
            .first()
            .and_then(Value::as_array)
            .ok_or_else(|| bad_reply("ListNames", "expected an array of names"))?;
        Ok(names
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    /// The unique id owning `name`, or `None` if nobody does.
    pub async fn get_name_owner(&self, name: &str) -> Result<Option<String>> {
        match self.call(MethodCall::driver("GetNameOwner").arg(name)).await {
            Ok(reply) => reply
                .first()
                .and_then(Value::as_str)
                .map(|owner| Some(owner.to_string()))
                .ok_or_else(|| bad_reply("GetNameOwner", "expected a string")),
            Err(e) if e.error_name() == Some(NAME_HAS_NO_OWNER) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `org.freedesktop.DBus.Properties.Get` for one fully-qualified
    /// property name.
    pub async fn get_property(&self, destination: &str, path: &str, property: &DbusName) -> Result<Value> {
        let call = MethodCall::new(destination, path, DbusName::new(PROPERTIES_INTERFACE, "Get"))
            .arg(property.interface.as_str())
            .arg(property.member.as_str());
        self.call(call)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| bad_reply("Properties.Get", "empty reply"))
    }

    /// `org.freedesktop.DBus.Properties.GetAll`, keyed by member name.
    pub async fn get_all_properties(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
    ) -> Result<BTreeMap<String, Value>> {
        let call = MethodCall::new(destination, path, DbusName::new(PROPERTIES_INTERFACE, "GetAll")).arg(interface);
        match self.call(call).await?.into_iter().next() {
            Some(Value::Dict(props)) => Ok(props),
            _ => Err(bad_reply("Properties.GetAll", "expected a{sv}")),
        }
    }
}

fn bad_reply(method: &str, reason: &str) -> DbusError {
    DbusError::BadReply {
        method: method.to_string(),
        reason: reason.to_string(),
    }
}

/// The rule selecting `NameOwnerChanged` from the bus driver.
pub fn name_owner_changed_rule() -> MatchRule {
    MatchRule::signal()
        .sender(DBUS_SERVICE)
        .path(DBUS_PATH)
        .interface(DBUS_INTERFACE)
        .member("NameOwnerChanged")
}

/// Decode a `NameOwnerChanged(name, old, new)` body.
pub fn parse_name_owner_changed(signal: &Signal) -> Option<(&str, &str, &str)> {
    if signal.name.interface != DBUS_INTERFACE || signal.name.member != "NameOwnerChanged" {
        return None;
    }
    match signal.body.as_slice() {
        [name, old, new] => Some((name.as_str()?, old.as_str()?, new.as_str()?)),
        _ => None,
    }
}
