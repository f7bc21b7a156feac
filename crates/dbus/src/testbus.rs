//! An in-process message bus for tests.
//!
//! Services, names, objects, properties and signal routing all live behind
//! one mutex. Method handlers and signal delivery run after the lock is
//! released, so handlers may freely call back into the bus.

use crate::connection::{
    Connection, MethodCall, Signal, DBUS_INTERFACE, DBUS_PATH, DBUS_SERVICE, NAME_HAS_NO_OWNER,
    PROPERTIES_INTERFACE,
};
use crate::error::{DbusError, Result};
use crate::name::DbusName;
use crate::rule::MatchRule;
use crate::value::Value;
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

/// Method handler on a fake object.
pub type MethodHandler = Arc<dyn Fn(&[Value]) -> Result<Vec<Value>> + Send + Sync>;

/// Catch-all handler, also given the method name.
pub type FallbackHandler = Arc<dyn Fn(&DbusName, &[Value]) -> Result<Vec<Value>> + Send + Sync>;

/// How [`TestObject::set_property`] announces a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Store silently.
    None,
    /// Emit `PropertiesChanged` carrying the new value.
    Changed,
    /// Emit `PropertiesChanged` listing the property as invalidated.
    Invalidated,
}

#[derive(Default)]
struct Object {
    handlers: HashMap<String, MethodHandler>,
    fallback: Option<FallbackHandler>,
    /// Keyed by fully-qualified property name.
    props: BTreeMap<String, Value>,
}

#[derive(Default)]
struct Service {
    objects: HashMap<String, Object>,
}

#[derive(Default)]
struct Conn {
    rules: Vec<MatchRule>,
    subscribers: Vec<mpsc::UnboundedSender<Signal>>,
}

#[derive(Default)]
struct State {
    next_service: u64,
    next_conn: u64,
    services: BTreeMap<String, Service>,
    /// Well-known name to owning service id.
    names: BTreeMap<String, String>,
    conns: HashMap<u64, Conn>,
    shared: Option<Weak<TestConnection>>,
}

impl State {
    fn owner_of(&self, name: &str) -> Option<String> {
        if name == DBUS_SERVICE {
            return Some(DBUS_SERVICE.to_string());
        }
        if self.services.contains_key(name) {
            return Some(name.to_string());
        }
        self.names.get(name).cloned()
    }

    /// Subscribers of every connection with a rule matching `signal`.
    fn recipients(&self, signal: &Signal) -> Vec<mpsc::UnboundedSender<Signal>> {
        self.conns
            .values()
            .filter(|c| c.rules.iter().any(|r| r.matches(signal)))
            .flat_map(|c| c.subscribers.iter().cloned())
            .collect()
    }
}

/// A signal ready for delivery once the bus lock is released.
struct Outgoing {
    signal: Signal,
    to: Vec<mpsc::UnboundedSender<Signal>>,
}

impl Outgoing {
    fn send(self) {
        for tx in self.to {
            let _ = tx.send(self.signal.clone());
        }
    }
}

/// Handle to a fake bus. Clones share the same bus.
#[derive(Clone, Default)]
pub struct TestBus {
    state: Arc<Mutex<State>>,
}

impl TestBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test handler must not wedge the rest of the test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A new private connection.
    pub fn connect(&self) -> Arc<dyn Connection> {
        self.new_connection()
    }

    fn new_connection(&self) -> Arc<TestConnection> {
        let mut st = self.lock();
        st.next_conn += 1;
        let id = st.next_conn;
        st.conns.insert(id, Conn::default());
        Arc::new(TestConnection {
            bus: self.clone(),
            id,
            closed: AtomicBool::new(false),
        })
    }

    /// The connection returned by `Bus::shared` for this bus.
    pub fn shared(&self) -> Arc<dyn Connection> {
        let existing = self.lock().shared.as_ref().and_then(Weak::upgrade);
        match existing {
            Some(conn) if !conn.is_closed() => conn,
            _ => {
                let conn = self.new_connection();
                self.lock().shared = Some(Arc::downgrade(&conn));
                conn
            }
        }
    }

    /// Register a service with a fresh unique id (`:1`, `:2`, ...) and
    /// acquire `names` for it.
    pub fn register_service(&self, names: &[&str]) -> TestService {
        let id = {
            let mut st = self.lock();
            st.next_service += 1;
            let id = format!(":{}", st.next_service);
            st.services.insert(id.clone(), Service::default());
            id
        };
        self.emit_owner_changed(&id, "", &id);
        let service = TestService {
            bus: self.clone(),
            id,
        };
        for name in names {
            service.add_name(name);
        }
        service
    }

    fn emit_owner_changed(&self, name: &str, old: &str, new: &str) {
        let signal = Signal {
            sender: DBUS_SERVICE.to_string(),
            path: DBUS_PATH.to_string(),
            name: DbusName::new(DBUS_INTERFACE, "NameOwnerChanged"),
            body: vec![name.into(), old.into(), new.into()],
        };
        self.emit(signal);
    }

    fn emit(&self, signal: Signal) {
        let to = self.lock().recipients(&signal);
        Outgoing { signal, to }.send();
    }

    fn call(&self, call: &MethodCall) -> Result<Vec<Value>> {
        if call.destination == DBUS_SERVICE {
            return self.driver_call(call);
        }

        let handler = {
            let st = self.lock();
            let owner = st.owner_of(&call.destination).ok_or_else(|| {
                DbusError::method(
                    "org.freedesktop.DBus.Error.ServiceUnknown",
                    format!("The name {} was not provided by any service", call.destination),
                )
            })?;
            let object = st
                .services
                .get(&owner)
                .and_then(|s| s.objects.get(&call.path))
                .ok_or_else(|| {
                    DbusError::method(
                        "org.freedesktop.DBus.Error.UnknownObject",
                        format!("No such object path '{}'", call.path),
                    )
                })?;

            let full = call.method.to_string();
            if let Some(h) = object.handlers.get(&full) {
                Dispatch::Handler(h.clone())
            } else if call.method.interface == PROPERTIES_INTERFACE {
                Dispatch::Reply(properties_call(object, call))
            } else if let Some(h) = &object.fallback {
                Dispatch::Fallback(h.clone())
            } else {
                Dispatch::Reply(Err(DbusError::method(
                    "org.freedesktop.DBus.Error.UnknownMethod",
                    format!("No such method '{full}'"),
                )))
            }
        };

        match handler {
            Dispatch::Handler(h) => h(&call.args),
            Dispatch::Fallback(h) => h(&call.method, &call.args),
            Dispatch::Reply(r) => r,
        }
    }

    fn driver_call(&self, call: &MethodCall) -> Result<Vec<Value>> {
        let st = self.lock();
        let name_arg = || {
            call.args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| DbusError::method("org.freedesktop.DBus.Error.InvalidArgs", "expected a name"))
        };
        match call.method.member.as_str() {
            "ListNames" => {
                let mut names = vec![Value::from(DBUS_SERVICE)];
                names.extend(st.services.keys().map(|id| Value::from(id.as_str())));
                names.extend(st.names.keys().map(|n| Value::from(n.as_str())));
                Ok(vec![Value::Array(names)])
            }
            "GetNameOwner" => {
                let name = name_arg()?;
                st.owner_of(name)
                    .map(|owner| vec![Value::Str(owner)])
                    .ok_or_else(|| {
                        DbusError::method(NAME_HAS_NO_OWNER, format!("Could not get owner of name '{name}'"))
                    })
            }
            "NameHasOwner" => Ok(vec![Value::Bool(st.owner_of(name_arg()?).is_some())]),
            other => Err(DbusError::method(
                "org.freedesktop.DBus.Error.UnknownMethod",
                format!("bus driver has no method {other}"),
            )),
        }
    }
}

enum Dispatch {
    Handler(MethodHandler),
    Fallback(FallbackHandler),
    Reply(Result<Vec<Value>>),
}

/// Default `org.freedesktop.DBus.Properties` implementation.
fn properties_call(object: &Object, call: &MethodCall) -> Result<Vec<Value>> {
    let str_arg = |n: usize| {
        call.args
            .get(n)
            .and_then(Value::as_str)
            .ok_or_else(|| DbusError::method("org.freedesktop.DBus.Error.InvalidArgs", "expected a string"))
    };
    match call.method.member.as_str() {
        "Get" => {
            let full = format!("{}.{}", str_arg(0)?, str_arg(1)?);
            object
                .props
                .get(&full)
                .map(|v| vec![v.clone()])
                .ok_or_else(|| {
                    DbusError::method(
                        "org.freedesktop.DBus.Error.UnknownProperty",
                        format!("No such property '{full}'"),
                    )
                })
        }
        "GetAll" => {
            let iface = str_arg(0)?;
            let props = object
                .props
                .iter()
                .filter_map(|(full, v)| {
                    let name = DbusName::parse(full);
                    (name.interface == iface).then(|| (name.member, v.clone()))
                })
                .collect();
            Ok(vec![Value::Dict(props)])
        }
        other => Err(DbusError::method(
            "org.freedesktop.DBus.Error.UnknownMethod",
            format!("No such method '{PROPERTIES_INTERFACE}.{other}'"),
        )),
    }
}

/// A registered fake service. Use after [`TestService::unregister`] panics.
#[derive(Clone)]
pub struct TestService {
    bus: TestBus,
    id: String,
}

impl TestService {
    /// The unique id, e.g. `:1`.
    pub fn id(&self) -> &str {
        &self.id
    }

    fn check(&self, st: &State) {
        if !st.services.contains_key(&self.id) {
            panic!("test service {} used after unregister", self.id);
        }
    }

    /// Acquire `name`, taking it from its previous owner if any.
    pub fn add_name(&self, name: &str) {
        let old = {
            let mut st = self.bus.lock();
            self.check(&st);
            st.names.insert(name.to_string(), self.id.clone())
        };
        let old = old.unwrap_or_default();
        if old != self.id {
            self.bus.emit_owner_changed(name, &old, &self.id);
        }
    }

    /// Release `name` if we own it.
    pub fn remove_name(&self, name: &str) {
        let released = {
            let mut st = self.bus.lock();
            self.check(&st);
            if st.names.get(name) == Some(&self.id) {
                st.names.remove(name);
                true
            } else {
                false
            }
        };
        if released {
            self.bus.emit_owner_changed(name, &self.id, "");
        }
    }

    /// Release every name and drop every object.
    pub fn unregister(&self) {
        let held: Vec<String> = {
            let mut st = self.bus.lock();
            self.check(&st);
            st.services.remove(&self.id);
            let held = st
                .names
                .iter()
                .filter(|(_, owner)| **owner == self.id)
                .map(|(name, _)| name.clone())
                .collect::<Vec<_>>();
            for name in &held {
                st.names.remove(name);
            }
            held
        };
        for name in &held {
            self.bus.emit_owner_changed(name, &self.id, "");
        }
        self.bus.emit_owner_changed(&self.id, &self.id, "");
    }

    /// The object at `path`, created on first use.
    pub fn object(&self, path: &str) -> TestObject {
        let mut st = self.bus.lock();
        self.check(&st);
        if let Some(svc) = st.services.get_mut(&self.id) {
            svc.objects.entry(path.to_string()).or_default();
        }
        TestObject {
            service: self.clone(),
            path: path.to_string(),
        }
    }
}

/// An object exported by a [`TestService`].
#[derive(Clone)]
pub struct TestObject {
    service: TestService,
    path: String,
}

impl TestObject {
    fn with_object<R>(&self, f: impl FnOnce(&mut Object) -> R) -> R {
        let mut st = self.service.bus.lock();
        self.service.check(&st);
        let object = st
            .services
            .get_mut(&self.service.id)
            .map(|s| s.objects.entry(self.path.clone()).or_default());
        match object {
            Some(object) => f(object),
            None => unreachable!("checked above"),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Handle calls to the fully-qualified method `member`.
    pub fn on<F>(&self, member: &str, handler: F)
    where
        F: Fn(&[Value]) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        let handler: MethodHandler = Arc::new(handler);
        self.with_object(|o| o.handlers.insert(member.to_string(), handler));
    }

    /// Handle every call without a specific handler.
    pub fn on_else<F>(&self, handler: F)
    where
        F: Fn(&DbusName, &[Value]) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        let handler: FallbackHandler = Arc::new(handler);
        self.with_object(|o| o.fallback = Some(handler));
    }

    /// Set the fully-qualified property `name` and announce it per `kind`.
    pub fn set_property(&self, name: &str, value: impl Into<Value>, kind: SignalKind) {
        let value = value.into();
        let prop = DbusName::parse(name);
        self.with_object(|o| o.props.insert(name.to_string(), value.clone()));

        let (changed, invalidated) = match kind {
            SignalKind::None => return,
            SignalKind::Changed => {
                let mut changed = BTreeMap::new();
                changed.insert(prop.member, value);
                (changed, vec![])
            }
            SignalKind::Invalidated => (BTreeMap::new(), vec![Value::Str(prop.member)]),
        };
        self.emit(
            &format!("{PROPERTIES_INTERFACE}.PropertiesChanged"),
            vec![
                Value::Str(prop.interface),
                Value::Dict(changed),
                Value::Array(invalidated),
            ],
        );
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.with_object(|o| o.props.get(name).cloned())
    }

    /// Emit the fully-qualified signal `member` from this object.
    pub fn emit(&self, member: &str, args: Vec<Value>) {
        {
            let st = self.service.bus.lock();
            self.service.check(&st);
        }
        self.service.bus.emit(Signal {
            sender: self.service.id.clone(),
            path: self.path.clone(),
            name: DbusName::parse(member),
            body: args,
        });
    }
}

/// One client connection to a [`TestBus`].
pub struct TestConnection {
    bus: TestBus,
    id: u64,
    closed: AtomicBool,
}

impl TestConnection {
    fn check_open(&self) {
        if self.closed.load(Ordering::SeqCst) {
            panic!("use of closed test bus connection {}", self.id);
        }
    }

    fn with_conn<R>(&self, f: impl FnOnce(&mut Conn) -> R) -> R {
        self.check_open();
        let mut st = self.bus.lock();
        match st.conns.get_mut(&self.id) {
            Some(conn) => f(conn),
            None => panic!("use of closed test bus connection {}", self.id),
        }
    }
}

impl Connection for TestConnection {
    fn call(&self, call: MethodCall) -> BoxFuture<'static, Result<Vec<Value>>> {
        self.check_open();
        future::ready(self.bus.call(&call)).boxed()
    }

    fn add_match(&self, rule: MatchRule) -> BoxFuture<'static, Result<()>> {
        self.with_conn(|c| c.rules.push(rule));
        future::ready(Ok(())).boxed()
    }

    fn remove_match(&self, rule: MatchRule) -> BoxFuture<'static, Result<()>> {
        self.with_conn(|c| {
            if let Some(i) = c.rules.iter().position(|r| *r == rule) {
                c.rules.remove(i);
            }
        });
        future::ready(Ok(())).boxed()
    }

    fn signals(&self) -> mpsc::UnboundedReceiver<Signal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.with_conn(|c| {
            c.subscribers.retain(|s| !s.is_closed());
            c.subscribers.push(tx);
        });
        rx
    }

    fn unique_name(&self) -> Option<String> {
        None
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.bus.lock().conns.remove(&self.id);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for TestConnection {
    fn drop(&mut self) {
        self.close();
    }
}
