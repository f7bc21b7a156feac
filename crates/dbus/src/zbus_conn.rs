//! [`Connection`] backed by a real bus through `zbus`.

use crate::connection::{Connection, MethodCall, Signal, DBUS_INTERFACE, DBUS_PATH, DBUS_SERVICE};
use crate::error::{DbusError, Result};
use crate::name::DbusName;
use crate::rule::MatchRule;
use crate::value::Value;
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zbus::message::Type as MessageType;
use zbus::zvariant::{self, StructureBuilder};

#[derive(Default)]
struct Routing {
    rules: Vec<MatchRule>,
    subscribers: Vec<mpsc::UnboundedSender<Signal>>,
}

struct Inner {
    conn: Mutex<Option<zbus::Connection>>,
    routing: Mutex<Routing>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn routing(&self) -> MutexGuard<'_, Routing> {
        self.routing.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn conn(&self) -> zbus::Connection {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(conn) => conn.clone(),
            None => panic!("use of closed D-Bus connection"),
        }
    }
}

pub struct ZbusConnection {
    inner: Arc<Inner>,
}

impl ZbusConnection {
    pub async fn session() -> Result<Self> {
        Ok(Self::new(zbus::Connection::session().await?))
    }

    pub async fn system() -> Result<Self> {
        Ok(Self::new(zbus::Connection::system().await?))
    }

    /// Wrap an established connection and start routing its signals.
    pub fn new(conn: zbus::Connection) -> Self {
        let inner = Arc::new(Inner {
            conn: Mutex::new(Some(conn.clone())),
            routing: Mutex::new(Routing::default()),
            reader: Mutex::new(None),
        });
        let reader = tokio::spawn(read_signals(conn, Arc::downgrade(&inner)));
        *inner.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(reader);
        Self { inner }
    }

    async fn driver_call(conn: zbus::Connection, member: &str, rule: String) -> Result<()> {
        conn.call_method(Some(DBUS_SERVICE), DBUS_PATH, Some(DBUS_INTERFACE), member, &(rule,))
            .await
            .map_err(map_error)?;
        Ok(())
    }
}

/// Forward every incoming signal that matches one of our rules.
async fn read_signals(conn: zbus::Connection, inner: std::sync::Weak<Inner>) {
    let mut stream = zbus::MessageStream::from(&conn);
    drop(conn);
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!("D-Bus read error: {e}");
                continue;
            }
        };
        if msg.message_type() != MessageType::Signal {
            continue;
        }
        let Some(signal) = decode_signal(&msg) else {
            continue;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let to: Vec<_> = {
            let mut routing = inner.routing();
            if !routing.rules.iter().any(|r| r.matches(&signal)) {
                continue;
            }
            routing.subscribers.retain(|s| !s.is_closed());
            routing.subscribers.clone()
        };
        for tx in to {
            let _ = tx.send(signal.clone());
        }
    }
    debug!("D-Bus signal reader finished");
}

fn decode_signal(msg: &zbus::Message) -> Option<Signal> {
    let header = msg.header();
    let interface = header.interface()?.to_string();
    let member = header.member()?.to_string();
    Some(Signal {
        sender: header.sender().map(|s| s.to_string()).unwrap_or_default(),
        path: header.path().map(|p| p.to_string()).unwrap_or_default(),
        name: DbusName::new(interface, member),
        body: decode_body(msg).ok()?,
    })
}

fn decode_body(msg: &zbus::Message) -> Result<Vec<Value>> {
    let body = msg.body();
    if body.signature().to_string().is_empty() {
        return Ok(Vec::new());
    }
    let fields: zvariant::Structure<'_> = body
        .deserialize()
        .map_err(|e| DbusError::InvalidValue(e.to_string()))?;
    Ok(fields.fields().iter().map(from_zvariant).collect())
}

fn from_zvariant(v: &zvariant::Value<'_>) -> Value {
    use zvariant::Value as Z;
    match v {
        Z::U8(n) => Value::Byte(*n),
        Z::Bool(b) => Value::Bool(*b),
        Z::I16(n) => Value::I32((*n).into()),
        Z::U16(n) => Value::U32((*n).into()),
        Z::I32(n) => Value::I32(*n),
        Z::U32(n) => Value::U32(*n),
        Z::I64(n) => Value::I64(*n),
        Z::U64(n) => Value::U64(*n),
        Z::F64(n) => Value::F64(*n),
        Z::Str(s) => Value::Str(s.to_string()),
        Z::Signature(s) => Value::Str(s.to_string()),
        Z::ObjectPath(p) => Value::ObjectPath(p.to_string()),
        Z::Value(inner) => from_zvariant(inner),
        Z::Array(items) => Value::Array(items.iter().map(from_zvariant).collect()),
        Z::Dict(dict) => Value::Dict(
            dict.iter()
                .map(|(k, v)| {
                    let key = match from_zvariant(k) {
                        Value::Str(s) | Value::ObjectPath(s) => s,
                        other => other.to_string(),
                    };
                    (key, from_zvariant(v))
                })
                .collect(),
        ),
        Z::Structure(s) => Value::Struct(s.fields().iter().map(from_zvariant).collect()),
        other => Value::Str(format!("{other:?}")),
    }
}

/// Convert a composite value; nested values travel as variants.
fn to_zvariant(v: &Value) -> Result<zvariant::Value<'static>> {
    Ok(match v {
        Value::Bool(b) => (*b).into(),
        Value::Byte(n) => (*n).into(),
        Value::I32(n) => (*n).into(),
        Value::U32(n) => (*n).into(),
        Value::I64(n) => (*n).into(),
        Value::U64(n) => (*n).into(),
        Value::F64(n) => (*n).into(),
        Value::Str(s) => s.clone().into(),
        Value::ObjectPath(p) => zvariant::ObjectPath::try_from(p.clone())
            .map_err(|e| DbusError::InvalidValue(e.to_string()))?
            .into(),
        Value::Array(items) => items
            .iter()
            .map(to_zvariant)
            .collect::<Result<Vec<_>>>()?
            .into(),
        Value::Dict(dict) => dict
            .iter()
            .map(|(k, v)| Ok((k.clone(), to_zvariant(v)?)))
            .collect::<Result<HashMap<String, zvariant::Value<'static>>>>()?
            .into(),
        Value::Struct(fields) => {
            let mut builder = StructureBuilder::new();
            for field in fields {
                builder = builder.append_field(to_zvariant(field)?);
            }
            builder
                .build()
                .map_err(|e| DbusError::InvalidValue(e.to_string()))?
                .into()
        }
    })
}

/// Build a method-call body from positional arguments.
fn encode_args(args: &[Value]) -> Result<zvariant::Structure<'static>> {
    let mut builder = StructureBuilder::new();
    for arg in args {
        builder = match arg {
            Value::Bool(b) => builder.append_field((*b).into()),
            Value::Byte(n) => builder.append_field((*n).into()),
            Value::I32(n) => builder.append_field((*n).into()),
            Value::U32(n) => builder.append_field((*n).into()),
            Value::I64(n) => builder.append_field((*n).into()),
            Value::U64(n) => builder.append_field((*n).into()),
            Value::F64(n) => builder.append_field((*n).into()),
            Value::Str(s) => builder.append_field(s.clone().into()),
            Value::ObjectPath(p) => builder.append_field(
                zvariant::ObjectPath::try_from(p.clone()).map_err(|e| DbusError::InvalidValue(e.to_string()))?.into(),
            ),
            composite => builder.append_field(to_zvariant(composite)?),
        };
    }
    builder.build().map_err(|e| DbusError::InvalidValue(e.to_string()))
}

fn map_error(e: zbus::Error) -> DbusError {
    match e {
        zbus::Error::MethodError(name, detail, _) => DbusError::method(name.to_string(), detail.unwrap_or_default()),
        other => DbusError::Zbus(other),
    }
}

impl Connection for ZbusConnection {
    fn call(&self, call: MethodCall) -> BoxFuture<'static, Result<Vec<Value>>> {
        let conn = self.inner.conn();
        async move {
            let iface = call.method.interface.clone();
            let reply = if call.args.is_empty() {
                conn.call_method(
                    Some(call.destination.as_str()),
                    call.path.as_str(),
                    Some(iface.as_str()),
                    call.method.member.as_str(),
                    &(),
                )
                .await
            } else {
                let body = encode_args(&call.args)?;
                conn.call_method(
                    Some(call.destination.as_str()),
                    call.path.as_str(),
                    Some(iface.as_str()),
                    call.method.member.as_str(),
                    &body,
                )
                .await
            };
            decode_body(&reply.map_err(map_error)?)
        }
        .boxed()
    }

    fn add_match(&self, rule: MatchRule) -> BoxFuture<'static, Result<()>> {
        let conn = self.inner.conn();
        let inner = self.inner.clone();
        async move {
            Self::driver_call(conn, "AddMatch", rule.to_string()).await?;
            inner.routing().rules.push(rule);
            Ok(())
        }
        .boxed()
    }

    fn remove_match(&self, rule: MatchRule) -> BoxFuture<'static, Result<()>> {
        let conn = self.inner.conn();
        let removed = {
            let mut routing = self.inner.routing();
            match routing.rules.iter().position(|r| *r == rule) {
                Some(i) => {
                    routing.rules.remove(i);
                    true
                }
                None => false,
            }
        };
        async move {
            if removed {
                Self::driver_call(conn, "RemoveMatch", rule.to_string()).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn signals(&self) -> mpsc::UnboundedReceiver<Signal> {
        // Fails loudly on a closed connection like every other method.
        let _ = self.inner.conn();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.routing().subscribers.push(tx);
        rx
    }

    fn unique_name(&self) -> Option<String> {
        self.inner.conn().unique_name().map(|n| n.to_string())
    }

    fn close(&self) {
        let conn = self.inner.conn.lock().unwrap_or_else(|e| e.into_inner()).take();
        if conn.is_none() {
            return;
        }
        if let Some(reader) = self.inner.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
        let mut routing = self.inner.routing();
        routing.rules.clear();
        routing.subscribers.clear();
    }

    fn is_closed(&self) -> bool {
        self.inner.conn.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

impl Drop for ZbusConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn converts_nested_values() {
        let mut dict = BTreeMap::new();
        dict.insert("k".to_string(), Value::from(vec![1i32, 2]));
        let z = to_zvariant(&Value::Dict(dict.clone())).unwrap();
        assert_eq!(from_zvariant(&z), Value::Dict(dict));

        let path = to_zvariant(&Value::object_path("/org/x")).unwrap();
        assert_eq!(from_zvariant(&path), Value::object_path("/org/x"));
        assert!(to_zvariant(&Value::object_path("not a path")).is_err());
    }

    #[test]
    fn encodes_positional_args() {
        let body = encode_args(&["a".into(), 7u32.into()]).unwrap();
        let fields: Vec<Value> = body.fields().iter().map(from_zvariant).collect();
        assert_eq!(fields, vec![Value::from("a"), Value::U32(7)]);
    }
}
