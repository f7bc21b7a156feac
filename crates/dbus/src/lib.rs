//! Reactive helpers over the D-Bus message bus.
//!
//! [`NameOwnerWatcher`] follows who owns a well-known name and
//! [`PropertiesWatcher`] follows an object's properties across owner
//! changes. Both work against any [`Connection`]: a real session or system
//! bus through `zbus`, or the in-process [`TestBus`].

pub mod bus;
pub mod connection;
pub mod error;
pub mod name;
pub mod owner;
pub mod properties;
pub mod rule;
pub mod testbus;
pub mod value;
mod zbus_conn;

pub use bus::{setup_test_bus, Bus};
pub use connection::{Connection, MethodCall, Signal};
pub use error::{DbusError, Result};
pub use name::{expand, shorten, DbusName};
pub use owner::{NameOwnerWatcher, OwnerChange};
pub use properties::{watch_properties, Change, PropertiesChange, PropertiesWatcher, PropertiesWatcherBuilder, SignalUpdate};
pub use rule::{MatchKey, MatchRule};
pub use testbus::{SignalKind, TestBus, TestObject, TestService};
pub use value::Value;
pub use zbus_conn::ZbusConnection;
