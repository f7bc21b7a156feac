use crate::connection::Connection;
use crate::error::Result;
use crate::testbus::TestBus;
use crate::zbus_conn::ZbusConnection;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Which bus to talk to.
#[derive(Clone)]
pub enum Bus {
    Session,
    System,
    Test(TestBus),
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bus::Session => f.write_str("Session"),
            Bus::System => f.write_str("System"),
            Bus::Test(_) => f.write_str("Test"),
        }
    }
}

thread_local! {
    static TEST_BUS: RefCell<Option<TestBus>> = const { RefCell::new(None) };
}

/// Create a fresh fake bus for the current thread and return it.
pub fn setup_test_bus() -> TestBus {
    let bus = TestBus::new();
    TEST_BUS.with(|b| *b.borrow_mut() = Some(bus.clone()));
    bus
}

struct Pool {
    session: Option<Arc<dyn Connection>>,
    system: Option<Arc<dyn Connection>>,
}

static POOL: Mutex<Pool> = Mutex::const_new(Pool {
    session: None,
    system: None,
});

impl Bus {
    /// The fake bus set up by [`setup_test_bus`] on this thread.
    ///
    /// Panics if no test bus has been set up.
    pub fn test() -> Bus {
        match TEST_BUS.with(|b| b.borrow().clone()) {
            Some(bus) => Bus::Test(bus),
            None => panic!("Bus::test() called before setup_test_bus()"),
        }
    }

    /// Open a new private connection, closed when the caller is done.
    pub async fn connect(&self) -> Result<Arc<dyn Connection>> {
        Ok(match self {
            Bus::Session => Arc::new(ZbusConnection::session().await?),
            Bus::System => Arc::new(ZbusConnection::system().await?),
            Bus::Test(bus) => bus.connect(),
        })
    }

    /// The process-wide connection for this bus kind, opened on first use
    /// and reopened if it was closed.
    pub async fn shared(&self) -> Result<Arc<dyn Connection>> {
        let mut pool = POOL.lock().await;
        let slot = match self {
            Bus::Session => &mut pool.session,
            Bus::System => &mut pool.system,
            Bus::Test(bus) => return Ok(bus.shared()),
        };
        if let Some(conn) = slot.as_ref().filter(|c| !c.is_closed()) {
            return Ok(conn.clone());
        }
        debug!(bus = ?self, "opening shared D-Bus connection");
        let conn = self.connect().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "before setup_test_bus")]
    fn test_bus_requires_setup() {
        let _ = Bus::test();
    }

    #[tokio::test]
    async fn shared_connection_is_reused() {
        setup_test_bus();
        let bus = Bus::test();
        let a = bus.shared().await.unwrap();
        let b = bus.shared().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.close();
        let c = bus.shared().await.unwrap();
        assert!(!c.is_closed());
    }
}
