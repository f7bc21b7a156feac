//! Edge-triggered, coalescing "something changed" signal.
//!
//! A [`Notifier`] and its [`Listener`] share a single-slot channel: any
//! number of [`Notifier::notify`] calls between two receives collapse into
//! one wakeup. Dropping every `Notifier` closes the listener, which lets
//! watchers announce that they are done.

use tokio::sync::mpsc;

/// Sending half. Cheap to clone; every clone fires the same listener.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<()>,
}

/// Receiving half.
#[derive(Debug)]
pub struct Listener {
    rx: mpsc::Receiver<()>,
}

/// Outcome of a non-blocking check on a [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryNotified {
    /// At least one `notify` happened since the last receive.
    Notified,
    /// Nothing pending.
    Empty,
    /// All notifiers are gone and nothing is pending.
    Closed,
}

/// Create a connected `(Notifier, Listener)` pair.
pub fn notifier() -> (Notifier, Listener) {
    let (tx, rx) = mpsc::channel(1);
    (Notifier { tx }, Listener { rx })
}

impl Notifier {
    /// Signal the listener. A no-op if a signal is already pending or the
    /// listener is gone.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// Whether the listener has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Listener {
    /// Wait for the next signal. Returns `false` once the channel is closed.
    pub async fn notified(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Check for a pending signal without waiting, draining it if present.
    pub fn try_notified(&mut self) -> TryNotified {
        match self.rx.try_recv() {
            Ok(()) => TryNotified::Notified,
            Err(mpsc::error::TryRecvError::Empty) => TryNotified::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => TryNotified::Closed,
        }
    }

    /// Blocking variant of [`Listener::notified`] for use off the runtime.
    ///
    /// Panics if called from within an async context.
    pub fn blocking_notified(&mut self) -> bool {
        self.rx.blocking_recv().is_some()
    }
}
