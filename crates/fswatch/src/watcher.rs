use crate::error::{Result, WatchError};
use crate::hierarchy::{Hierarchy, Step};
use bar_core::{notifier, Listener, Notifier, TryNotified};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Attempts at placing a watch before giving up, when directories keep
/// vanishing underneath the walk.
const WATCH_ATTEMPTS: usize = 8;

type RawSender = mpsc::UnboundedSender<notify::Result<Event>>;

/// Watches one file, following it through creation, deletion and the
/// deletion or recreation of any of its parent directories.
///
/// Must be created inside a tokio runtime.
///
/// # Example
/// ```no_run
/// # async fn demo() -> bar_fswatch::Result<()> {
/// let mut w = bar_fswatch::FileWatcher::watch("/sys/class/power_supply/BAT0/capacity")?;
/// while let Some(event) = w.next().await {
///     event?;
///     // re-read the file
/// }
/// # Ok(())
/// # }
/// ```
pub struct FileWatcher {
    path: PathBuf,
    changes: Listener,
    errors: mpsc::UnboundedReceiver<WatchError>,
    cancel: CancellationToken,
    closed: bool,
}

impl FileWatcher {
    pub fn watch(path: impl AsRef<Path>) -> Result<Self> {
        // Unbounded: placing a watch blocks on the backend thread, which
        // must never be stuck delivering to us at that moment.
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        Self::start(path.as_ref(), raw_tx, raw_rx)
    }

    fn start(path: &Path, raw_tx: RawSender, raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>) -> Result<Self> {
        let target = std::path::absolute(path)?;
        if target.parent().is_none() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "cannot watch the filesystem root").into());
        }

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            Config::default(),
        )?;

        let (fire, changes) = notifier();
        let (err_tx, errors) = mpsc::unbounded_channel();
        let mut walker = Walker {
            watcher,
            hierarchy: Hierarchy::new(target.clone()),
            watching: None,
            changed: fire,
            errors: err_tx,
        };
        walker.rewatch(0)?;

        let cancel = CancellationToken::new();
        tokio::spawn(walker.run(raw_rx, cancel.clone()));

        Ok(Self {
            path: target,
            changes,
            errors,
            cancel,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next change or error. Changes are coalesced; an error is
    /// final and the watcher should be dropped after one. `None` once
    /// unsubscribed.
    pub async fn next(&mut self) -> Option<Result<()>> {
        if self.closed {
            return None;
        }
        tokio::select! {
            biased;
            Some(err) = self.errors.recv() => Some(Err(err)),
            changed = self.changes.notified() => changed.then_some(Ok(())),
        }
    }

    /// Drain a pending change, if any.
    pub fn try_changed(&mut self) -> bool {
        !self.closed && self.changes.try_notified() == TryNotified::Notified
    }

    pub fn try_error(&mut self) -> Option<WatchError> {
        self.errors.try_recv().ok()
    }

    /// Stop watching. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.errors.close();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct Walker {
    watcher: RecommendedWatcher,
    hierarchy: Hierarchy,
    watching: Option<PathBuf>,
    changed: Notifier,
    errors: mpsc::UnboundedSender<WatchError>,
}

impl Walker {
    async fn run(mut self, mut raw: mpsc::UnboundedReceiver<notify::Result<Event>>, cancel: CancellationToken) {
        loop {
            let res = tokio::select! {
                _ = cancel.cancelled() => break,
                res = raw.recv() => match res {
                    Some(res) => res,
                    None => break,
                },
            };
            let outcome = res.map_err(WatchError::from).and_then(|event| self.handle(&event));
            if let Err(e) = outcome {
                warn!(path = %self.hierarchy.target().display(), "file watcher failed: {e}");
                let _ = self.errors.send(e);
                break;
            }
        }
        debug!(path = %self.hierarchy.target().display(), "file watcher stopped");
    }

    fn handle(&mut self, event: &Event) -> Result<()> {
        for path in &event.paths {
            match self.hierarchy.classify(&event.kind, path) {
                Step::Ignore => {}
                Step::Changed => self.changed.notify(),
                Step::Restart => {
                    debug!(dir = %path.display(), "watched directory went away, restarting walk");
                    self.rewatch(0)?;
                    self.notify_if_present();
                }
                Step::Descend => {
                    self.rewatch(self.hierarchy.level() + 1)?;
                    self.notify_if_present();
                }
            }
        }
        Ok(())
    }

    fn notify_if_present(&self) {
        if self.hierarchy.target().exists() {
            self.changed.notify();
        }
    }

    /// Move the single watch to the deepest existing directory at or below
    /// level `from`.
    fn rewatch(&mut self, mut from: usize) -> Result<()> {
        if let Some(old) = self.watching.take() {
            // Fails harmlessly when the directory is already gone.
            let _ = self.watcher.unwatch(&old);
        }
        let mut attempts = 0;
        loop {
            let level = self.hierarchy.deepest_existing(from);
            let dir = self.hierarchy.dir(level).to_path_buf();
            match self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    debug!(dir = %dir.display(), "watching");
                    self.hierarchy.set_level(level);
                    self.watching = Some(dir);
                    return Ok(());
                }
                Err(e) if is_missing(&e) && attempts < WATCH_ATTEMPTS => {
                    attempts += 1;
                    from = 0;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_missing(e: &notify::Error) -> bool {
    match &e.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) => io.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}
