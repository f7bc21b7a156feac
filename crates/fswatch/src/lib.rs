//! Watching a single file that may not exist yet, or whose parent
//! directories may come and go.

mod error;
mod hierarchy;
mod watcher;

pub use error::{Result, WatchError};
pub use watcher::FileWatcher;
