//! Shared building blocks for the bar: the output model handed to the
//! runtime, click events routed back to modules, and the small signalling
//! primitives (`Notifier`, `Value`) the watchers are built on.

pub mod cadence;
pub mod color;
pub mod error;
pub mod event;
pub mod group;
pub mod module;
pub mod notifier;
pub mod output;
pub mod segment;
pub mod value;

pub use cadence::Cadence;
pub use color::Color;
pub use error::{BarError, Result};
pub use event::{Button, Event, Modifier};
pub use group::SegmentGroup;
pub use module::{Module, Sink};
pub use notifier::{notifier, Listener, Notifier, TryNotified};
pub use output::{Output, TimedOutput};
pub use segment::{Align, Attrs, ClickHandler, Content, MinWidth, Segment};
pub use value::{Subscription, Value};
