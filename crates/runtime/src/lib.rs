//! The bar loop: runs modules, merges their outputs into status lines and
//! routes clicks back to them.
//!
//! ```no_run
//! # async fn demo(clock: impl bar_core::Module, battery: impl bar_core::Module) -> bar_core::Result<()> {
//! bar_runtime::Bar::new(bar_runtime::BarOptions::default())
//!     .add(clock)
//!     .add(battery)
//!     .run()
//!     .await
//! # }
//! ```

mod bar;
mod engine;
pub mod error_handler;
mod ids;
mod options;
mod refresh;
mod slot;

pub use bar::{Bar, BarHandle};
pub use error_handler::{reset_error_handler, set_error_handler, ErrorReport, ErrorTrigger};
pub use options::BarOptions;
pub use slot::ModuleState;
