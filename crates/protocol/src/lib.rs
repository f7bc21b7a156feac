//! The i3bar protocol, version 1: the header and status lines written to
//! stdout, and the click events read back from stdin.

pub mod block;
pub mod click;
pub mod header;
pub mod writer;

pub use block::{encode_line, Block, BlockMinWidth};
pub use click::{Click, ClickDecoder, ClickStream};
pub use header::Header;
pub use writer::LineWriter;
