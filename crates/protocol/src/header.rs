use serde::{Deserialize, Serialize};

/// First line of the protocol stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub click_events: bool,
    pub stop_signal: i32,
    pub cont_signal: i32,
}

impl Header {
    pub fn new(stop_signal: i32, cont_signal: i32) -> Self {
        Self {
            version: 1,
            click_events: true,
            stop_signal,
            cont_signal,
        }
    }

    /// The header line followed by the opening of the endless status array.
    pub fn preamble(&self) -> String {
        // A struct of integers and bools always serializes.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{json}\n[\n")
    }
}
