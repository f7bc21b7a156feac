use serde::{Deserialize, Serialize};

/// Root configuration structure parsed from `bar.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfig {
    pub bar: BarSection,
    pub log: LogConfig,
    /// Sample modules for the bundled binary, left to right.
    #[serde(rename = "module")]
    pub modules: Vec<ModuleConfig>,
}

/// Protocol and runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarSection {
    /// Announced in the header; receiving it pauses the bar.
    pub stop_signal: String,
    /// Announced in the header; receiving it resumes the bar.
    pub cont_signal: String,
    /// Extra window, in milliseconds, for collecting updates into one line.
    pub debounce_ms: u64,
    /// Run with the error message appended when an error segment is
    /// right-clicked. Empty disables the default handler.
    pub error_command: Vec<String>,
}

impl Default for BarSection {
    fn default() -> Self {
        Self {
            stop_signal: "SIGUSR1".to_string(),
            cont_signal: "SIGUSR2".to_string(),
            debounce_ms: 0,
            error_command: vec!["i3-nagbar".to_string(), "-m".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Clock,
    Text,
    Link,
    Battery,
    File,
}

/// One `[[module]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub kind: ModuleKind,
    /// Everything else in the table, handed to the module.
    #[serde(default, flatten)]
    pub options: toml::Table,
}

impl ModuleConfig {
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            options: toml::Table::new(),
        }
    }

    pub fn str_option(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(toml::Value::as_str)
    }

    pub fn int_option(&self, key: &str) -> Option<i64> {
        self.options.get(key).and_then(toml::Value::as_integer)
    }
}
