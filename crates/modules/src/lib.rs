//! Sample modules for the bar binary.
//!
//! Each one is small on purpose: they poll or subscribe to one source and
//! format it, leaving scheduling, identifiers and click routing to the
//! runtime.

pub mod battery;
pub mod clock;
pub mod file;
pub mod link;
pub mod text;

pub use battery::BatteryModule;
pub use clock::ClockModule;
pub use file::FileModule;
pub use link::LinkModule;
pub use text::TextModule;

use anyhow::{bail, Context};
use bar_config::{ModuleConfig, ModuleKind};
use bar_core::Module;
use std::sync::Arc;
use std::time::Duration;

/// Build the module described by one `[[module]]` entry.
pub fn from_config(cfg: &ModuleConfig) -> anyhow::Result<Arc<dyn Module>> {
    let module: Arc<dyn Module> = match cfg.kind {
        ModuleKind::Clock => Arc::new(match cfg.str_option("format") {
            Some(format) => ClockModule::parse(format)?,
            None => ClockModule::default(),
        }),
        ModuleKind::Text => {
            let text = cfg.str_option("text").context("text module needs a `text` option")?;
            Arc::new(TextModule::new(text))
        }
        ModuleKind::Link => Arc::new(match cfg.str_option("name") {
            Some(name) => LinkModule::named(name),
            None => LinkModule::any(),
        }),
        ModuleKind::Battery => {
            let mut battery = BatteryModule::default();
            if let Some(name) = cfg.str_option("name") {
                battery = battery.name(name);
            }
            if let Some(root) = cfg.str_option("root") {
                battery = battery.root(root);
            }
            if let Some(secs) = cfg.int_option("interval_secs") {
                battery = battery.interval(positive_secs(secs)?);
            }
            Arc::new(battery)
        }
        ModuleKind::File => {
            let path = cfg.str_option("path").context("file module needs a `path` option")?;
            Arc::new(FileModule::new(path))
        }
    };
    Ok(module)
}

fn positive_secs(secs: i64) -> anyhow::Result<Duration> {
    match u64::try_from(secs) {
        Ok(s) if s > 0 => Ok(Duration::from_secs(s)),
        _ => bail!("interval_secs must be positive, got {secs}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: ModuleKind, options: &[(&str, toml::Value)]) -> ModuleConfig {
        let mut cfg = ModuleConfig::new(kind);
        for (k, v) in options {
            cfg.options.insert(k.to_string(), v.clone());
        }
        cfg
    }

    #[test]
    fn required_options_are_checked() {
        assert!(from_config(&entry(ModuleKind::Text, &[])).is_err());
        assert!(from_config(&entry(ModuleKind::File, &[])).is_err());
        assert!(from_config(&entry(ModuleKind::Text, &[("text", toml::Value::from("hi"))])).is_ok());
        assert!(from_config(&entry(ModuleKind::Clock, &[])).is_ok());
        assert!(from_config(&entry(ModuleKind::Link, &[])).is_ok());
    }

    #[test]
    fn battery_interval_must_be_positive() {
        let bad = entry(ModuleKind::Battery, &[("interval_secs", toml::Value::Integer(0))]);
        assert!(from_config(&bad).is_err());
        let good = entry(ModuleKind::Battery, &[("interval_secs", toml::Value::Integer(10))]);
        assert!(from_config(&good).is_ok());
    }
}
