//! bar: an i3bar-protocol status line generator.
//!
//! Run with:  `bar [CONFIG]` from the `status_command` of i3 or sway.
//! stdout carries the protocol, logs go to stderr (`RUST_LOG` overrides the
//! configured level).

use anyhow::{Context, Result};
use bar_config::{BarConfig, ModuleConfig, ModuleKind};
use bar_runtime::{Bar, BarOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(bar_config::default_path);
    let loaded = bar_config::try_load(&path)?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .init();

    tracing::info!("bar v{} starting", env!("CARGO_PKG_VERSION"));
    if !found {
        tracing::warn!("no config at '{}'; using defaults", path.display());
    }

    let options = options(&config)?;
    let mut bar = Bar::new(options);
    for entry in modules(&config) {
        let module = bar_modules::from_config(&entry)
            .with_context(|| format!("configuring {:?} module", entry.kind))?;
        bar = bar.add_shared(module);
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(bar.run())?;
    Ok(())
}

fn options(config: &BarConfig) -> Result<BarOptions> {
    let (stop_signal, cont_signal) = config.signals()?;
    Ok(BarOptions {
        stop_signal,
        cont_signal,
        debounce: Duration::from_millis(config.bar.debounce_ms),
        error_command: config.bar.error_command.clone(),
    })
}

/// The configured modules, or a network link and a clock when none are.
fn modules(config: &BarConfig) -> Vec<ModuleConfig> {
    if config.modules.is_empty() {
        vec![ModuleConfig::new(ModuleKind::Link), ModuleConfig::new(ModuleKind::Clock)]
    } else {
        config.modules.clone()
    }
}
