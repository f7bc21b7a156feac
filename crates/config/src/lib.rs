pub mod schema;
pub mod signal;

pub use schema::{BarConfig, BarSection, LogConfig, ModuleConfig, ModuleKind};
pub use signal::parse_signal;

use bar_core::{BarError, Result};
use std::path::{Path, PathBuf};

impl BarConfig {
    /// `(stop, cont)` signal numbers.
    pub fn signals(&self) -> Result<(i32, i32)> {
        Ok((parse_signal(&self.bar.stop_signal)?, parse_signal(&self.bar.cont_signal)?))
    }
}

/// Parse and validate a configuration document.
pub fn parse(raw: &str) -> Result<BarConfig> {
    let config: BarConfig = toml::from_str(raw).map_err(|e| BarError::Config(format!("TOML parse error: {e}")))?;
    let (stop, cont) = config.signals()?;
    if stop == cont {
        return Err(BarError::Config("stop_signal and cont_signal must differ".into()));
    }
    Ok(config)
}

/// Load configuration from a TOML file.  Returns `BarConfig::default()` if
/// the file doesn't exist so the bar always has sensible defaults.
pub fn load(path: impl AsRef<Path>) -> Result<BarConfig> {
    Ok(try_load(path)?.unwrap_or_default())
}

/// Like [`load`], but `None` when the file doesn't exist so the caller can
/// report it once logging is up.
pub fn try_load(path: impl AsRef<Path>) -> Result<Option<BarConfig>> {
    let path = path.as_ref();
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BarError::Config(format!("cannot read '{}': {e}", path.display()))),
    };
    parse(&raw).map(Some)
}

/// Return the default config path, honouring `$XDG_CONFIG_HOME`.
pub fn default_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("bar").join("bar.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_document() {
        let config = parse(
            r#"
            [bar]
            stop_signal = "SIGUSR2"
            cont_signal = "USR1"
            debounce_ms = 5
            error_command = []

            [log]
            level = "debug"

            [[module]]
            kind = "clock"
            format = "%H:%M"

            [[module]]
            kind = "link"
            interface = "eno1"
            "#,
        )
        .unwrap();
        assert_eq!(config.signals().unwrap(), (libc::SIGUSR2, libc::SIGUSR1));
        assert_eq!(config.bar.debounce_ms, 5);
        assert!(config.bar.error_command.is_empty());
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.modules[0].kind, ModuleKind::Clock);
        assert_eq!(config.modules[0].str_option("format"), Some("%H:%M"));
        assert_eq!(config.modules[1].str_option("interface"), Some("eno1"));
    }

    #[test]
    fn empty_document_is_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, BarConfig::default());
        assert_eq!(config.signals().unwrap(), (libc::SIGUSR1, libc::SIGUSR2));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse("[[module]]\nkind = \"weather\""), Err(BarError::Config(_))));
        assert!(matches!(parse("[bar]\nstop_signal = \"SIGNOPE\""), Err(BarError::Config(_))));
        assert!(matches!(
            parse("[bar]\nstop_signal = \"USR1\"\ncont_signal = \"SIGUSR1\""),
            Err(BarError::Config(_))
        ));
        assert!(parse("[bar").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(load(tmp.path().join("nope.toml")).unwrap(), BarConfig::default());
        assert_eq!(try_load(tmp.path().join("nope.toml")).unwrap(), None);

        let path = tmp.path().join("bar.toml");
        std::fs::write(&path, "[log]\nlevel = \"warn\"\n").unwrap();
        assert_eq!(load(&path).unwrap().log.level, "warn");
        assert_eq!(try_load(&path).unwrap().map(|c| c.log.level), Some("warn".to_string()));
    }
}
