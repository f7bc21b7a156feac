use anyhow::Context;
use bar_core::{Color, Module, Output, Segment, Sink};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SYSFS_ROOT: &str = "/sys/class/power_supply";
const LOW_PERCENT: u8 = 15;

/// One reading of a sysfs power supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub percent: u8,
    pub charging: bool,
    /// Minutes until empty (discharging) or full (charging), when the
    /// supply reports energy and power.
    pub remaining_min: Option<u32>,
}

/// Battery level, charging state and estimated time remaining, polled
/// from the Linux sysfs power-supply interface.
#[derive(Debug, Clone)]
pub struct BatteryModule {
    root: PathBuf,
    name: Option<String>,
    interval: Duration,
}

impl Default for BatteryModule {
    fn default() -> Self {
        Self {
            root: PathBuf::from(SYSFS_ROOT),
            name: None,
            interval: Duration::from_secs(30),
        }
    }
}

impl BatteryModule {
    /// Watch a specific supply (e.g. `BAT1`) instead of the first battery.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn supply(&self) -> anyhow::Result<PathBuf> {
        if let Some(name) = &self.name {
            return Ok(self.root.join(name));
        }
        ["BAT0", "BAT1", "BAT2"]
            .iter()
            .map(|n| self.root.join(n))
            .find(|p| p.exists())
            .with_context(|| format!("no battery under {}", self.root.display()))
    }
}

impl Module for BatteryModule {
    fn stream(&self, sink: Sink) -> BoxFuture<'static, anyhow::Result<()>> {
        let this = self.clone();
        Box::pin(async move {
            let supply = this.supply()?;
            debug!(supply = %supply.display(), "polling battery");
            let mut sch = bar_timing::new_scheduler();
            sch.every(this.interval);
            loop {
                // A failed read keeps the last reading up until the next poll.
                match read(&supply) {
                    Ok(reading) => sink.output(render(reading)),
                    Err(e) => debug!(supply = %supply.display(), "battery read failed: {e:#}"),
                }
                sch.tick().await;
            }
        })
    }
}

/// Read one supply directory.
pub fn read(supply: &Path) -> anyhow::Result<Reading> {
    let attr = |name: &str| -> anyhow::Result<String> {
        let path = supply.join(name);
        let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(raw.trim().to_string())
    };
    let optional = |name: &str| attr(name).ok().and_then(|v| v.parse::<u64>().ok());

    let percent: u8 = attr("capacity")?.parse().context("malformed battery capacity")?;
    let charging = matches!(attr("status")?.as_str(), "Charging" | "Full");

    let remaining_min = match (optional("energy_now"), optional("energy_full"), optional("power_now")) {
        (Some(now), Some(full), Some(power)) if power > 0 => {
            let left = if charging { full.saturating_sub(now) } else { now };
            u32::try_from(left * 60 / power).ok()
        }
        _ => None,
    };

    Ok(Reading {
        percent: percent.min(100),
        charging,
        remaining_min,
    })
}

pub(crate) fn render(r: Reading) -> Output {
    let icon = icon(r.percent, r.charging);
    let pct = r.percent;
    let text = match format_time(r.remaining_min) {
        time if time.is_empty() => format!("{icon} {pct}%"),
        time => format!("{icon} {pct}% ({time})"),
    };
    let segment = Segment::text(text).short_text(format!("{pct}%"));
    if pct <= LOW_PERCENT && !r.charging {
        segment.color(Color::RED).urgent(true).into()
    } else {
        segment.into()
    }
}

fn icon(pct: u8, charging: bool) -> &'static str {
    if charging {
        return "⚡";
    }
    match pct {
        80..=100 => "█",
        60..=79 => "▊",
        40..=59 => "▌",
        20..=39 => "▎",
        _ => "▏",
    }
}

/// "1h 23m" or "45m"; empty when unknown.
fn format_time(mins: Option<u32>) -> String {
    match mins {
        Some(m) if m >= 60 => format!("{}h {}m", m / 60, m % 60),
        Some(m) if m > 0 => format!("{m}m"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::UNIX_EPOCH;

    fn supply(dir: &Path, name: &str, attrs: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(&path).unwrap();
        for (k, v) in attrs {
            fs::write(path.join(k), format!("{v}\n")).unwrap();
        }
        path
    }

    #[test]
    fn reads_capacity_and_time_left() {
        let dir = tempfile::tempdir().unwrap();
        let bat = supply(
            dir.path(),
            "BAT0",
            &[
                ("capacity", "42"),
                ("status", "Discharging"),
                ("energy_now", "20000000"),
                ("energy_full", "50000000"),
                ("power_now", "10000000"),
            ],
        );
        let r = read(&bat).unwrap();
        assert_eq!(
            r,
            Reading {
                percent: 42,
                charging: false,
                remaining_min: Some(120),
            }
        );
        let segs = render(r).materialize(UNIX_EPOCH);
        assert_eq!(segs[0].content().as_str(), "▌ 42% (2h 0m)");
        assert_eq!(segs[0].get_short_text(), Some("42%"));
    }

    #[test]
    fn low_battery_is_urgent_unless_charging() {
        let low = Reading {
            percent: 9,
            charging: false,
            remaining_min: Some(25),
        };
        let segs = render(low).materialize(UNIX_EPOCH);
        assert_eq!(segs[0].content().as_str(), "▏ 9% (25m)");
        assert!(segs[0].is_urgent());

        let segs = render(Reading { charging: true, ..low }).materialize(UNIX_EPOCH);
        assert_eq!(segs[0].content().as_str(), "⚡ 9% (25m)");
        assert!(!segs[0].is_urgent());
    }

    #[test]
    fn finds_the_first_battery() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BatteryModule::default().root(dir.path()).supply().is_err());
        supply(dir.path(), "BAT1", &[("capacity", "80"), ("status", "Full")]);
        let found = BatteryModule::default().root(dir.path()).supply().unwrap();
        assert!(found.ends_with("BAT1"));
    }

    #[tokio::test]
    async fn polls_on_the_scheduler() {
        bar_timing::test_mode();
        let dir = tempfile::tempdir().unwrap();
        let bat = supply(dir.path(), "BAT0", &[("capacity", "70"), ("status", "Discharging")]);
        let (sink, value) = Sink::recording();
        let module = BatteryModule::default().root(dir.path()).interval(Duration::from_secs(30));
        let task = tokio::spawn(module.stream(sink));

        let shown = || {
            value
                .get()
                .materialize(UNIX_EPOCH)
                .first()
                .map(|s| s.content().as_str().to_string())
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(shown().as_deref(), Some("▊ 70%"));

        fs::write(bat.join("capacity"), "69\n").unwrap();
        bar_timing::advance_by(Duration::from_secs(30));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(shown().as_deref(), Some("▊ 69%"));

        // A reading that fails once is retried on the next poll.
        fs::remove_file(bat.join("capacity")).unwrap();
        bar_timing::advance_by(Duration::from_secs(30));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());
        assert_eq!(shown().as_deref(), Some("▊ 69%"));

        fs::write(bat.join("capacity"), "68\n").unwrap();
        bar_timing::advance_by(Duration::from_secs(30));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(shown().as_deref(), Some("▊ 68%"));

        task.abort();
        bar_timing::exit_test_mode();
    }
}
