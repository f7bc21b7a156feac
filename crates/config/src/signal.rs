//! Signal names as written in the config file.

use bar_core::{BarError, Result};

const NAMED: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("USR1", libc::SIGUSR1),
    ("USR2", libc::SIGUSR2),
    ("TERM", libc::SIGTERM),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("WINCH", libc::SIGWINCH),
];

/// Resolve `SIGUSR1`, `USR1`, `SIGRTMIN+3` or a plain number.
pub fn parse_signal(name: &str) -> Result<i32> {
    let name = name.trim();
    if let Ok(n) = name.parse::<i32>() {
        return if (1..=max_signal()).contains(&n) {
            Ok(n)
        } else {
            Err(BarError::Config(format!("invalid signal number {n}")))
        };
    }
    let bare = name.strip_prefix("SIG").unwrap_or(name);
    if let Some(rt) = bare.strip_prefix("RTMIN") {
        return realtime(rt, name);
    }
    NAMED
        .iter()
        .find(|(n, _)| *n == bare)
        .map(|(_, signo)| *signo)
        .ok_or_else(|| BarError::Config(format!("unknown signal {name:?}")))
}

#[cfg(target_os = "linux")]
fn max_signal() -> i32 {
    libc::SIGRTMAX()
}

#[cfg(not(target_os = "linux"))]
fn max_signal() -> i32 {
    libc::SIGUSR2
}

#[cfg(target_os = "linux")]
fn realtime(offset: &str, name: &str) -> Result<i32> {
    let offset = match offset {
        "" => 0,
        _ => offset
            .strip_prefix('+')
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|n| n.parse::<i32>().ok())
            .ok_or_else(|| BarError::Config(format!("bad realtime signal {name:?}")))?,
    };
    let signo = libc::SIGRTMIN().saturating_add(offset);
    if signo > libc::SIGRTMAX() {
        return Err(BarError::Config(format!("{name} is past SIGRTMAX")));
    }
    Ok(signo)
}

#[cfg(not(target_os = "linux"))]
fn realtime(_offset: &str, name: &str) -> Result<i32> {
    Err(BarError::Config(format!("realtime signals are not supported here: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_numbers() {
        assert_eq!(parse_signal("SIGUSR1").unwrap(), libc::SIGUSR1);
        assert_eq!(parse_signal("USR2").unwrap(), libc::SIGUSR2);
        assert_eq!(parse_signal("10").unwrap(), 10);
        assert!(parse_signal("SIGBOGUS").is_err());
        assert!(parse_signal("0").is_err());
        assert!(parse_signal("-4").is_err());
        assert!(parse_signal(&(max_signal() + 1).to_string()).is_err());
        assert_eq!(parse_signal(&max_signal().to_string()).unwrap(), max_signal());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn realtime_offsets() {
        assert_eq!(parse_signal("SIGRTMIN").unwrap(), libc::SIGRTMIN());
        assert_eq!(parse_signal("SIGRTMIN+2").unwrap(), libc::SIGRTMIN() + 2);
        assert!(parse_signal("SIGRTMIN+x").is_err());
        assert!(parse_signal("SIGRTMIN+99").is_err());
        assert!(parse_signal("SIGRTMIN+-3").is_err());
        assert!(parse_signal("SIGRTMIN++3").is_err());
        assert!(parse_signal("SIGRTMIN+").is_err());
    }
}
