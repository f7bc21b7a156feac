//! Dotted D-Bus member names and interface-relative short forms.
//!
//! Callers may refer to members of the interface they are watching by
//! short name (`"Play"`), by a relative dotted path (`".Player.Play"`) or
//! by a fully-qualified name that belongs to another interface.

use std::fmt;

/// A fully-qualified member name split into interface and member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DbusName {
    pub interface: String,
    pub member: String,
}

impl DbusName {
    pub fn new(interface: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            member: member.into(),
        }
    }

    /// Split `"a.b.C"` into interface `"a.b"` and member `"C"`.
    pub fn parse(full: &str) -> Self {
        match full.rsplit_once('.') {
            Some((iface, member)) => Self::new(iface, member),
            None => Self::new("", full),
        }
    }

    /// Resolve `name` relative to `interface`, see [`expand`].
    pub fn relative(interface: &str, name: &str) -> Self {
        Self::parse(&expand(interface, name))
    }
}

impl fmt::Display for DbusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.interface.is_empty() {
            f.write_str(&self.member)
        } else {
            write!(f, "{}.{}", self.interface, self.member)
        }
    }
}

/// Fully qualify `name` against `interface`.
///
/// - `".Sub.Member"` becomes `interface + ".Sub.Member"`;
/// - a dotted name is already qualified and is returned unchanged;
/// - a bare `"Member"` becomes `interface + ".Member"`.
pub fn expand(interface: &str, name: &str) -> String {
    if name.starts_with('.') {
        format!("{interface}{name}")
    } else if name.contains('.') {
        name.to_string()
    } else {
        format!("{interface}.{name}")
    }
}

/// Inverse of [`expand`]: strip `interface + "."` when present, keeping a
/// leading `.` if the remainder is itself dotted.
pub fn shorten(interface: &str, full: &str) -> String {
    let Some(rest) = full
        .strip_prefix(interface)
        .and_then(|r| r.strip_prefix('.'))
    else {
        return full.to_string();
    };
    if rest.contains('.') {
        format!(".{rest}")
    } else {
        rest.to_string()
    }
}
