use crate::connection::Signal;
use crate::error::{DbusError, Result};
use crate::value::Value;
use std::fmt;

/// Highest argument index a match rule may refer to.
const MAX_ARG: u8 = 63;

/// One key of a match rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKey {
    Type,
    Sender,
    Interface,
    Member,
    Path,
    PathNamespace,
    Destination,
    /// `argN`: the Nth argument is a string or object path equal to the value.
    Arg(u8),
    /// `argNpath`: path-prefix match on the Nth argument.
    ArgPath(u8),
    /// `argNnamespace`: dotted-namespace match on the Nth argument.
    ArgNamespace(u8),
}

impl MatchKey {
    /// Parse a key as written in a match rule string.
    pub fn parse(key: &str) -> Result<Self> {
        let simple = match key {
            "type" => Some(MatchKey::Type),
            "sender" => Some(MatchKey::Sender),
            "interface" => Some(MatchKey::Interface),
            "member" => Some(MatchKey::Member),
            "path" => Some(MatchKey::Path),
            "path_namespace" => Some(MatchKey::PathNamespace),
            "destination" => Some(MatchKey::Destination),
            _ => None,
        };
        if let Some(k) = simple {
            return Ok(k);
        }

        let invalid = || DbusError::InvalidMatch(format!("unknown key {key:?}"));
        let rest = key.strip_prefix("arg").ok_or_else(invalid)?;
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 || digits > 2 {
            return Err(invalid());
        }
        let (num, suffix) = rest.split_at(digits);
        let n: u8 = num.parse().map_err(|_| invalid())?;
        if n > MAX_ARG {
            return Err(invalid());
        }
        match suffix {
            "" => Ok(MatchKey::Arg(n)),
            "path" => Ok(MatchKey::ArgPath(n)),
            "namespace" => Ok(MatchKey::ArgNamespace(n)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKey::Type => f.write_str("type"),
            MatchKey::Sender => f.write_str("sender"),
            MatchKey::Interface => f.write_str("interface"),
            MatchKey::Member => f.write_str("member"),
            MatchKey::Path => f.write_str("path"),
            MatchKey::PathNamespace => f.write_str("path_namespace"),
            MatchKey::Destination => f.write_str("destination"),
            MatchKey::Arg(n) => write!(f, "arg{n}"),
            MatchKey::ArgPath(n) => write!(f, "arg{n}path"),
            MatchKey::ArgNamespace(n) => write!(f, "arg{n}namespace"),
        }
    }
}

/// A signal match rule. A signal matches when every option holds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchRule {
    options: Vec<(MatchKey, String)>,
}

impl MatchRule {
    /// A rule selecting signals (`type='signal'`).
    pub fn signal() -> Self {
        Self::default().with(MatchKey::Type, "signal")
    }

    /// Set `key` to `value`, replacing any previous value for the key.
    #[must_use]
    pub fn with(mut self, key: MatchKey, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.options.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.options.push((key, value)),
        }
        self
    }

    /// Set an option by its textual key, rejecting unknown keys.
    pub fn option(self, key: &str, value: impl Into<String>) -> Result<Self> {
        Ok(self.with(MatchKey::parse(key)?, value))
    }

    /// Parse `key='value',key='value'` as used by `AddMatch`.
    pub fn parse(rule: &str) -> Result<Self> {
        let mut out = Self::default();
        let mut rest = rule.trim();
        while !rest.is_empty() {
            let (key, after) = rest
                .split_once('=')
                .ok_or_else(|| DbusError::InvalidMatch(format!("missing '=' in {rule:?}")))?;
            let (value, after) = parse_value(after)
                .ok_or_else(|| DbusError::InvalidMatch(format!("bad value in {rule:?}")))?;
            out = out.option(key.trim(), value)?;
            rest = after.trim_start();
            if let Some(r) = rest.strip_prefix(',') {
                rest = r.trim_start();
            } else if !rest.is_empty() {
                return Err(DbusError::InvalidMatch(format!("expected ',' in {rule:?}")));
            }
        }
        Ok(out)
    }

    #[must_use]
    pub fn sender(self, sender: impl Into<String>) -> Self {
        self.with(MatchKey::Sender, sender)
    }

    #[must_use]
    pub fn interface(self, interface: impl Into<String>) -> Self {
        self.with(MatchKey::Interface, interface)
    }

    #[must_use]
    pub fn member(self, member: impl Into<String>) -> Self {
        self.with(MatchKey::Member, member)
    }

    #[must_use]
    pub fn path(self, path: impl Into<String>) -> Self {
        self.with(MatchKey::Path, path)
    }

    #[must_use]
    pub fn path_namespace(self, path: impl Into<String>) -> Self {
        self.with(MatchKey::PathNamespace, path)
    }

    /// Panics if `n` exceeds 63.
    #[must_use]
    pub fn arg(self, n: u8, value: impl Into<String>) -> Self {
        assert!(n <= MAX_ARG, "match argument index out of range");
        self.with(MatchKey::Arg(n), value)
    }

    #[must_use]
    pub fn arg_path(self, n: u8, value: impl Into<String>) -> Self {
        assert!(n <= MAX_ARG, "match argument index out of range");
        self.with(MatchKey::ArgPath(n), value)
    }

    #[must_use]
    pub fn arg_namespace(self, n: u8, value: impl Into<String>) -> Self {
        assert!(n <= MAX_ARG, "match argument index out of range");
        self.with(MatchKey::ArgNamespace(n), value)
    }

    pub fn get(&self, key: MatchKey) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn options(&self) -> &[(MatchKey, String)] {
        &self.options
    }

    /// Whether `signal` satisfies every option of this rule.
    pub fn matches(&self, signal: &Signal) -> bool {
        self.options.iter().all(|(key, want)| {
            let want = want.as_str();
            match *key {
                MatchKey::Type => want == "signal",
                MatchKey::Sender => signal.sender == want,
                MatchKey::Interface => signal.name.interface == want,
                MatchKey::Member => signal.name.member == want,
                MatchKey::Path => signal.path == want,
                MatchKey::PathNamespace => path_in_namespace(&signal.path, want),
                MatchKey::Destination => true,
                MatchKey::Arg(n) => string_arg(signal, n).is_some_and(|a| a == want),
                MatchKey::ArgPath(n) => string_arg(signal, n).is_some_and(|a| arg_path_matches(a, want)),
                MatchKey::ArgNamespace(n) => {
                    string_arg(signal, n).is_some_and(|a| a == want || a.strip_prefix(want).is_some_and(|r| r.starts_with('.')))
                }
            }
        })
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.options.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}='{}'", value.replace('\'', r"'\''"))?;
        }
        Ok(())
    }
}

/// Only string and object-path arguments take part in argN matching.
fn string_arg(signal: &Signal, n: u8) -> Option<&str> {
    match signal.body.get(usize::from(n))? {
        Value::Str(s) | Value::ObjectPath(s) => Some(s),
        _ => None,
    }
}

fn path_in_namespace(path: &str, namespace: &str) -> bool {
    if namespace == "/" {
        return true;
    }
    path == namespace || path.strip_prefix(namespace).is_some_and(|r| r.starts_with('/'))
}

/// `argNpath` semantics: equal, or either side is a `/`-terminated prefix
/// of the other.
fn arg_path_matches(arg: &str, want: &str) -> bool {
    arg == want
        || (want.ends_with('/') && arg.starts_with(want))
        || (arg.ends_with('/') && want.starts_with(arg))
}

/// Parse one possibly-quoted value, returning it and the unparsed rest.
fn parse_value(input: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = input.char_indices().peekable();
    let mut quoted = false;
    while let Some(&(i, c)) = chars.peek() {
        match c {
            '\'' => {
                quoted = !quoted;
                chars.next();
            }
            '\\' if !quoted => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '\'')) => {
                        out.push('\'');
                        chars.next();
                    }
                    _ => out.push('\\'),
                }
            }
            ',' if !quoted => return Some((out, &input[i..])),
            _ => {
                out.push(c);
                chars.next();
            }
        }
    }
    (!quoted).then_some((out, ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::DbusName;

    fn signal(sender: &str, path: &str, name: &str, body: Vec<Value>) -> Signal {
        Signal {
            sender: sender.into(),
            path: path.into(),
            name: DbusName::parse(name),
            body,
        }
    }

    fn owner_changed(name: &str) -> Signal {
        signal(
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus.NameOwnerChanged",
            vec![name.into(), "".into(), ":1".into()],
        )
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(MatchRule::signal().option("arg0namespace", "a").is_ok());
        assert!(MatchRule::signal().option("arg12path", "/a").is_ok());
        for bad in ["bogus", "arg", "arg64", "arg1foo", "argx", "arg123"] {
            assert!(
                matches!(MatchRule::signal().option(bad, "x"), Err(DbusError::InvalidMatch(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn every_option_must_hold() {
        let rule = MatchRule::signal()
            .sender("org.freedesktop.DBus")
            .member("NameOwnerChanged")
            .arg_namespace(0, "com.example")
            .path("/org/freedesktop/DBus");
        assert!(rule.matches(&owner_changed("com.example")));
        assert!(rule.matches(&owner_changed("com.example.foo")));
        assert!(!rule.matches(&owner_changed("com.examplefoo")));
        assert!(!rule.matches(&owner_changed("org.example")));

        let wrong_path = rule.clone().path("/other");
        assert!(!wrong_path.matches(&owner_changed("com.example.foo")));
    }

    #[test]
    fn arg_requires_string_argument() {
        let rule = MatchRule::signal().arg(1, "42");
        assert!(!rule.matches(&signal(":1", "/", "a.B", vec!["x".into(), 42i32.into()])));
        assert!(rule.matches(&signal(":1", "/", "a.B", vec!["x".into(), "42".into()])));
        assert!(!rule.matches(&signal(":1", "/", "a.B", vec!["x".into()])));
    }

    #[test]
    fn path_namespace_uses_slash_boundary() {
        let rule = MatchRule::signal().path_namespace("/org/a");
        assert!(rule.matches(&signal(":1", "/org/a", "a.B", vec![])));
        assert!(rule.matches(&signal(":1", "/org/a/b", "a.B", vec![])));
        assert!(!rule.matches(&signal(":1", "/org/ab", "a.B", vec![])));
        assert!(MatchRule::signal().path_namespace("/").matches(&signal(":1", "/x", "a.B", vec![])));
    }

    #[test]
    fn arg_path_prefixes() {
        let rule = MatchRule::signal().arg_path(0, "/aa/bb/");
        for (arg, ok) in [
            ("/", true),
            ("/aa/", true),
            ("/aa/bb/", true),
            ("/aa/bb/cc/", true),
            ("/aa/bb/cc", true),
            ("/aa/b", false),
            ("/aa", false),
            ("/aa/bb", false),
        ] {
            let s = signal(":1", "/", "a.B", vec![Value::object_path(arg)]);
            assert_eq!(rule.matches(&s), ok, "arg {arg}");
        }
    }

    #[test]
    fn display_and_parse() {
        let rule = MatchRule::signal()
            .sender(":1.5")
            .arg(0, "it's");
        let text = rule.to_string();
        assert_eq!(text, r"type='signal',sender=':1.5',arg0='it'\''s'");
        assert_eq!(MatchRule::parse(&text).unwrap(), rule);
        assert!(MatchRule::parse("type='signal',nope='x'").is_err());
        assert!(MatchRule::parse("type='signal").is_err());
    }
}
