use std::collections::BTreeMap;
use std::fmt;

/// A dynamically-typed D-Bus value, as carried in method arguments, replies,
/// signal bodies and properties.
///
/// Variants are unwrapped on receipt and narrow integer types are widened
/// (`n`/`q` to `i32`/`u32`), which is all the watchers need.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    ObjectPath(String),
    Array(Vec<Value>),
    /// A dictionary keyed by string (`a{s*}`); other key types are rendered
    /// to strings on receipt.
    Dict(BTreeMap<String, Value>),
    Struct(Vec<Value>),
}

impl Value {
    pub fn object_path(path: impl Into<String>) -> Self {
        Value::ObjectPath(path.into())
    }

    /// String contents of a `Str` or `ObjectPath`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any integer variant that fits an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(n) => Some(n.into()),
            Value::I32(n) => Some(n.into()),
            Value::U32(n) => Some(n.into()),
            Value::I64(n) => Some(n),
            Value::U64(n) => i64::try_from(n).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(f) => Some(*f),
            other => other.as_i64().map(|n| n as f64),
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Struct(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// D-Bus type signature of this value. Arrays of mixed or unknown
    /// element type are sent as arrays of variants.
    pub fn signature(&self) -> String {
        match self {
            Value::Bool(_) => "b".into(),
            Value::Byte(_) => "y".into(),
            Value::I32(_) => "i".into(),
            Value::U32(_) => "u".into(),
            Value::I64(_) => "x".into(),
            Value::U64(_) => "t".into(),
            Value::F64(_) => "d".into(),
            Value::Str(_) => "s".into(),
            Value::ObjectPath(_) => "o".into(),
            Value::Array(_) => "av".into(),
            Value::Dict(_) => "a{sv}".into(),
            Value::Struct(fields) => {
                let inner: String = fields.iter().map(Value::signature).collect();
                format!("({inner})")
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Byte(n) => write!(f, "{n}"),
            Value::I32(n) => write!(f, "{n}"),
            Value::U32(n) => write!(f, "{n}"),
            Value::I64(n) => write!(f, "{n}"),
            Value::U64(n) => write!(f, "{n}"),
            Value::F64(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::ObjectPath(p) => write!(f, "{p}"),
            Value::Array(items) | Value::Struct(items) => {
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Value::Dict(d) => {
                f.write_str("{")?;
                for (i, (k, v)) in d.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! from_impls {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

from_impls! {
    bool => Bool,
    u8 => Byte,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
    String => Str,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(map: BTreeMap<String, T>) -> Self {
        Value::Dict(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::object_path("/a").as_str(), Some("/a"));
        assert_eq!(Value::from(7u32).as_i64(), Some(7));
        assert_eq!(Value::from(u64::MAX).as_i64(), None);
        assert_eq!(Value::from(2i32).as_f64(), Some(2.0));
        assert_eq!(Value::from(true).as_str(), None);
    }

    #[test]
    fn signatures() {
        assert_eq!(Value::Struct(vec![1i32.into(), "s".into()]).signature(), "(is)");
        assert_eq!(Value::from(vec!["a", "b"]).signature(), "av");
    }

    #[test]
    fn display_is_readable() {
        let mut d = BTreeMap::new();
        d.insert("k".to_string(), Value::from(vec![1i32, 2]));
        assert_eq!(Value::Dict(d).to_string(), r#"{"k": [1, 2]}"#);
    }
}
