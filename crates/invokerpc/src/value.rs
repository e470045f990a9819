//! Values carried as arguments and results, and the static type tags that
//! accompany arguments.
//!
//! Values describe themselves on the wire, but a `Null` says nothing about
//! what it stands in for. Calls therefore carry one `TypeTag` per argument,
//! and the receiver resolves overloads from the tags alone.

use std::fmt;

/// A dynamically typed argument or result.
///
/// Equality is wire identity: `F64` compares bit patterns, so a `NaN`
/// equals itself and `0.0` differs from `-0.0`.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent reference (string, bytes, list, record or optional).
    Null,
    Unit,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Application record; field order is preserved.
    Record(Vec<(String, Value)>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a record field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Short description for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::F64(_) => "f64",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Record(_) => "record",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Self::I32(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Self::I64(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Self::F64(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Self::Str(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Self::Str(v) }
}

impl From<()> for Value {
    fn from(_: ()) -> Self { Self::Unit }
}

/// The declared static type of an argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Unit,
    Bool,
    I32,
    I64,
    F64,
    Str,
    Bytes,
    List(Box<TypeTag>),
    Optional(Box<TypeTag>),
    /// Application record type such as `"Territory"` or `"PlayerId"`.
    Named(String),
}

impl TypeTag {
    pub fn list(inner: TypeTag) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn optional(inner: TypeTag) -> Self {
        Self::Optional(Box::new(inner))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Whether `value` is a legal value for an argument declared with this tag.
    ///
    /// Reference kinds (strings, bytes, lists, records and optionals) accept
    /// `Null`; scalars do not.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Unit, Value::Unit) => true,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::I32, Value::I32(_)) => true,
            (Self::I64, Value::I64(_)) => true,
            (Self::F64, Value::F64(_)) => true,
            (Self::Str | Self::Bytes | Self::List(_) | Self::Optional(_) | Self::Named(_), Value::Null) => true,
            (Self::Str, Value::Str(_)) => true,
            (Self::Bytes, Value::Bytes(_)) => true,
            (Self::List(inner), Value::List(items)) => items.iter().all(|v| inner.accepts(v)),
            (Self::Optional(inner), v) => inner.accepts(v),
            (Self::Named(_), Value::Record(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "unit"),
            Self::Bool => write!(f, "bool"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F64 => write!(f, "f64"),
            Self::Str => write!(f, "str"),
            Self::Bytes => write!(f, "bytes"),
            Self::List(inner) => write!(f, "list<{}>", inner),
            Self::Optional(inner) => write!(f, "opt<{}>", inner),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}
