//! Backend-agnostic database values.
//!
//! [`Value`] is what flows between querysets, the compiler and a
//! [`Connection`](crate::connection::Connection): filter operands, bound
//! parameters, column defaults and fetched cells all use it. Field types
//! turn driver text back into the typed variants on the way out.

use std::fmt;

/// A value bound to, or read from, a column.
///
/// ```
/// use powerorm_db::value::Value;
///
/// assert_eq!(Value::from(42_i64), Value::Int(42));
/// assert_eq!(Value::from(None::<i64>), Value::Null);
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// BLOB cells.
    Bytes(Vec<u8>),
    /// `DateField` values, stored as `YYYY-MM-DD`.
    Date(chrono::NaiveDate),
    /// `DateTimeField` values, naive UTC.
    DateTime(chrono::NaiveDateTime),
    /// `TimeField` values.
    Time(chrono::NaiveTime),
    /// `UuidField` values, stored in the 32-digit simple form.
    Uuid(uuid::Uuid),
    /// `JsonField` documents.
    Json(serde_json::Value),
    /// The operand of `in` and `range`.
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(dt) => write!(f, "{dt}"),
            Self::Time(t) => write!(f, "{t}"),
            Self::Uuid(u) => write!(f, "{}", u.simple()),
            Self::Json(j) => write!(f, "{j}"),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

macro_rules! impl_from_variant {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from_variant!(
    bool => Bool,
    i64 => Int,
    f64 => Float,
    String => String,
    chrono::NaiveDate => Date,
    chrono::NaiveDateTime => DateTime,
    chrono::NaiveTime => Time,
    uuid::Uuid => Uuid,
    Vec<Value> => List,
);

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen.
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_operands() {
        assert_eq!(Value::from(7_i32), Value::Int(7));
        assert_eq!(Value::from("ann"), Value::String("ann".into()));
        assert_eq!(Value::from(Some("ann")), Value::String("ann".into()));
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(
            Value::from(vec![Value::Int(1), Value::Int(2)]),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bytes(vec![1, 2, 3]).to_string(), "<3 bytes>");
        assert_eq!(Value::List(vec![Value::Int(1), Value::from("a")]).to_string(), "[1, a]");
        assert_eq!(Value::Uuid(uuid::Uuid::nil()).to_string(), "0".repeat(32));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Int(3).as_float(), Some(3.0));
        assert_eq!(Value::Int(3).as_str(), None);
        assert_eq!(Value::from("x").as_int(), None);
    }

    #[test]
    fn test_serde_tagged_form() {
        let json = serde_json::to_string(&Value::Int(5)).unwrap();
        assert_eq!(json, r#"{"type":"Int","value":5}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Int(5));
    }
}
