//! The document model.

use crate::encoder::{cmp_encoded, to_canonical_cbor};

/// A CBOR data item as stored in a document.
///
/// Operators store documents as [`Value::Map`]s with text keys. Floats are
/// allowed anywhere except as NaN, which the encoder refuses.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `null`.
    Null,
    /// `true` or `false`.
    Bool(bool),
    /// Any integer in the `i64` range.
    Integer(i64),
    /// A 64-bit float.
    Float(f64),
    /// A byte string.
    Bytes(Vec<u8>),
    /// A UTF-8 text string.
    Text(String),
    /// An ordered list.
    Array(Vec<Value>),
    /// Key/value pairs. Built through [`Value::map`] or
    /// [`Value::document`], pairs are kept in encoded-key order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Builds a map, ordering pairs the way the encoder writes them.
    pub fn map(mut pairs: Vec<(Value, Value)>) -> Self {
        pairs.sort_by_cached_key(|(key, _)| {
            EncodedKey(to_canonical_cbor(key).unwrap_or_default())
        });
        Value::Map(pairs)
    }

    /// Builds a document from `(field, value)` pairs.
    ///
    /// ```rust
    /// use strata_codec::Value;
    ///
    /// let doc = Value::document([("name", Value::from("ann")), ("age", Value::from(41))]);
    /// assert_eq!(doc.get("age"), Some(&Value::Integer(41)));
    /// ```
    pub fn document<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let pairs = fields
            .into_iter()
            .map(|(field, value)| (Value::Text(field.into()), value.into()))
            .collect();
        Self::map(pairs)
    }

    /// Name of the variant for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `true` for [`Value::Map`].
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// The integer, if this is one.
    pub fn as_integer(&self) -> Option<i64> {
        if let Value::Integer(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    /// The value as a float, widening integers.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            Value::Integer(n) => Some(n as f64),
            _ => None,
        }
    }

    /// The byte string, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let Value::Bytes(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// The text, if this is a text string.
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(text) = self {
            Some(text)
        } else {
            None
        }
    }

    /// The items, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        if let Value::Array(items) = self {
            Some(items)
        } else {
            None
        }
    }

    /// Field `name` of a map, or `None` for anything else.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let Value::Map(pairs) = self else {
            return None;
        };
        pairs
            .iter()
            .find_map(|(key, value)| (key.as_text() == Some(name)).then_some(value))
    }

    /// Follows `path` through nested maps and arrays.
    ///
    /// A segment names a map field, or an array position when it parses
    /// as one. The empty path yields `self`.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let mut current = self;
        for segment in path {
            let segment = segment.as_ref();
            current = match current {
                Value::Map(_) => current.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Encoded map key ordered the way canonical maps are written.
#[derive(PartialEq, Eq)]
struct EncodedKey(Vec<u8>);

impl PartialOrd for EncodedKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EncodedKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        cmp_encoded(&self.0, &other.0)
    }
}

macro_rules! value_from {
    ($($source:ty => |$v:ident| $body:expr;)*) => {
        $(
            impl From<$source> for Value {
                fn from($v: $source) -> Self {
                    $body
                }
            }
        )*
    };
}

value_from! {
    bool => |b| Value::Bool(b);
    i32 => |n| Value::Integer(i64::from(n));
    u32 => |n| Value::Integer(i64::from(n));
    i64 => |n| Value::Integer(n);
    f32 => |f| Value::Float(f64::from(f));
    f64 => |f| Value::Float(f);
    &str => |s| Value::Text(s.to_owned());
    String => |s| Value::Text(s);
    &[u8] => |b| Value::Bytes(b.to_vec());
    () => |_unit| Value::Null;
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}
