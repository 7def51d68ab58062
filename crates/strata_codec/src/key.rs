//! Order-preserving key encodings.
//!
//! Every [`KeyType`] maps its domain onto byte strings whose unsigned
//! lexicographic order matches the domain order:
//!
//! | Type | Bytes |
//! |------|-------|
//! | `string` | UTF-8 |
//! | `int` / `long` | big-endian two's complement with the sign bit flipped |
//! | `float` / `double` | IEEE-754 bits, negatives inverted, positives sign-flipped |
//! | `date` | `yyyymmdd` packed into an `int` |
//! | `time` | `hhmmss` packed into an `int` |
//! | `timestamp` | epoch milliseconds as a `long` |
//!
//! Plain encodings are used where the key is the last component of a
//! stored key. Index entries need a key to be followed by more bytes, so
//! [`KeyValue::encode_delimited`] makes strings self-terminating.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The declared type of a primary key or index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// UTF-8 text.
    #[serde(rename = "string")]
    String,
    /// 32-bit signed integer.
    #[serde(rename = "int")]
    Int32,
    /// 64-bit signed integer.
    #[serde(rename = "long")]
    Int64,
    /// 32-bit float.
    #[serde(rename = "float")]
    Float32,
    /// 64-bit float.
    #[serde(rename = "double")]
    Float64,
    /// Calendar date.
    #[serde(rename = "date")]
    Date,
    /// Time of day, second resolution.
    #[serde(rename = "time")]
    Time,
    /// Epoch milliseconds.
    #[serde(rename = "timestamp")]
    Timestamp,
}

impl KeyType {
    /// Every key type, in declaration order.
    pub const ALL: [KeyType; 8] = [
        KeyType::String,
        KeyType::Int32,
        KeyType::Int64,
        KeyType::Float32,
        KeyType::Float64,
        KeyType::Date,
        KeyType::Time,
        KeyType::Timestamp,
    ];

    /// Resolves a case-insensitive alias such as `"n64"` or `"decimal32"`.
    pub fn parse(alias: &str) -> Option<Self> {
        let lower = alias.trim().to_ascii_lowercase();
        let key_type = match lower.as_str() {
            "str" | "string" | "char" => KeyType::String,
            "n32" | "int" | "integer" | "number32" => KeyType::Int32,
            "n64" | "long" | "number64" | "bigint" => KeyType::Int64,
            "float" | "decimal32" | "dec32" | "float32" => KeyType::Float32,
            "double" | "decimal64" | "dec64" | "float64" => KeyType::Float64,
            "date" => KeyType::Date,
            "time" => KeyType::Time,
            "datetime" | "timestamp" => KeyType::Timestamp,
            _ => return None,
        };
        Some(key_type)
    }

    /// Canonical name, as written to catalogs and backups.
    pub const fn name(self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::Int32 => "int",
            KeyType::Int64 => "long",
            KeyType::Float32 => "float",
            KeyType::Float64 => "double",
            KeyType::Date => "date",
            KeyType::Time => "time",
            KeyType::Timestamp => "timestamp",
        }
    }

    /// The engine-level key class this type is stored as.
    pub const fn storage_class(self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::Int32 | KeyType::Float32 | KeyType::Date | KeyType::Time => "number32",
            KeyType::Int64 | KeyType::Float64 | KeyType::Timestamp => "number64",
        }
    }

    /// Encoded width for fixed-width types; `None` for strings.
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            KeyType::String => None,
            KeyType::Int32 | KeyType::Float32 | KeyType::Date | KeyType::Time => Some(4),
            KeyType::Int64 | KeyType::Float64 | KeyType::Timestamp => Some(8),
        }
    }

    /// Whether an index column may be declared with this type.
    pub const fn is_indexable(self) -> bool {
        matches!(
            self,
            KeyType::String
                | KeyType::Int32
                | KeyType::Int64
                | KeyType::Float32
                | KeyType::Float64
        )
    }

    /// Coerces a dynamic value to this key type.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TypeMismatch`] if the value has no sensible
    /// reading as this type.
    pub fn coerce(self, value: &Value) -> CodecResult<KeyValue> {
        let mismatch = || CodecError::type_mismatch(self.name(), describe(value));
        let coerced = match self {
            KeyType::String => KeyValue::String(match value {
                Value::Text(s) => s.clone(),
                Value::Integer(n) => n.to_string(),
                Value::Float(f) if f.is_finite() => f.to_string(),
                _ => return Err(mismatch()),
            }),
            KeyType::Int32 => {
                let n = integer_of(value).ok_or_else(mismatch)?;
                KeyValue::Int32(i32::try_from(n).map_err(|_| mismatch())?)
            }
            KeyType::Int64 => KeyValue::Int64(integer_of(value).ok_or_else(mismatch)?),
            #[allow(clippy::cast_possible_truncation)]
            KeyType::Float32 => KeyValue::Float32(float_of(value).ok_or_else(mismatch)? as f32),
            KeyType::Float64 => KeyValue::Float64(float_of(value).ok_or_else(mismatch)?),
            KeyType::Date => KeyValue::Date(match value {
                Value::Text(s) => Date::parse(s).ok_or_else(mismatch)?,
                Value::Integer(n) => i32::try_from(*n)
                    .ok()
                    .and_then(Date::from_packed)
                    .ok_or_else(mismatch)?,
                _ => return Err(mismatch()),
            }),
            KeyType::Time => KeyValue::Time(match value {
                Value::Text(s) => TimeOfDay::parse(s).ok_or_else(mismatch)?,
                Value::Integer(n) => i32::try_from(*n)
                    .ok()
                    .and_then(TimeOfDay::from_packed)
                    .ok_or_else(mismatch)?,
                _ => return Err(mismatch()),
            }),
            KeyType::Timestamp => KeyValue::Timestamp(match value {
                Value::Text(s) => match s.trim().parse::<i64>() {
                    Ok(ms) => ms,
                    Err(_) => parse_datetime_millis(s).ok_or_else(mismatch)?,
                },
                other => integer_of(other).ok_or_else(mismatch)?,
            }),
        };
        Ok(coerced)
    }

    /// Coerces and encodes a value in one step.
    ///
    /// # Errors
    ///
    /// See [`KeyType::coerce`].
    pub fn encode(self, value: &Value) -> CodecResult<Vec<u8>> {
        Ok(self.coerce(value)?.encode())
    }

    /// Decodes a plain encoding produced by [`KeyValue::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] on a width mismatch or an
    /// out-of-range packed date or time, and [`CodecError::BadUtf8`]
    /// for malformed strings.
    pub fn decode(self, bytes: &[u8]) -> CodecResult<KeyValue> {
        if let Some(width) = self.fixed_width() {
            if bytes.len() != width {
                return Err(CodecError::malformed(format!(
                    "{} key must be {width} bytes, got {}",
                    self.name(),
                    bytes.len()
                )));
            }
        }
        let bad_packed = || CodecError::malformed(format!("invalid packed {}", self.name()));

        let value = match self {
            KeyType::String => KeyValue::String(
                std::str::from_utf8(bytes)
                    .map_err(|_| CodecError::BadUtf8)?
                    .to_string(),
            ),
            KeyType::Int32 => KeyValue::Int32(decode_i32(bytes)),
            KeyType::Int64 => KeyValue::Int64(decode_i64(bytes)),
            KeyType::Float32 => {
                let sortable = u32::from_be_bytes(to_array(bytes));
                let bits = if sortable & SIGN_32 != 0 {
                    sortable & !SIGN_32
                } else {
                    !sortable
                };
                KeyValue::Float32(f32::from_bits(bits))
            }
            KeyType::Float64 => {
                let sortable = u64::from_be_bytes(to_array(bytes));
                let bits = if sortable & SIGN_64 != 0 {
                    sortable & !SIGN_64
                } else {
                    !sortable
                };
                KeyValue::Float64(f64::from_bits(bits))
            }
            KeyType::Date => {
                KeyValue::Date(Date::from_packed(decode_i32(bytes)).ok_or_else(bad_packed)?)
            }
            KeyType::Time => {
                KeyValue::Time(TimeOfDay::from_packed(decode_i32(bytes)).ok_or_else(bad_packed)?)
            }
            KeyType::Timestamp => KeyValue::Timestamp(decode_i64(bytes)),
        };
        Ok(value)
    }

    /// Splits a delimited key off the front of `bytes`.
    ///
    /// Returns the key and the bytes that follow it.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] if the key is cut short, or
    /// any error [`KeyType::decode`] reports.
    pub fn split_delimited(self, bytes: &[u8]) -> CodecResult<(KeyValue, &[u8])> {
        if let Some(width) = self.fixed_width() {
            if bytes.len() < width {
                return Err(CodecError::Truncated);
            }
            let (head, rest) = bytes.split_at(width);
            return Ok((self.decode(head)?, rest));
        }

        let mut raw = Vec::with_capacity(bytes.len());
        let mut i = 0;
        loop {
            match bytes.get(i..i + 2) {
                Some([0x00, 0x00]) => break,
                Some([0x00, 0xFF]) => {
                    raw.push(0x00);
                    i += 2;
                }
                Some([0x00, _]) => {
                    return Err(CodecError::malformed("invalid escape in string key"));
                }
                _ => {
                    let byte = *bytes.get(i).ok_or(CodecError::Truncated)?;
                    if byte == 0x00 {
                        return Err(CodecError::Truncated);
                    }
                    raw.push(byte);
                    i += 1;
                }
            }
        }
        Ok((self.decode(&raw)?, &bytes[i + 2..]))
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeyType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CodecError::type_mismatch("key type", s))
    }
}

/// A key coerced to its declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    /// Text key.
    String(String),
    /// 32-bit integer key.
    Int32(i32),
    /// 64-bit integer key.
    Int64(i64),
    /// 32-bit float key.
    Float32(f32),
    /// 64-bit float key.
    Float64(f64),
    /// Date key.
    Date(Date),
    /// Time-of-day key.
    Time(TimeOfDay),
    /// Epoch-millisecond key.
    Timestamp(i64),
}

const SIGN_32: u32 = 1 << 31;
const SIGN_64: u64 = 1 << 63;

impl KeyValue {
    /// The type this key was coerced to.
    pub fn key_type(&self) -> KeyType {
        match self {
            KeyValue::String(_) => KeyType::String,
            KeyValue::Int32(_) => KeyType::Int32,
            KeyValue::Int64(_) => KeyType::Int64,
            KeyValue::Float32(_) => KeyType::Float32,
            KeyValue::Float64(_) => KeyType::Float64,
            KeyValue::Date(_) => KeyType::Date,
            KeyValue::Time(_) => KeyType::Time,
            KeyValue::Timestamp(_) => KeyType::Timestamp,
        }
    }

    /// Plain order-preserving encoding.
    #[allow(clippy::cast_sign_loss)]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            KeyValue::String(s) => s.as_bytes().to_vec(),
            KeyValue::Int32(n) => encode_i32(*n).to_vec(),
            KeyValue::Int64(n) | KeyValue::Timestamp(n) => encode_i64(*n).to_vec(),
            KeyValue::Float32(f) => {
                let bits = f.to_bits();
                let sortable = if bits & SIGN_32 != 0 { !bits } else { bits | SIGN_32 };
                sortable.to_be_bytes().to_vec()
            }
            KeyValue::Float64(f) => {
                let bits = f.to_bits();
                let sortable = if bits & SIGN_64 != 0 { !bits } else { bits | SIGN_64 };
                sortable.to_be_bytes().to_vec()
            }
            KeyValue::Date(d) => encode_i32(d.packed()).to_vec(),
            KeyValue::Time(t) => encode_i32(t.packed()).to_vec(),
        }
    }

    /// Encoding that can be followed by more bytes without losing order.
    ///
    /// Strings escape `0x00` as `0x00 0xFF` and end with `0x00 0x00`;
    /// fixed-width types are unchanged.
    pub fn encode_delimited(&self) -> Vec<u8> {
        match self {
            KeyValue::String(s) => {
                let mut out = Vec::with_capacity(s.len() + 2);
                for &byte in s.as_bytes() {
                    out.push(byte);
                    if byte == 0x00 {
                        out.push(0xFF);
                    }
                }
                out.extend_from_slice(&[0x00, 0x00]);
                out
            }
            other => other.encode(),
        }
    }

    /// Converts back to a document value.
    ///
    /// Dates and times come back as `YYYY-MM-DD` and `HH:MM:SS` text.
    pub fn to_value(&self) -> Value {
        match self {
            KeyValue::String(s) => Value::Text(s.clone()),
            KeyValue::Int32(n) => Value::Integer(i64::from(*n)),
            KeyValue::Int64(n) | KeyValue::Timestamp(n) => Value::Integer(*n),
            KeyValue::Float32(f) => Value::Float(f64::from(*f)),
            KeyValue::Float64(f) => Value::Float(*f),
            KeyValue::Date(d) => Value::Text(d.to_string()),
            KeyValue::Time(t) => Value::Text(t.to_string()),
        }
    }
}

/// A calendar date in the proleptic Gregorian calendar, years 0 to 9999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date {
    /// Year.
    pub year: u16,
    /// Month, 1 to 12.
    pub month: u8,
    /// Day of month.
    pub day: u8,
}

impl Date {
    /// Builds a date, validating month and day.
    pub fn new(year: u16, month: u8, day: u8) -> Option<Self> {
        let valid = year <= 9999
            && (1..=12).contains(&month)
            && day >= 1
            && day <= days_in_month(i64::from(year), month);
        valid.then_some(Self { year, month, day })
    }

    /// Parses `YYYY-MM-DD` or `YYYY/MM/DD`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let sep = if text.contains('/') { '/' } else { '-' };
        let mut parts = text.split(sep);
        let year = parts.next()?.parse().ok()?;
        let month = parts.next()?.parse().ok()?;
        let day = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Self::new(year, month, day)
    }

    /// Unpacks `yyyymmdd`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_packed(packed: i32) -> Option<Self> {
        if packed < 0 {
            return None;
        }
        let year = packed / 10_000;
        let month = (packed / 100) % 100;
        let day = packed % 100;
        u16::try_from(year)
            .ok()
            .and_then(|y| Self::new(y, month as u8, day as u8))
    }

    /// Packs as `yyyymmdd`.
    pub fn packed(self) -> i32 {
        i32::from(self.year) * 10_000 + i32::from(self.month) * 100 + i32::from(self.day)
    }

    /// Days since 1970-01-01.
    pub fn days_since_epoch(self) -> i64 {
        days_from_civil(i64::from(self.year), i64::from(self.month), i64::from(self.day))
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// A time of day with second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    /// Hour, 0 to 23.
    pub hour: u8,
    /// Minute, 0 to 59.
    pub minute: u8,
    /// Second, 0 to 59.
    pub second: u8,
}

impl TimeOfDay {
    /// Builds a time, validating each field.
    pub fn new(hour: u8, minute: u8, second: u8) -> Option<Self> {
        (hour < 24 && minute < 60 && second < 60).then_some(Self {
            hour,
            minute,
            second,
        })
    }

    /// Parses `HH:MM:SS` or `HH:MM`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split(':');
        let hour = parts.next()?.parse().ok()?;
        let minute = parts.next()?.parse().ok()?;
        let second = match parts.next() {
            Some(s) => s.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Self::new(hour, minute, second)
    }

    /// Unpacks `hhmmss`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_packed(packed: i32) -> Option<Self> {
        if !(0..=235_959).contains(&packed) {
            return None;
        }
        Self::new(
            (packed / 10_000) as u8,
            ((packed / 100) % 100) as u8,
            (packed % 100) as u8,
        )
    }

    /// Packs as `hhmmss`.
    pub fn packed(self) -> i32 {
        i32::from(self.hour) * 10_000 + i32::from(self.minute) * 100 + i32::from(self.second)
    }

    /// Seconds since midnight.
    pub fn seconds(self) -> i64 {
        i64::from(self.hour) * 3600 + i64::from(self.minute) * 60 + i64::from(self.second)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Text(s) => format!("text {s:?}"),
        Value::Integer(n) => format!("integer {n}"),
        Value::Float(f) => format!("float {f}"),
        other => other.type_name().to_string(),
    }
}

/// Integer reading of a value; floats truncate toward zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integer_of(value: &Value) -> Option<i64> {
    let from_float = |f: f64| {
        // i64::MAX as f64 rounds up to 2^63, which is out of range
        (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64).then(|| f.trunc() as i64)
    };
    match value {
        Value::Integer(n) => Some(*n),
        Value::Float(f) => from_float(*f),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_float))
        }
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn float_of(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Integer(n) => *n as f64,
        Value::Float(f) => *f,
        Value::Text(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (!f.is_nan()).then_some(f)
}

#[allow(clippy::cast_sign_loss)]
fn encode_i32(n: i32) -> [u8; 4] {
    ((n as u32) ^ SIGN_32).to_be_bytes()
}

#[allow(clippy::cast_sign_loss)]
fn encode_i64(n: i64) -> [u8; 8] {
    ((n as u64) ^ SIGN_64).to_be_bytes()
}

#[allow(clippy::cast_possible_wrap)]
fn decode_i32(bytes: &[u8]) -> i32 {
    (u32::from_be_bytes(to_array(bytes)) ^ SIGN_32) as i32
}

#[allow(clippy::cast_possible_wrap)]
fn decode_i64(bytes: &[u8]) -> i64 {
    (u64::from_be_bytes(to_array(bytes)) ^ SIGN_64) as i64
}

/// Copies a slice already checked to be `N` bytes long.
fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u8) -> u8 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Days from 1970-01-01 to the given civil date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Parses `YYYY-MM-DD[( |T)HH:MM[:SS]]` as UTC epoch milliseconds.
fn parse_datetime_millis(text: &str) -> Option<i64> {
    let text = text.trim().trim_end_matches('Z');
    let (date, time) = match text.find(['T', ' ']) {
        Some(at) => (&text[..at], Some(&text[at + 1..])),
        None => (text, None),
    };
    let date = Date::parse(date)?;
    let seconds = match time {
        Some(t) => TimeOfDay::parse(t)?.seconds(),
        None => 0,
    };
    Some((date.days_since_epoch() * 86_400 + seconds) * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(key_type: KeyType, value: impl Into<Value>) -> Vec<u8> {
        key_type.encode(&value.into()).unwrap()
    }

    #[test]
    fn aliases_resolve_case_insensitively() {
        assert_eq!(KeyType::parse("STR"), Some(KeyType::String));
        assert_eq!(KeyType::parse("n32"), Some(KeyType::Int32));
        assert_eq!(KeyType::parse("BigInt"), Some(KeyType::Int64));
        assert_eq!(KeyType::parse("dec32"), Some(KeyType::Float32));
        assert_eq!(KeyType::parse("decimal64"), Some(KeyType::Float64));
        assert_eq!(KeyType::parse("datetime"), Some(KeyType::Timestamp));
        assert_eq!(KeyType::parse("blob"), None);

        for key_type in KeyType::ALL {
            assert_eq!(KeyType::parse(key_type.name()), Some(key_type));
        }
    }

    #[test]
    fn integers_sort_across_zero() {
        let keys: Vec<_> = [i64::MIN, -5, -1, 0, 1, 7, i64::MAX]
            .into_iter()
            .map(|n| enc(KeyType::Int64, n))
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(enc(KeyType::Int32, 0), vec![0x80, 0, 0, 0]);
    }

    #[test]
    fn floats_sort_across_zero_and_infinity() {
        let keys: Vec<_> = [f64::NEG_INFINITY, -1e9, -0.5, 0.0, 1e-300, 2.5, f64::INFINITY]
            .into_iter()
            .map(|f| enc(KeyType::Float64, f))
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));

        let decoded = KeyType::Float32.decode(&enc(KeyType::Float32, -3.25)).unwrap();
        assert_eq!(decoded, KeyValue::Float32(-3.25));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(
            KeyType::Int32.coerce(&Value::from("42")).unwrap(),
            KeyValue::Int32(42)
        );
        assert_eq!(
            KeyType::Int64.coerce(&Value::Float(-7.9)).unwrap(),
            KeyValue::Int64(-7)
        );
        assert_eq!(
            KeyType::Float64.coerce(&Value::Integer(3)).unwrap(),
            KeyValue::Float64(3.0)
        );
        assert_eq!(
            KeyType::String.coerce(&Value::Integer(12)).unwrap(),
            KeyValue::String("12".to_string())
        );
    }

    #[test]
    fn coercion_failures_are_type_mismatches() {
        let cases = [
            (KeyType::Int32, Value::Integer(i64::from(i32::MAX) + 1)),
            (KeyType::Int64, Value::from("abc")),
            (KeyType::Float64, Value::Float(f64::NAN)),
            (KeyType::String, Value::Bool(true)),
            (KeyType::Date, Value::from("2024-02-30")),
            (KeyType::Time, Value::Integer(246_000)),
            (KeyType::Int64, Value::Null),
        ];
        for (key_type, value) in cases {
            assert!(
                matches!(key_type.coerce(&value), Err(CodecError::TypeMismatch { .. })),
                "{key_type} accepted {value:?}"
            );
        }
    }

    #[test]
    fn dates_and_times_pack_as_decimals() {
        let date = KeyType::Date.coerce(&Value::from("2024/02/29")).unwrap();
        assert_eq!(date.to_value(), Value::from("2024-02-29"));
        assert_eq!(date.encode(), encode_i32(20_240_229).to_vec());
        assert_eq!(
            KeyType::Date.coerce(&Value::Integer(19_991_231)).unwrap(),
            KeyValue::Date(Date::new(1999, 12, 31).unwrap())
        );

        let time = KeyType::Time.coerce(&Value::from("07:05:09")).unwrap();
        assert_eq!(time.encode(), encode_i32(70_509).to_vec());
        assert_eq!(KeyType::Time.decode(&time.encode()).unwrap(), time);
        assert_eq!(time.to_value(), Value::from("07:05:09"));
    }

    #[test]
    fn timestamps_accept_millis_and_dates() {
        assert_eq!(
            KeyType::Timestamp.coerce(&Value::Integer(1_000)).unwrap(),
            KeyValue::Timestamp(1_000)
        );
        assert_eq!(
            KeyType::Timestamp.coerce(&Value::from("1970-01-02")).unwrap(),
            KeyValue::Timestamp(86_400_000)
        );
        assert_eq!(
            KeyType::Timestamp
                .coerce(&Value::from("2000-03-01T00:00:01Z"))
                .unwrap(),
            KeyValue::Timestamp(951_868_801_000)
        );
    }

    #[test]
    fn decode_rejects_wrong_width() {
        assert!(matches!(
            KeyType::Int64.decode(&[0, 1, 2]),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            KeyType::Date.decode(&encode_i32(20_241_340)),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn delimited_strings_keep_order_and_split() {
        let a = KeyValue::String("a".to_string()).encode_delimited();
        let a_nul = KeyValue::String("a\0".to_string()).encode_delimited();
        let ab = KeyValue::String("ab".to_string()).encode_delimited();
        assert!(a < a_nul && a_nul < ab);

        let mut entry = a_nul.clone();
        entry.extend_from_slice(b"pk");
        let (key, rest) = KeyType::String.split_delimited(&entry).unwrap();
        assert_eq!(key, KeyValue::String("a\0".to_string()));
        assert_eq!(rest, b"pk");

        let mut entry = KeyValue::Int32(-3).encode_delimited();
        entry.push(9);
        let (key, rest) = KeyType::Int32.split_delimited(&entry).unwrap();
        assert_eq!(key, KeyValue::Int32(-3));
        assert_eq!(rest, &[9u8]);

        assert_eq!(
            KeyType::String.split_delimited(b"abc"),
            Err(CodecError::Truncated)
        );
    }

    #[test]
    fn serde_uses_canonical_names() {
        let names: Vec<_> = KeyType::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            ["string", "int", "long", "float", "double", "date", "time", "timestamp"]
        );
        assert_eq!(KeyType::Float64.storage_class(), "number64");
        assert!(!KeyType::Date.is_indexable());
    }
}
