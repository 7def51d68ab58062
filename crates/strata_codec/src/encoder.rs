//! Canonical CBOR writer.
//!
//! One document has exactly one encoding: integers and lengths take the
//! shortest head, floats are always eight bytes, map entries are sorted by
//! their encoded key (shorter first, then bytewise) and nothing is
//! written with indefinite length.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::cmp::Ordering;

pub(crate) const MAJOR_UINT: u8 = 0;
pub(crate) const MAJOR_NINT: u8 = 1;
pub(crate) const MAJOR_BYTES: u8 = 2;
pub(crate) const MAJOR_TEXT: u8 = 3;
pub(crate) const MAJOR_ARRAY: u8 = 4;
pub(crate) const MAJOR_MAP: u8 = 5;
pub(crate) const MAJOR_SIMPLE: u8 = 7;

/// Encodes `value` as canonical CBOR.
///
/// # Errors
///
/// Returns [`CodecError::NaN`] if a float anywhere in `value` is NaN.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    write_value(&mut out, value)?;
    Ok(out)
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> CodecResult<()> {
    match value {
        Value::Null => out.push(simple(22)),
        Value::Bool(false) => out.push(simple(20)),
        Value::Bool(true) => out.push(simple(21)),
        Value::Integer(n) => write_integer(out, *n),
        Value::Float(f) if f.is_nan() => return Err(CodecError::NaN),
        Value::Float(f) => {
            out.push(simple(27));
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Bytes(bytes) => {
            write_head(out, MAJOR_BYTES, bytes.len() as u64);
            out.extend_from_slice(bytes);
        }
        Value::Text(text) => {
            write_head(out, MAJOR_TEXT, text.len() as u64);
            out.extend_from_slice(text.as_bytes());
        }
        Value::Array(items) => {
            write_head(out, MAJOR_ARRAY, items.len() as u64);
            items.iter().try_for_each(|item| write_value(out, item))?;
        }
        Value::Map(pairs) => {
            let mut entries = pairs
                .iter()
                .map(|(key, value)| Ok((to_canonical_cbor(key)?, value)))
                .collect::<CodecResult<Vec<_>>>()?;
            entries.sort_by(|(a, _), (b, _)| cmp_encoded(a, b));

            write_head(out, MAJOR_MAP, entries.len() as u64);
            for (key, value) in entries {
                out.extend_from_slice(&key);
                write_value(out, value)?;
            }
        }
    }
    Ok(())
}

const fn simple(info: u8) -> u8 {
    (MAJOR_SIMPLE << 5) | info
}

#[allow(clippy::cast_sign_loss)]
fn write_integer(out: &mut Vec<u8>, n: i64) {
    if n < 0 {
        // !n == -1 - n, which fits u64 for every negative i64.
        write_head(out, MAJOR_NINT, !n as u64);
    } else {
        write_head(out, MAJOR_UINT, n as u64);
    }
}

/// Writes an item head with the shortest argument encoding.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn write_head(out: &mut Vec<u8>, major: u8, arg: u64) {
    let major = major << 5;
    if arg < 24 {
        out.push(major | arg as u8);
    } else if arg <= u64::from(u8::MAX) {
        out.extend_from_slice(&[major | 24, arg as u8]);
    } else if arg <= u64::from(u16::MAX) {
        out.push(major | 25);
        out.extend_from_slice(&(arg as u16).to_be_bytes());
    } else if arg <= u64::from(u32::MAX) {
        out.push(major | 26);
        out.extend_from_slice(&(arg as u32).to_be_bytes());
    } else {
        out.push(major | 27);
        out.extend_from_slice(&arg.to_be_bytes());
    }
}

/// Canonical ordering of two encoded items: shorter first, then bytewise.
pub(crate) fn cmp_encoded(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cbor(value: impl Into<Value>) -> Vec<u8> {
        to_canonical_cbor(&value.into()).unwrap()
    }

    #[test]
    fn simple_values_and_floats() {
        assert_eq!(cbor(()), [0xf6]);
        assert_eq!(cbor(false), [0xf4]);
        assert_eq!(cbor(true), [0xf5]);
        assert_eq!(cbor(-2.5), [0xfb, 0xc0, 0x04, 0, 0, 0, 0, 0, 0]);
        assert_eq!(cbor(0.5f32).len(), 9);
    }

    #[test]
    fn heads_take_the_shortest_form() {
        let cases: [(i64, &[u8]); 9] = [
            (0, &[0x00]),
            (23, &[0x17]),
            (24, &[0x18, 0x18]),
            (255, &[0x18, 0xff]),
            (256, &[0x19, 0x01, 0x00]),
            (70_000, &[0x1a, 0x00, 0x01, 0x11, 0x70]),
            (-1, &[0x20]),
            (-24, &[0x37]),
            (-25, &[0x38, 0x18]),
        ];
        for (n, expected) in cases {
            assert_eq!(cbor(n), expected, "{n}");
        }
        assert_eq!(cbor(i64::MIN)[..2], [0x3b, 0x7f]);
        assert_eq!(cbor(i64::MAX)[..2], [0x1b, 0x7f]);
    }

    #[test]
    fn nan_anywhere_is_refused() {
        let doc = Value::document([("inner", Value::from(vec![1.0, f64::NAN]))]);
        assert_eq!(to_canonical_cbor(&doc), Err(CodecError::NaN));
    }

    #[test]
    fn strings_and_arrays() {
        assert_eq!(cbor(&[7u8, 8][..]), [0x42, 7, 8]);
        assert_eq!(cbor("héllo"), b"\x66h\xc3\xa9llo");
        assert_eq!(cbor(vec!["a", "b"]), [0x82, 0x61, b'a', 0x61, b'b']);
    }

    #[test]
    fn map_entries_sorted_whatever_the_input_order() {
        let scrambled = Value::Map(vec![
            (Value::from("bb"), Value::from(2)),
            (Value::from("a"), Value::from(1)),
            (Value::from(1), Value::from(0)),
        ]);
        assert_eq!(
            cbor(scrambled.clone()),
            [0xa3, 0x01, 0x00, 0x61, b'a', 0x01, 0x62, b'b', b'b', 0x02]
        );
        let Value::Map(mut pairs) = scrambled else {
            unreachable!()
        };
        pairs.reverse();
        assert_eq!(
            cbor(Value::Map(pairs)),
            [0xa3, 0x01, 0x00, 0x61, b'a', 0x01, 0x62, b'b', b'b', 0x02]
        );
    }
}
