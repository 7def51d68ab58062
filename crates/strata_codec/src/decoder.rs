//! Strict canonical CBOR reader.
//!
//! Accepts exactly what the encoder writes and nothing else, so a decoded
//! document re-encodes to the same bytes.

use crate::encoder::{
    cmp_encoded, MAJOR_ARRAY, MAJOR_BYTES, MAJOR_MAP, MAJOR_NINT, MAJOR_SIMPLE, MAJOR_TEXT,
    MAJOR_UINT,
};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::cmp::Ordering;

/// Longest byte or text string accepted.
const STRING_LIMIT: u64 = 256 << 20;
/// Most items accepted in one array or map.
const ITEM_LIMIT: u64 = 16 << 20;
const DEPTH_LIMIT: usize = 128;
/// Bound on up-front allocation for containers; longer ones grow as read.
const PREALLOC_LIMIT: usize = 1024;

/// Decodes one canonical CBOR item that must span all of `bytes`.
///
/// # Errors
///
/// Fails on truncated input, trailing bytes, non-shortest heads, short
/// floats, NaN, unsorted or duplicate map keys, indefinite lengths, tags,
/// and integers outside the `i64` range.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut reader = Reader { input: bytes, depth: 0 };
    let value = reader.item()?;
    match reader.input.len() {
        0 => Ok(value),
        extra => Err(CodecError::malformed(format!("{extra} bytes after item"))),
    }
}

struct Reader<'a> {
    input: &'a [u8],
    depth: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.input.len() < n {
            return Err(CodecError::Truncated);
        }
        let (head, rest) = self.input.split_at(n);
        self.input = rest;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn item(&mut self) -> CodecResult<Value> {
        let [initial] = self.take_array::<1>()?;
        let (major, info) = (initial >> 5, initial & 0x1f);
        if major == MAJOR_SIMPLE {
            return self.simple(info);
        }
        if major == 6 {
            return Err(CodecError::unsupported("tag"));
        }

        let arg = self.argument(info)?;
        match major {
            MAJOR_UINT => i64::try_from(arg)
                .map(Value::Integer)
                .map_err(|_| CodecError::unsupported("integer above i64::MAX")),
            MAJOR_NINT => i64::try_from(arg)
                .map(|n| Value::Integer(!n))
                .map_err(|_| CodecError::unsupported("integer below i64::MIN")),
            MAJOR_BYTES => {
                let len = limited(arg, STRING_LIMIT)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            MAJOR_TEXT => {
                let len = limited(arg, STRING_LIMIT)?;
                let text = std::str::from_utf8(self.take(len)?).map_err(|_| CodecError::BadUtf8)?;
                Ok(Value::Text(text.to_owned()))
            }
            MAJOR_ARRAY => {
                let len = limited(arg, ITEM_LIMIT)?;
                self.descend(|r| {
                    let mut items = Vec::with_capacity(len.min(PREALLOC_LIMIT));
                    for _ in 0..len {
                        items.push(r.item()?);
                    }
                    Ok(Value::Array(items))
                })
            }
            MAJOR_MAP => {
                let len = limited(arg, ITEM_LIMIT)?;
                self.descend(|r| r.map_body(len))
            }
            _ => unreachable!("major type is three bits"),
        }
    }

    /// Argument of a head with additional info `info`, which must use the
    /// shortest form.
    fn argument(&mut self, info: u8) -> CodecResult<u64> {
        let (arg, floor) = match info {
            0..=23 => return Ok(u64::from(info)),
            24 => (u64::from(self.take_array::<1>()?[0]), 24),
            25 => (u64::from(u16::from_be_bytes(self.take_array()?)), 1 << 8),
            26 => (u64::from(u32::from_be_bytes(self.take_array()?)), 1 << 16),
            27 => (u64::from_be_bytes(self.take_array()?), 1 << 32),
            31 => return Err(CodecError::IndefiniteLength),
            _ => return Err(CodecError::malformed(format!("reserved head info {info}"))),
        };
        if arg < floor {
            return Err(CodecError::malformed(format!("{arg} not in shortest form")));
        }
        Ok(arg)
    }

    fn map_body(&mut self, len: usize) -> CodecResult<Value> {
        let mut pairs = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        let mut last_key: Option<&'a [u8]> = None;
        for _ in 0..len {
            let before = self.input;
            let key = self.item()?;
            let encoded = &before[..before.len() - self.input.len()];
            if last_key.is_some_and(|last| cmp_encoded(last, encoded) != Ordering::Less) {
                return Err(CodecError::malformed("map keys out of order or repeated"));
            }
            last_key = Some(encoded);
            pairs.push((key, self.item()?));
        }
        Ok(Value::Map(pairs))
    }

    fn simple(&mut self, info: u8) -> CodecResult<Value> {
        match info {
            20 | 21 => Ok(Value::Bool(info == 21)),
            // undefined reads as null
            22 | 23 => Ok(Value::Null),
            25 | 26 => Err(CodecError::malformed("float narrower than 64 bits")),
            27 => match f64::from_be_bytes(self.take_array()?) {
                f if f.is_nan() => Err(CodecError::NaN),
                f => Ok(Value::Float(f)),
            },
            31 => Err(CodecError::malformed("stray break")),
            _ => Err(CodecError::unsupported(format!("simple value {info}"))),
        }
    }

    fn descend<T>(&mut self, body: impl FnOnce(&mut Self) -> CodecResult<T>) -> CodecResult<T> {
        if self.depth == DEPTH_LIMIT {
            return Err(CodecError::malformed("nested too deeply"));
        }
        self.depth += 1;
        let out = body(self);
        self.depth -= 1;
        out
    }
}

#[allow(clippy::cast_possible_truncation)]
fn limited(claimed: u64, limit: u64) -> CodecResult<usize> {
    if claimed > limit {
        return Err(CodecError::TooLarge { claimed, limit });
    }
    Ok(claimed as usize)
}
