//! Time-ordered sequence ids.
//!
//! ## Layout
//!
//! ```text
//! | millis since epoch (u64 BE) | counter (u16 BE) | machine id (u16 BE) |
//! ```
//!
//! Byte order equals generation order for one machine id. The generator
//! packs `millis << 16 | counter` into a single atomic word; a counter
//! overflow carries into the millisecond field, borrowing from the future
//! rather than ever repeating an id. Millis therefore use 48 bits at most,
//! and a generator whose word is spent fails instead of wrapping.

use crate::config::MAX_MACHINE_ID;
use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use strata_codec::Value;

/// Encoded size of a [`SequenceId`].
pub const SEQUENCE_ID_LEN: usize = 12;

/// Largest millisecond field a generator can track.
pub const MAX_ID_MILLIS: u64 = (1 << 48) - 1;

/// A 12-byte, time-ordered, machine-scoped unique id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId([u8; SEQUENCE_ID_LEN]);

impl SequenceId {
    /// Creates an id from its parts.
    pub fn new(millis: u64, counter: u16, machine_id: u16) -> Self {
        let mut bytes = [0u8; SEQUENCE_ID_LEN];
        bytes[..8].copy_from_slice(&millis.to_be_bytes());
        bytes[8..10].copy_from_slice(&counter.to_be_bytes());
        bytes[10..].copy_from_slice(&machine_id.to_be_bytes());
        Self(bytes)
    }

    /// Creates an id from raw bytes.
    pub const fn from_bytes(bytes: [u8; SEQUENCE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Reads an id from exactly [`SEQUENCE_ID_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch for any other length.
    pub fn from_slice(bytes: &[u8]) -> CoreResult<Self> {
        bytes.try_into().map(Self).map_err(|_| {
            CoreError::type_mismatch(format!(
                "sequence id must be {SEQUENCE_ID_LEN} bytes, got {}",
                bytes.len()
            ))
        })
    }

    /// Parses 24 hex digits.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch for malformed text.
    pub fn parse_hex(text: &str) -> CoreResult<Self> {
        let invalid = || CoreError::type_mismatch(format!("invalid sequence id {text:?}"));
        if text.len() != SEQUENCE_ID_LEN * 2 || !text.is_ascii() {
            return Err(invalid());
        }
        let mut bytes = [0u8; SEQUENCE_ID_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }

    /// Reads an id from hex text or a 12-byte byte string.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch for any other value.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        match value {
            Value::Text(text) => Self::parse_hex(text),
            Value::Bytes(bytes) => Self::from_slice(bytes),
            other => Err(CoreError::type_mismatch(format!(
                "sequence id must be hex text or bytes, got {}",
                other.type_name()
            ))),
        }
    }

    /// The id as hex text, the form keys are restored as.
    pub fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }

    /// Raw bytes.
    pub const fn as_bytes(&self) -> &[u8; SEQUENCE_ID_LEN] {
        &self.0
    }

    /// Milliseconds since the Unix epoch.
    pub fn millis(&self) -> u64 {
        let mut millis = [0u8; 8];
        millis.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(millis)
    }

    /// Per-millisecond counter.
    pub fn counter(&self) -> u16 {
        u16::from_be_bytes([self.0[8], self.0[9]])
    }

    /// Machine id of the generator.
    pub fn machine_id(&self) -> u16 {
        u16::from_be_bytes([self.0[10], self.0[11]])
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceId({self})")
    }
}

/// Lock-free generator of strictly increasing [`SequenceId`]s.
#[derive(Debug)]
pub struct SequenceGenerator {
    machine_id: u16,
    /// `millis << 16 | counter` of the last id handed out.
    state: AtomicU64,
}

impl SequenceGenerator {
    /// Creates a generator for `machine_id`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `machine_id` exceeds 511.
    pub fn new(machine_id: u16) -> CoreResult<Self> {
        if machine_id > MAX_MACHINE_ID {
            return Err(CoreError::configuration(format!(
                "machine id {machine_id} is outside 0..={MAX_MACHINE_ID}"
            )));
        }
        Ok(Self {
            machine_id,
            state: AtomicU64::new(0),
        })
    }

    /// The machine id stamped into every id.
    pub const fn machine_id(&self) -> u16 {
        self.machine_id
    }

    /// Returns the next id.
    ///
    /// # Errors
    ///
    /// Returns `IdsExhausted` once an id with the largest millis and
    /// counter has been handed out or observed.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_id(&self) -> CoreResult<SequenceId> {
        let now = current_millis() << 16;
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let next = if now > current {
                now
            } else {
                current.checked_add(1).ok_or(CoreError::IdsExhausted {
                    machine_id: self.machine_id,
                })?
            };
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Ok(SequenceId::new(next >> 16, next as u16, self.machine_id)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Moves the generator past `id`, so later ids sort after it.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch if the millis of `id` exceed
    /// [`MAX_ID_MILLIS`]; the generator is left unchanged.
    pub fn observe(&self, id: SequenceId) -> CoreResult<()> {
        let millis = id.millis();
        if millis > MAX_ID_MILLIS {
            return Err(CoreError::type_mismatch(format!(
                "sequence id {id} has millis beyond 48 bits"
            )));
        }
        self.state
            .fetch_max((millis << 16) | u64::from(id.counter()), Ordering::AcqRel);
        Ok(())
    }
}

fn current_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    // 48 bits of milliseconds last until the year 10889
    u64::try_from(millis).unwrap_or(u64::MAX) & MAX_ID_MILLIS
}
