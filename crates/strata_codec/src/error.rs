//! Codec errors.

use thiserror::Error;

/// Result alias used throughout the codec.
pub type CodecResult<T> = Result<T, CodecError>;

/// Why a document, key or coordinate could not be encoded or decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Input bytes do not form a value this codec accepts.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Input ended in the middle of a value.
    #[error("input truncated")]
    Truncated,

    /// A float was NaN. Documents and keys never hold NaN.
    #[error("NaN cannot be stored")]
    NaN,

    /// Indefinite-length strings, arrays and maps are rejected.
    #[error("indefinite-length item")]
    IndefiniteLength,

    /// A text string or string key was not UTF-8.
    #[error("text is not valid UTF-8")]
    BadUtf8,

    /// A CBOR item (tag, simple value) the document model has no place for.
    #[error("unsupported item: {0}")]
    Unsupported(String),

    /// A length prefix asked for more than the decoder will allocate.
    #[error("length {claimed} exceeds limit {limit}")]
    TooLarge {
        /// Length announced by the input.
        claimed: u64,
        /// Largest length accepted.
        limit: u64,
    },

    /// A value cannot be coerced to the declared key type.
    #[error("expected {expected}, got {found}")]
    TypeMismatch {
        /// Declared key type.
        expected: String,
        /// Description of the supplied value.
        found: String,
    },

    /// Latitude outside [-90, 90] or longitude outside [-180, 180].
    #[error("coordinate out of range: ({lat}, {lon})")]
    InvalidCoordinate {
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lon: f64,
    },
}

impl CodecError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    pub(crate) fn unsupported(item: impl Into<String>) -> Self {
        Self::Unsupported(item.into())
    }

    /// Builds a [`CodecError::TypeMismatch`].
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
