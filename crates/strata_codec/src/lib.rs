//! # Strata Codec
//!
//! Byte-level encodings used by Strata operators.
//!
//! - [`Value`]: the dynamic document type, stored as canonical CBOR
//! - [`KeyType`] / [`KeyValue`]: typed keys with order-preserving encodings
//! - [`GeoKey`]: latitude/longitude on a Z-order curve, with disc covers
//!
//! Documents are written as canonical CBOR, so equal documents always
//! produce equal bytes and [`from_cbor`] refuses anything the encoder would
//! not have produced.
//!
//! ## Usage
//!
//! ```
//! use strata_codec::{from_cbor, to_canonical_cbor, KeyType, Value};
//!
//! let doc = Value::document([("name", Value::from("ann")), ("age", Value::from(41))]);
//! let bytes = to_canonical_cbor(&doc).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), doc);
//!
//! let a = KeyType::Int64.encode(&Value::from(-3)).unwrap();
//! let b = KeyType::Int64.encode(&Value::from(2)).unwrap();
//! assert!(a < b);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
pub mod geo;
mod key;
mod value;

pub use decoder::from_cbor;
pub use encoder::to_canonical_cbor;
pub use error::{CodecError, CodecResult};
pub use geo::{haversine_distance, BBox, GeoKey, GeoRange, EARTH_RADIUS_METERS};
pub use key::{Date, KeyType, KeyValue, TimeOfDay};
pub use value::Value;
