//! # Strata Core
//!
//! Typed operator collections over the Strata engine.
//!
//! This crate provides:
//! - [`OperatorManager`]: the name-level registry of operators
//! - Object, lat/lon, sequence and queue operators
//! - Secondary indexes over document field paths
//! - [`SequenceId`] generation
//! - Backup and restore of single operators
//!
//! ## Example
//!
//! ```rust
//! use strata_core::prelude::*;
//!
//! let manager = OperatorManager::open(ManagerConfig::default()).unwrap();
//! manager.create_lat_lon("places", None).unwrap();
//!
//! let places = manager.get("places").unwrap().into_lat_lon().unwrap();
//! places
//!     .put(
//!         &[Value::from(35.68), Value::from(139.76)],
//!         Value::document([("name", "Tokyo")]),
//!     )
//!     .unwrap();
//!
//! let near = places
//!     .range(false, &[Value::from(35.68), Value::from(139.76), Value::from(5_000)])
//!     .unwrap()
//!     .count();
//! assert_eq!(near, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod catalog;
mod config;
mod error;
mod index;
mod manager;
mod mode;
mod operator;
mod sequence;

pub use backup::{BackupConfig, BackupManager, BackupResult, RestoreResult};
pub use catalog::OperatorDescriptor;
pub use config::{ManagerConfig, DEFAULT_BACKUP_BLOCK_SIZE, MAX_MACHINE_ID};
pub use error::{CoreError, CoreResult};
pub use index::{split_path, IndexDefinition};
pub use manager::OperatorManager;
pub use mode::{OperatorKind, OperatorMode};
pub use operator::{
    Cursor, Document, Handle, Key, KeyLayout, KeyedOperator, LatLonKeys, LatLonOperator,
    ObjectKeys, ObjectOperator, Operator, QueueOperator, ScanPlan, SearchOperator, SequenceKeys,
    SequenceOperator,
};
pub use sequence::{SequenceGenerator, SequenceId, MAX_ID_MILLIS, SEQUENCE_ID_LEN};

/// Common imports for working with operators.
pub mod prelude {
    pub use crate::{
        CoreError, CoreResult, Handle, ManagerConfig, Operator, OperatorKind, OperatorManager,
        SearchOperator, SequenceId,
    };
    pub use strata_codec::{KeyType, Value};
}
