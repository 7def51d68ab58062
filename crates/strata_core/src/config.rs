//! Manager configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strata_codec::Value;

/// Largest machine id a [`crate::SequenceId`] can carry.
pub const MAX_MACHINE_ID: u16 = 511;

/// Default number of records per backup block.
pub const DEFAULT_BACKUP_BLOCK_SIZE: usize = 128;

/// Configuration for opening an [`crate::OperatorManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory holding the engine log. `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Machine id stamped into every generated sequence id.
    pub machine_id: u16,

    /// Records per block when writing backups.
    pub backup_block_size: usize,

    /// Whether the engine log is flushed after every mutation.
    pub sync_on_write: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            path: None,
            machine_id: 0,
            backup_block_size: DEFAULT_BACKUP_BLOCK_SIZE,
            sync_on_write: true,
        }
    }
}

impl ManagerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory for the engine log.
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the sequence id machine id.
    #[must_use]
    pub const fn machine_id(mut self, id: u16) -> Self {
        self.machine_id = id;
        self
    }

    /// Sets records per backup block.
    #[must_use]
    pub const fn backup_block_size(mut self, size: usize) -> Self {
        self.backup_block_size = size;
        self
    }

    /// Sets whether to flush the log after every mutation.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Reads a host-style map such as `{ "path": "./data", "machineId": 3 }`.
    ///
    /// A missing or negative `machineId` means 0.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `value` is not a map or `path` is
    /// not text.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        if !value.is_map() {
            return Err(CoreError::configuration("manager config must be a map"));
        }
        let mut config = Self::default();
        match value.get("path") {
            None | Some(Value::Null) => {}
            Some(Value::Text(path)) => config.path = Some(PathBuf::from(path)),
            Some(other) => {
                return Err(CoreError::configuration(format!(
                    "path must be text, got {}",
                    other.type_name()
                )))
            }
        }
        if let Some(id) = value.get("machineId").and_then(Value::as_integer) {
            config.machine_id = u16::try_from(id.max(0)).unwrap_or(u16::MAX);
        }
        Ok(config)
    }

    /// Checks field ranges.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an out-of-range machine id or a
    /// zero backup block size.
    pub fn validate(&self) -> CoreResult<()> {
        if self.machine_id > MAX_MACHINE_ID {
            return Err(CoreError::configuration(format!(
                "machine id {} is outside 0..={MAX_MACHINE_ID}",
                self.machine_id
            )));
        }
        if self.backup_block_size == 0 {
            return Err(CoreError::configuration("backup block size must be positive"));
        }
        Ok(())
    }
}
