//! Log store held in a byte vector.

use crate::backend::{check_truncate, checked_range, StorageBackend};
use crate::error::StorageResult;

/// A [`StorageBackend`] kept in memory.
///
/// Lets tests replay a log, or a deliberately damaged copy of one, without
/// touching the file system.
///
/// ```rust
/// use strata_storage::{InMemoryBackend, StorageBackend};
///
/// let mut log = InMemoryBackend::new();
/// assert_eq!(log.append(b"frame").unwrap(), 0);
/// assert_eq!(log.read_all().unwrap(), b"frame");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Vec<u8>,
}

impl InMemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `bytes`, e.g. a log captured from another
    /// engine.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Everything written so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let range = checked_range(offset, len, self.bytes.len() as u64)?;
        Ok(self.bytes[range].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        check_truncate(len, self.bytes.len() as u64)?;
        #[allow(clippy::cast_possible_truncation)]
        self.bytes.truncate(len as usize);
        Ok(())
    }
}
