//! Append-only byte stores the engine log is written to.

use crate::error::{StorageError, StorageResult};

/// An append-only byte store holding one engine log.
///
/// The store knows nothing about log framing: [`crate::OrderedEngine`]
/// appends whole frames and reads them back by offset on replay. Offsets
/// are stable: bytes at an offset never change until a `truncate` cuts
/// them off.
///
/// Implemented by [`crate::InMemoryBackend`] and [`crate::FileBackend`].
pub trait StorageBackend: Send + Sync {
    /// Reads exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfBounds`] if the range ends past
    /// [`StorageBackend::size`], or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data`, returning the offset it starts at.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    fn flush(&mut self) -> StorageResult<()>;

    /// Bytes written so far.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the store back to `len` bytes. Replay uses it to drop a torn
    /// tail so the next append starts on a frame boundary.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TruncateBeyondEnd`] if `len` exceeds the
    /// current size, or an I/O error.
    fn truncate(&mut self, len: u64) -> StorageResult<()>;

    /// Reads the whole store.
    ///
    /// # Errors
    ///
    /// Same as [`StorageBackend::read_at`].
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| StorageError::OutOfBounds {
            offset: 0,
            len: usize::MAX,
            size,
        })?;
        self.read_at(0, len)
    }
}

/// Checks that `len` bytes at `offset` lie within `size`, returning the
/// range as `usize` indexes.
pub(crate) fn checked_range(
    offset: u64,
    len: usize,
    size: u64,
) -> StorageResult<std::ops::Range<usize>> {
    let out_of_bounds = || StorageError::OutOfBounds { offset, len, size };
    let end = offset
        .checked_add(len as u64)
        .filter(|end| *end <= size)
        .ok_or_else(out_of_bounds)?;
    let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
    let end = usize::try_from(end).map_err(|_| out_of_bounds())?;
    Ok(start..end)
}

/// Fails unless `len` is no larger than `size`.
pub(crate) fn check_truncate(len: u64, size: u64) -> StorageResult<()> {
    if len > size {
        return Err(StorageError::TruncateBeyondEnd {
            requested: len,
            size,
        });
    }
    Ok(())
}
