//! Log store kept in a single file.

use crate::backend::{check_truncate, checked_range, StorageBackend};
use crate::error::StorageResult;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct Handle {
    file: File,
    len: u64,
    /// Appended since the last sync.
    dirty: bool,
}

/// A [`StorageBackend`] writing to one file.
///
/// Appends go to the OS page cache; [`StorageBackend::flush`] syncs them to
/// disk, and is a no-op when nothing was appended since the last sync.
///
/// ```no_run
/// use strata_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open(Path::new("data/strata.log")).unwrap();
/// log.append(b"frame").unwrap();
/// log.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    handle: Mutex<Handle>,
}

impl FileBackend {
    /// Opens the log file at `path`, creating it and any missing parent
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory or the file cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            handle: Mutex::new(Handle {
                file,
                len,
                dirty: false,
            }),
        })
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut handle = self.handle.lock();
        checked_range(offset, len, handle.len)?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let handle = self.handle.get_mut();
        let offset = handle.len;
        if !data.is_empty() {
            // Reads move the cursor.
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.write_all(data)?;
            handle.len += data.len() as u64;
            handle.dirty = true;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let handle = self.handle.get_mut();
        if handle.dirty {
            handle.file.sync_data()?;
            handle.dirty = false;
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.handle.lock().len)
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        let handle = self.handle.get_mut();
        check_truncate(len, handle.len)?;
        if len < handle.len {
            handle.file.set_len(len)?;
            handle.file.sync_all()?;
            handle.len = len;
            handle.dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use tempfile::tempdir;

    #[test]
    fn reads_back_appended_frames() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("strata.log")).unwrap();

        assert_eq!(log.append(b"first").unwrap(), 0);
        assert_eq!(log.append(b"second").unwrap(), 5);
        assert_eq!(log.read_at(5, 6).unwrap(), b"second");
        assert_eq!(log.read_all().unwrap(), b"firstsecond");
        assert!(matches!(
            log.read_at(9, 5),
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn appends_after_a_read_go_to_the_end() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("strata.log")).unwrap();
        log.append(b"abcdef").unwrap();
        log.read_at(0, 2).unwrap();
        assert_eq!(log.append(b"gh").unwrap(), 6);
        assert_eq!(log.read_all().unwrap(), b"abcdefgh");
    }

    #[test]
    fn synced_log_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("strata.log");

        let mut log = FileBackend::open(&path).unwrap();
        log.append(b"durable").unwrap();
        log.flush().unwrap();
        drop(log);

        let log = FileBackend::open(&path).unwrap();
        assert_eq!(log.path(), path);
        assert_eq!(log.read_all().unwrap(), b"durable");
    }

    #[test]
    fn truncate_drops_a_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strata.log");
        let mut log = FileBackend::open(&path).unwrap();
        log.append(b"whole+torn").unwrap();

        log.truncate(5).unwrap();
        assert_eq!(log.size().unwrap(), 5);
        assert_eq!(fs::metadata(&path).unwrap().len(), 5);
        assert!(matches!(
            log.truncate(6),
            Err(StorageError::TruncateBeyondEnd { .. })
        ));

        assert_eq!(log.append(b"!").unwrap(), 5);
        assert_eq!(log.read_all().unwrap(), b"whole!");
    }
}
