//! Operator backup and restore.
//!
//! A backup is a stream of length-prefixed blocks:
//!
//! ```text
//! | u32_le len | header (CBOR [name, mode map]) |
//! | u32_le len | zstd(CBOR [key0, doc0, key1, doc1, ...]) |   repeated
//! | u32_le 0 |
//! ```
//!
//! The mode map is the catalog record of the operator (see
//! [`OperatorDescriptor::to_mode_map`]), so a restore recreates the
//! operator with its kind, key type and index definitions. Keys are the
//! raw engine keys, carried as CBOR byte strings.
//!
//! ## Usage
//!
//! ```rust
//! use strata_core::{ManagerConfig, OperatorManager, SearchOperator};
//! use strata_codec::{KeyType, Value};
//!
//! let manager = OperatorManager::open(ManagerConfig::default()).unwrap();
//! manager.create_object("users", KeyType::String).unwrap();
//! let users = manager.get("users").unwrap().into_object().unwrap();
//! users.put(&[Value::from("u1")], Value::document([("name", "Ann")])).unwrap();
//!
//! let mut stream = Vec::new();
//! let written = manager.backup("users", &mut stream).unwrap();
//! assert_eq!(written.record_count, 1);
//!
//! manager.delete("users").unwrap();
//! let restored = manager.restore(&mut stream.as_slice()).unwrap();
//! assert_eq!(restored.record_count, 1);
//! ```
//!
//! ## Consistency
//!
//! Backup holds the operator lock shared while it drains, so a write batch
//! commit (which takes it exclusively) lands either wholly before or
//! wholly after the backup. Single writes may interleave with the drain.
//!
//! Restore is not transactional across blocks: a corrupt block aborts the
//! restore with [`CoreError::CorruptData`] and blocks applied before it
//! stay in the operator.

use crate::catalog::{creatable_mode, OperatorDescriptor};
use crate::config::{ManagerConfig, DEFAULT_BACKUP_BLOCK_SIZE};
use crate::error::{CoreError, CoreResult, EngineContext};
use crate::index::IndexManager;
use crate::manager::{observe_newest, OperatorManager};
use crate::mode::OperatorKind;
use crate::operator::decode_document;
use std::io::{self, Read, Write};
use std::ops::Bound;
use strata_codec::{from_cbor, to_canonical_cbor, Value};
use strata_storage::BatchOp;
use tracing::{debug, info};

/// Largest block length accepted when reading a stream.
const MAX_BLOCK_LEN: usize = 256 * 1024 * 1024;

/// zstd level for data blocks.
const COMPRESSION_LEVEL: i32 = 3;

/// Configuration for backup operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupConfig {
    /// Records per data block.
    pub block_size: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BACKUP_BLOCK_SIZE,
        }
    }
}

impl BackupConfig {
    /// Takes the block size from a manager configuration.
    #[must_use]
    pub fn from_manager(config: &ManagerConfig) -> Self {
        Self {
            block_size: config.backup_block_size.max(1),
        }
    }

    /// Sets the records per block.
    #[must_use]
    pub const fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }
}

/// Summary of a written backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupResult {
    /// Operator name.
    pub name: String,
    /// Operator kind.
    pub kind: OperatorKind,
    /// Records written.
    pub record_count: u64,
    /// Data blocks written, not counting header and terminator.
    pub block_count: u64,
    /// Total stream length.
    pub bytes_written: u64,
}

/// Summary of a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResult {
    /// Operator name.
    pub name: String,
    /// Operator kind.
    pub kind: OperatorKind,
    /// Records restored.
    pub record_count: u64,
    /// Data blocks read.
    pub block_count: u64,
}

/// Writes and reads backup streams.
#[derive(Debug, Clone, Default)]
pub struct BackupManager {
    config: BackupConfig,
}

impl BackupManager {
    /// Creates a backup manager with the given configuration.
    #[must_use]
    pub fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    /// Creates a backup manager with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BackupConfig::default())
    }

    /// Writes every record of operator `name` to `out`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown operator, `AlreadyClosed` if the
    /// manager is closed, or an I/O error from `out`.
    pub fn backup<W: Write>(
        &self,
        manager: &OperatorManager,
        name: &str,
        out: &mut W,
    ) -> CoreResult<BackupResult> {
        let core = manager.core(name)?;
        let operators = manager.read()?;
        let defs = core.read()?;
        drop(operators);

        let descriptor = core.descriptor(&defs);
        let kind = descriptor.mode.kind;
        info!(operator = name, %kind, "backup started");

        let header = Value::Array(vec![Value::from(name), descriptor.to_mode_map()]);
        let mut bytes_written = write_block(out, &to_canonical_cbor(&header)?)?;

        let block_size = self.config.block_size.max(1);
        let mut record_count = 0u64;
        let mut block_count = 0u64;
        let mut pending: Vec<Value> = Vec::with_capacity(block_size * 2);
        let mut from: Option<Vec<u8>> = None;
        loop {
            let bound = match &from {
                Some(key) => Bound::Excluded(key.as_slice()),
                None => Bound::Unbounded,
            };
            let Some((key, value)) = core.engine().seek(name, bound, false).for_operator(name)?
            else {
                break;
            };
            pending.push(Value::Bytes(key.clone()));
            pending.push(decode_document(name, &value)?);
            record_count += 1;
            from = Some(key);

            if pending.len() == block_size * 2 {
                bytes_written += write_data_block(out, std::mem::take(&mut pending))?;
                block_count += 1;
            }
        }
        if !pending.is_empty() {
            bytes_written += write_data_block(out, pending)?;
            block_count += 1;
        }
        bytes_written += write_block(out, &[])?;
        out.flush()?;
        drop(defs);

        info!(operator = name, record_count, block_count, bytes_written, "backup finished");
        Ok(BackupResult {
            name: name.to_string(),
            kind,
            record_count,
            block_count,
            bytes_written,
        })
    }

    /// Restores an operator from `input`, replacing any operator of the
    /// same name.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` for a truncated or malformed stream,
    /// `AlreadyClosed` if the manager is closed, or an engine error.
    pub fn restore<R: Read>(
        &self,
        manager: &OperatorManager,
        input: &mut R,
    ) -> CoreResult<RestoreResult> {
        let descriptor = Self::read_header(input)?;
        let name = descriptor.name.clone();
        let kind = descriptor.mode.kind;
        info!(operator = %name, %kind, "restore started");

        let mut operators = manager.write()?;
        if manager.remove_locked(&mut operators, &name)? {
            debug!(operator = %name, "replacing existing operator");
        }
        let core = manager.insert_locked(&mut operators, descriptor)?;
        let defs = core.write()?;
        drop(operators);

        let indexes = IndexManager::new(core.engine(), &name, &defs);
        let mut record_count = 0u64;
        let mut block_count = 0u64;
        while let Some(block) = read_block(input)? {
            let payload = decompress(&block, MAX_BLOCK_LEN)
                .map_err(|e| CoreError::corrupt_data(format!("block {block_count}: {e}")))?;
            let entries = from_cbor(&payload)
                .map_err(|e| CoreError::corrupt_data(format!("block {block_count}: {e}")))?;
            let flat = entries.as_array().ok_or_else(|| {
                CoreError::corrupt_data(format!("block {block_count} is not a list"))
            })?;
            if flat.len() % 2 != 0 {
                return Err(CoreError::corrupt_data(format!(
                    "block {block_count} has an odd number of entries"
                )));
            }

            let mut ops = Vec::with_capacity(flat.len());
            for pair in flat.chunks_exact(2) {
                let key = pair[0].as_bytes().ok_or_else(|| {
                    CoreError::corrupt_data(format!("block {block_count} has a non-byte key"))
                })?;
                ops.extend(indexes.insert_ops(key, &pair[1]));
                ops.push(BatchOp::Put {
                    tree: name.clone(),
                    key: key.to_vec(),
                    value: to_canonical_cbor(&pair[1])?,
                });
            }
            core.apply(&ops)?;
            record_count += (flat.len() / 2) as u64;
            block_count += 1;
        }
        if matches!(kind, OperatorKind::Sequence | OperatorKind::Queue) {
            observe_newest(core.engine(), core.ids(), &name)?;
        }
        drop(defs);

        info!(operator = %name, record_count, block_count, "restore finished");
        Ok(RestoreResult {
            name,
            kind,
            record_count,
            block_count,
        })
    }

    /// Reads the header block of a stream: the name and descriptor of the
    /// backed-up operator. The stream is left at the first data block.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` for a missing or malformed header, or one
    /// naming an operator that could not be created.
    pub fn read_header<R: Read>(input: &mut R) -> CoreResult<OperatorDescriptor> {
        let block = read_block(input)?
            .ok_or_else(|| CoreError::corrupt_data("backup stream has an empty header"))?;
        let header = from_cbor(&block)
            .map_err(|e| CoreError::corrupt_data(format!("backup header: {e}")))?;
        let [name, mode] = header.as_array().unwrap_or_default() else {
            return Err(CoreError::corrupt_data("backup header must be [name, mode]"));
        };
        let name = name
            .as_text()
            .ok_or_else(|| CoreError::corrupt_data("backup header name is not text"))?;
        let corrupt =
            |e: CoreError| CoreError::corrupt_data(format!("backup header of {name:?}: {e}"));
        let mut descriptor = OperatorDescriptor::from_mode_map(name, mode).map_err(corrupt)?;
        descriptor.mode = creatable_mode(name, descriptor.mode).map_err(corrupt)?;
        if !descriptor.mode.kind.supports_indexes() && !descriptor.indexes.is_empty() {
            return Err(CoreError::corrupt_data(format!(
                "backup header of {name:?}: {} operators have no indexes",
                descriptor.mode.kind
            )));
        }
        Ok(descriptor)
    }
}

fn write_data_block<W: Write>(out: &mut W, entries: Vec<Value>) -> CoreResult<u64> {
    let payload = to_canonical_cbor(&Value::Array(entries))?;
    let compressed = zstd::encode_all(payload.as_slice(), COMPRESSION_LEVEL)?;
    write_block(out, &compressed)
}

/// Inflates a data block, failing once it outgrows `limit` bytes.
fn decompress(block: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    zstd::Decoder::new(block)?
        .take(limit as u64 + 1)
        .read_to_end(&mut payload)?;
    if payload.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("inflates past {limit} bytes"),
        ));
    }
    Ok(payload)
}

fn write_block<W: Write>(out: &mut W, bytes: &[u8]) -> CoreResult<u64> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| CoreError::configuration("backup block exceeds 4 GiB"))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(bytes)?;
    Ok(4 + u64::from(len))
}

/// Reads one block. `None` is the zero-length terminator.
fn read_block<R: Read>(input: &mut R) -> CoreResult<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    read_exact(input, &mut len, "block length")?;
    let len = u32::from_le_bytes(len) as usize;
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_BLOCK_LEN {
        return Err(CoreError::corrupt_data(format!("bad block length {len}")));
    }
    let mut block = vec![0u8; len];
    read_exact(input, &mut block, "block body")?;
    Ok(Some(block))
}

fn read_exact<R: Read>(input: &mut R, buf: &mut [u8], what: &str) -> CoreResult<()> {
    input.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            CoreError::corrupt_data(format!("backup stream truncated in {what}"))
        }
        _ => CoreError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{Operator, SearchOperator};
    use strata_codec::KeyType;

    fn manager() -> OperatorManager {
        OperatorManager::open(ManagerConfig::default().backup_block_size(2)).unwrap()
    }

    fn users(manager: &OperatorManager, count: i64) {
        manager.create_object("users", KeyType::Int64).unwrap();
        let users = manager.get("users").unwrap().into_object().unwrap();
        users.create_index("string", &["city"]).unwrap();
        for n in 0..count {
            let city = if n % 2 == 0 { "Oslo" } else { "Lima" };
            users
                .put(&[Value::from(n)], Value::document([("city", city)]))
                .unwrap();
        }
    }

    #[test]
    fn blocks_follow_block_size() {
        let manager = manager();
        users(&manager, 5);
        let mut stream = Vec::new();
        let result = manager.backup("users", &mut stream).unwrap();
        assert_eq!(result.record_count, 5);
        assert_eq!(result.block_count, 3);
        assert_eq!(result.bytes_written, stream.len() as u64);
        assert_eq!(&stream[stream.len() - 4..], &[0, 0, 0, 0]);

        let header = BackupManager::read_header(&mut stream.as_slice()).unwrap();
        assert_eq!(header.name, "users");
        assert_eq!(header.mode.key_type, Some(KeyType::Int64));
        assert_eq!(header.indexes.len(), 1);
    }

    #[test]
    fn restore_rebuilds_records_and_indexes() {
        let manager = manager();
        users(&manager, 5);
        let mut stream = Vec::new();
        manager.backup("users", &mut stream).unwrap();
        manager.delete("users").unwrap();

        let result = manager.restore(&mut stream.as_slice()).unwrap();
        assert_eq!(result.name, "users");
        assert_eq!(result.record_count, 5);
        assert_eq!(result.block_count, 3);

        let users = manager.get("users").unwrap().into_object().unwrap();
        assert_eq!(users.len().unwrap(), 5);
        let oslo = users
            .index(false, Some(&Value::from("Oslo")), &["city"])
            .unwrap()
            .count();
        assert_eq!(oslo, 3);
    }

    #[test]
    fn empty_operator_round_trips() {
        let manager = manager();
        manager.create_queue("jobs").unwrap();
        let mut stream = Vec::new();
        let result = manager.backup("jobs", &mut stream).unwrap();
        assert_eq!(result.block_count, 0);

        let restored = manager.restore(&mut stream.as_slice()).unwrap();
        assert_eq!(restored.kind, OperatorKind::Queue);
        assert_eq!(restored.record_count, 0);
    }

    #[test]
    fn unknown_operator_is_not_found() {
        let manager = manager();
        let mut stream = Vec::new();
        assert!(matches!(
            manager.backup("nope", &mut stream),
            Err(CoreError::NotFound { .. })
        ));
    }

    fn stream_named(name: &str, mode: Value) -> Vec<u8> {
        let mut stream = Vec::new();
        let header = Value::Array(vec![Value::from(name), mode]);
        write_block(&mut stream, &to_canonical_cbor(&header).unwrap()).unwrap();
        write_block(&mut stream, &[]).unwrap();
        stream
    }

    fn queue_mode() -> Value {
        Value::document([("@operator", "queue")])
    }

    #[test]
    fn headers_follow_the_creation_rules() {
        let manager = manager();
        users(&manager, 2);
        for stream in [
            stream_named("", queue_mode()),
            stream_named("\0catalog", queue_mode()),
            stream_named("users\0idx\0city", queue_mode()),
            stream_named("typeless", Value::document([("@operator", "object")])),
        ] {
            assert!(matches!(
                manager.restore(&mut stream.as_slice()),
                Err(CoreError::CorruptData { .. })
            ));
        }
        assert_eq!(manager.names().unwrap(), vec!["users"]);
        assert_eq!(manager.get("users").unwrap().as_operator().len().unwrap(), 2);

        let queue_with_index = Value::document([
            ("@operator", Value::from("queue")),
            ("@index", Value::from(vec![Value::from("string"), Value::from(vec!["city"])])),
        ]);
        let stream = stream_named("jobs", queue_with_index);
        assert!(matches!(
            BackupManager::read_header(&mut stream.as_slice()),
            Err(CoreError::CorruptData { .. })
        ));
    }

    #[test]
    fn blocks_inflate_within_a_limit() {
        let payload = vec![7u8; 64 * 1024];
        let block = zstd::encode_all(payload.as_slice(), COMPRESSION_LEVEL).unwrap();
        assert!(block.len() < 1024);
        assert_eq!(decompress(&block, payload.len()).unwrap(), payload);
        let err = decompress(&block, payload.len() - 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_and_oversized_streams_are_corrupt() {
        let manager = manager();
        users(&manager, 3);
        let mut stream = Vec::new();
        manager.backup("users", &mut stream).unwrap();

        let cut = &stream[..stream.len() - 6];
        assert!(matches!(
            manager.restore(&mut &cut[..]),
            Err(CoreError::CorruptData { .. })
        ));
        assert!(matches!(
            manager.restore(&mut &[0u8, 0, 0, 0][..]),
            Err(CoreError::CorruptData { .. })
        ));
        assert!(matches!(
            manager.restore(&mut &[0xffu8, 0xff, 0xff, 0xff][..]),
            Err(CoreError::CorruptData { .. })
        ));
    }
}
