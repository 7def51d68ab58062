//! Mutation log records for [`crate::OrderedEngine`].
//!
//! ## Framing
//!
//! ```text
//! | payload_len (u32 LE) | crc32 (u32 LE) | payload |
//! ```
//!
//! The payload starts with a one-byte tag. Tree names are written as
//! `u16 LE length + UTF-8`, keys and values as `u32 LE length + bytes`.
//! A batch record nests its operations so that replay applies it whole
//! or not at all.

use crate::backend::StorageBackend;
use crate::engine::BatchOp;
use crate::error::{StorageError, StorageResult};
use bytes::{Buf, BufMut};

/// Size of the framing header.
pub(crate) const FRAME_HEADER_SIZE: usize = 8;

const TAG_PUT: u8 = 1;
const TAG_REMOVE: u8 = 2;
const TAG_CREATE_TREE: u8 = 3;
const TAG_DROP_TREE: u8 = 4;
const TAG_RENAME_TREE: u8 = 5;
const TAG_CLEAR_TREE: u8 = 6;
const TAG_BATCH: u8 = 7;

/// A single logged engine mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogRecord {
    Op(BatchOp),
    CreateTree(String),
    DropTree(String),
    RenameTree { from: String, to: String },
    ClearTree(String),
    Batch(Vec<BatchOp>),
}

impl LogRecord {
    /// Encodes the record with its frame header.
    pub(crate) fn to_frame(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(64);
        match self {
            Self::Op(op) => put_op(&mut payload, op),
            Self::CreateTree(tree) => {
                payload.put_u8(TAG_CREATE_TREE);
                put_name(&mut payload, tree);
            }
            Self::DropTree(tree) => {
                payload.put_u8(TAG_DROP_TREE);
                put_name(&mut payload, tree);
            }
            Self::RenameTree { from, to } => {
                payload.put_u8(TAG_RENAME_TREE);
                put_name(&mut payload, from);
                put_name(&mut payload, to);
            }
            Self::ClearTree(tree) => {
                payload.put_u8(TAG_CLEAR_TREE);
                put_name(&mut payload, tree);
            }
            Self::Batch(ops) => {
                payload.put_u8(TAG_BATCH);
                payload.put_u32_le(ops.len() as u32);
                for op in ops {
                    put_op(&mut payload, op);
                }
            }
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.put_u32_le(payload.len() as u32);
        frame.put_u32_le(crc32fast::hash(&payload));
        frame.extend_from_slice(&payload);
        frame
    }

    /// Decodes a record payload (without the frame header).
    pub(crate) fn decode(mut payload: &[u8]) -> StorageResult<Self> {
        let tag = payload.first().copied().ok_or_else(truncated)?;
        if tag == TAG_PUT || tag == TAG_REMOVE {
            let op = take_op(&mut payload)?;
            if payload.has_remaining() {
                return Err(StorageError::CorruptLog(
                    "trailing bytes after log record".to_string(),
                ));
            }
            return Ok(Self::Op(op));
        }

        let record = match take_u8(&mut payload)? {
            TAG_CREATE_TREE => Self::CreateTree(take_name(&mut payload)?),
            TAG_DROP_TREE => Self::DropTree(take_name(&mut payload)?),
            TAG_RENAME_TREE => Self::RenameTree {
                from: take_name(&mut payload)?,
                to: take_name(&mut payload)?,
            },
            TAG_CLEAR_TREE => Self::ClearTree(take_name(&mut payload)?),
            TAG_BATCH => {
                let count = take_u32(&mut payload)? as usize;
                let mut ops = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    ops.push(take_op(&mut payload)?);
                }
                Self::Batch(ops)
            }
            tag => {
                return Err(StorageError::CorruptLog(format!("unknown log tag {tag}")));
            }
        };

        if payload.has_remaining() {
            return Err(StorageError::CorruptLog(
                "trailing bytes after log record".to_string(),
            ));
        }
        Ok(record)
    }
}

fn put_op(buf: &mut Vec<u8>, op: &BatchOp) {
    match op {
        BatchOp::Put { tree, key, value } => {
            buf.put_u8(TAG_PUT);
            put_name(buf, tree);
            put_blob(buf, key);
            put_blob(buf, value);
        }
        BatchOp::Remove { tree, key } => {
            buf.put_u8(TAG_REMOVE);
            put_name(buf, tree);
            put_blob(buf, key);
        }
    }
}

fn put_name(buf: &mut Vec<u8>, name: &str) {
    buf.put_u16_le(name.len() as u16);
    buf.extend_from_slice(name.as_bytes());
}

fn put_blob(buf: &mut Vec<u8>, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.extend_from_slice(data);
}

fn truncated() -> StorageError {
    StorageError::CorruptLog("truncated log record".to_string())
}

fn take_u8(buf: &mut &[u8]) -> StorageResult<u8> {
    if buf.remaining() < 1 {
        return Err(truncated());
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut &[u8]) -> StorageResult<u32> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_u32_le())
}

fn take_blob(buf: &mut &[u8]) -> StorageResult<Vec<u8>> {
    let len = take_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    let data = buf[..len].to_vec();
    buf.advance(len);
    Ok(data)
}

fn take_name(buf: &mut &[u8]) -> StorageResult<String> {
    if buf.remaining() < 2 {
        return Err(truncated());
    }
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    let name = std::str::from_utf8(&buf[..len])
        .map_err(|_| StorageError::CorruptLog("tree name is not UTF-8".to_string()))?
        .to_string();
    buf.advance(len);
    Ok(name)
}

fn take_op(buf: &mut &[u8]) -> StorageResult<BatchOp> {
    match take_u8(buf)? {
        TAG_PUT => Ok(BatchOp::Put {
            tree: take_name(buf)?,
            key: take_blob(buf)?,
            value: take_blob(buf)?,
        }),
        TAG_REMOVE => Ok(BatchOp::Remove {
            tree: take_name(buf)?,
            key: take_blob(buf)?,
        }),
        tag => Err(StorageError::CorruptLog(format!("unknown batch op tag {tag}"))),
    }
}

/// Outcome of scanning a log from the start.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    /// Records that decoded and passed their checksum, in log order.
    pub records: Vec<LogRecord>,
    /// Offset just past the last good record.
    pub valid_len: u64,
    /// Whether bytes after `valid_len` had to be discarded.
    pub torn_tail: bool,
}

/// Reads every intact record from `backend`.
///
/// Stops at the first short, checksum-failing or undecodable frame; that
/// frame and everything after it is reported as a torn tail.
pub(crate) fn read_log(backend: &dyn StorageBackend) -> StorageResult<Replay> {
    let size = backend.size()?;
    let mut replay = Replay::default();
    let mut offset = 0u64;

    while offset < size {
        if size - offset < FRAME_HEADER_SIZE as u64 {
            replay.torn_tail = true;
            break;
        }
        let header = backend.read_at(offset, FRAME_HEADER_SIZE)?;
        let mut header = header.as_slice();
        let len = take_u32(&mut header)?;
        let crc = take_u32(&mut header)?;

        let body_start = offset + FRAME_HEADER_SIZE as u64;
        if size - body_start < u64::from(len) {
            replay.torn_tail = true;
            break;
        }
        let payload = backend.read_at(body_start, len as usize)?;
        if crc32fast::hash(&payload) != crc {
            replay.torn_tail = true;
            break;
        }
        match LogRecord::decode(&payload) {
            Ok(record) => replay.records.push(record),
            Err(_) => {
                replay.torn_tail = true;
                break;
            }
        }
        offset = body_start + u64::from(len);
    }

    replay.valid_len = offset;
    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    fn put(tree: &str, key: &[u8], value: &[u8]) -> BatchOp {
        BatchOp::Put {
            tree: tree.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn log_records_survive_framing() {
        let records = vec![
            LogRecord::CreateTree("users".to_string()),
            LogRecord::Batch(vec![
                put("users", b"k1", b"v1"),
                BatchOp::Remove {
                    tree: "users".to_string(),
                    key: b"k0".to_vec(),
                },
            ]),
            LogRecord::RenameTree {
                from: "users".to_string(),
                to: "people".to_string(),
            },
        ];

        let mut backend = InMemoryBackend::new();
        for record in &records {
            backend.append(&record.to_frame()).unwrap();
        }

        let replay = read_log(&backend).unwrap();
        assert!(!replay.torn_tail);
        assert_eq!(replay.records, records);
        assert_eq!(replay.valid_len, backend.size().unwrap());
    }

    #[test]
    fn torn_tail_is_reported() {
        let mut backend = InMemoryBackend::new();
        let good = LogRecord::CreateTree("a".to_string()).to_frame();
        backend.append(&good).unwrap();
        let torn = LogRecord::Op(put("a", b"key", b"value")).to_frame();
        backend.append(&torn[..torn.len() - 3]).unwrap();

        let replay = read_log(&backend).unwrap();
        assert!(replay.torn_tail);
        assert_eq!(replay.records.len(), 1);
        assert_eq!(replay.valid_len, good.len() as u64);
    }

    #[test]
    fn checksum_mismatch_stops_replay() {
        let mut frame = LogRecord::ClearTree("t".to_string()).to_frame();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let backend = InMemoryBackend::with_data(frame);

        let replay = read_log(&backend).unwrap();
        assert!(replay.torn_tail);
        assert!(replay.records.is_empty());
        assert_eq!(replay.valid_len, 0);
    }
}
