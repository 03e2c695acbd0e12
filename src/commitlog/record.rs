//! Commit Log Records
//!
//! On-disk layout: a 12-byte file header (`TPCKVLOG` + version), then one
//! record per append:
//!
//! ```text
//! [length: u32][compressed: u8][data: length bytes][checksum: u32]
//! ```
//!
//! `data` is the bincode encoding of a [`LogRecord`], optionally lz4
//! compressed; the checksum covers `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::KvMessage;

/// Magic bytes at the start of every commit log file
pub const LOG_MAGIC: &[u8; 8] = b"TPCKVLOG";

/// Commit log format version
pub const LOG_VERSION: u32 = 1;

/// File header size in bytes
pub const FILE_HEADER_SIZE: usize = 12;

/// Per-record framing overhead: length, flag and checksum
const RECORD_OVERHEAD: usize = 4 + 1 + 4;

/// One durable commit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the log, starting at 1
    pub seq: u64,
    /// Wall-clock time of the append
    pub timestamp: DateTime<Utc>,
    /// Phase-1 request or phase-2 decision, as received
    pub message: KvMessage,
}

impl LogRecord {
    pub fn new(seq: u64, message: KvMessage) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Encode with framing, ready to append
    pub fn encode(&self, compression: bool) -> Result<Vec<u8>> {
        let serialized = bincode::serialize(self)?;
        let data = if compression {
            lz4_flex::compress_prepend_size(&serialized)
        } else {
            serialized
        };

        let mut out = Vec::with_capacity(RECORD_OVERHEAD + data.len());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.push(compression as u8);
        out.extend_from_slice(&data);
        out.extend_from_slice(&crc32fast::hash(&data).to_le_bytes());
        Ok(out)
    }
}

/// Build the file header
pub fn file_header() -> [u8; FILE_HEADER_SIZE] {
    let mut bytes = [0u8; FILE_HEADER_SIZE];
    bytes[0..8].copy_from_slice(LOG_MAGIC);
    bytes[8..12].copy_from_slice(&LOG_VERSION.to_le_bytes());
    bytes
}

/// Check the file header
pub fn check_file_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < FILE_HEADER_SIZE {
        return Err(Error::CommitLog("Commit log header too short".into()));
    }
    if &bytes[0..8] != LOG_MAGIC {
        return Err(Error::CommitLog("Invalid commit log magic bytes".into()));
    }

    let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if version != LOG_VERSION {
        return Err(Error::CommitLog(format!(
            "Unsupported commit log version: {}",
            version
        )));
    }
    Ok(())
}

/// Whether `bytes` is a prefix of the file header, as left by a crash
/// while the header was being written
pub fn is_partial_header(bytes: &[u8]) -> bool {
    bytes.len() < FILE_HEADER_SIZE && file_header().starts_with(bytes)
}

/// Offset just past the record framed at `offset`, if its length field fits in `buf`
pub fn record_end(buf: &[u8], offset: usize) -> Option<usize> {
    let rest = buf.get(offset..)?;
    if rest.len() < 4 {
        return None;
    }
    let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    Some(offset + RECORD_OVERHEAD + len)
}

/// Decode the record starting at `offset` in `buf`.
///
/// Returns the record and the offset just past it, or `None` when the
/// remaining bytes are too short to hold a whole record (a torn tail).
pub fn decode_at(buf: &[u8], offset: usize) -> Result<Option<(LogRecord, usize)>> {
    let rest = &buf[offset..];
    if rest.len() < RECORD_OVERHEAD {
        return Ok(None);
    }

    let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    let compressed = rest[4] != 0;
    if rest.len() < RECORD_OVERHEAD + len {
        return Ok(None);
    }

    let data = &rest[5..5 + len];
    let tail = &rest[5 + len..9 + len];
    let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    if stored != crc32fast::hash(data) {
        return Err(Error::LogCorrupted {
            offset: offset as u64,
            reason: "Checksum mismatch".into(),
        });
    }

    let record: LogRecord = if compressed {
        let raw = lz4_flex::decompress_size_prepended(data).map_err(|e| Error::LogCorrupted {
            offset: offset as u64,
            reason: format!("Decompression failed: {}", e),
        })?;
        bincode::deserialize(&raw)?
    } else {
        bincode::deserialize(data)?
    };

    Ok(Some((record, offset + RECORD_OVERHEAD + len)))
}
