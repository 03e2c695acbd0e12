//! Commit Log
//!
//! Append-only, flush-on-write log of the 2PC messages a replica has voted
//! on or resolved. A phase-1 request is appended before the replica replies
//! `ready`; the matching decision is appended once phase 2 arrives. At
//! startup the log is replayed to rebuild the store and to find the
//! operation, if any, that was interrupted between the two phases.

mod record;

pub use record::LogRecord;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::network::{Decision, KvMessage, OperationId};
use crate::replica::ReplicaNode;
use record::{check_file_header, decode_at, file_header, is_partial_header, record_end, FILE_HEADER_SIZE};

/// Durability options for a commit log
#[derive(Debug, Clone, Copy)]
pub struct CommitLogOptions {
    /// Sync file data after every append
    pub fsync: bool,
    /// Compress records with lz4
    pub compression: bool,
}

impl Default for CommitLogOptions {
    fn default() -> Self {
        Self {
            fsync: true,
            compression: false,
        }
    }
}

/// Durable per-replica log of 2PC records
pub struct CommitLog {
    path: PathBuf,
    file: File,
    records: Vec<LogRecord>,
    options: CommitLogOptions,
}

impl CommitLog {
    /// Open (or create) the log at `path` and load its records
    pub fn open(path: impl AsRef<Path>, options: CommitLogOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut log = Self {
            path,
            file,
            records: Vec::new(),
            options,
        };
        log.load_from_disk()?;
        Ok(log)
    }

    /// Re-read every record from disk, replacing the in-memory history.
    ///
    /// A last record that is cut short or fails its checksum is a torn
    /// tail and is truncated away. A bad record with valid data after it
    /// fails the load with [`Error::LogCorrupted`] and leaves the file alone.
    pub fn load_from_disk(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut buf)?;

        if is_partial_header(&buf) {
            if !buf.is_empty() {
                tracing::warn!(
                    "Commit log {} has a partial header, starting empty",
                    self.path.display()
                );
            }
            self.file.set_len(0)?;
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write_all(&file_header())?;
            self.file.sync_all()?;
            self.records.clear();
            return Ok(());
        }
        check_file_header(&buf)?;

        let mut records = Vec::new();
        let mut offset = FILE_HEADER_SIZE;
        while offset < buf.len() {
            match decode_at(&buf, offset) {
                Ok(Some((record, next))) => {
                    records.push(record);
                    offset = next;
                }
                Ok(None) => {
                    tracing::warn!(
                        "Commit log {} has a torn record at offset {}",
                        self.path.display(),
                        offset
                    );
                    break;
                }
                Err(e) if record_end(&buf, offset) == Some(buf.len()) => {
                    tracing::warn!("Commit log {}: last record unreadable: {}", self.path.display(), e);
                    break;
                }
                Err(e) => {
                    tracing::error!("Commit log {}: {}", self.path.display(), e);
                    return Err(match e {
                        Error::LogCorrupted { .. } => e,
                        other => Error::LogCorrupted {
                            offset: offset as u64,
                            reason: other.to_string(),
                        },
                    });
                }
            }
        }

        if offset < buf.len() {
            tracing::warn!(
                "Truncating commit log {} from {} to {} bytes",
                self.path.display(),
                buf.len(),
                offset
            );
            self.file.set_len(offset as u64)?;
            self.file.sync_all()?;
        }
        self.file.seek(SeekFrom::End(0))?;

        tracing::debug!(
            "Loaded {} records from commit log {}",
            records.len(),
            self.path.display()
        );
        self.records = records;
        Ok(())
    }

    /// Append a message and flush it to disk before returning.
    ///
    /// On failure the file is cut back to its length before the append.
    pub fn append_and_flush(&mut self, message: KvMessage) -> Result<u64> {
        let seq = self.records.last().map_or(1, |r| r.seq + 1);
        let record = LogRecord::new(seq, message);
        let bytes = record.encode(self.options.compression)?;

        let start = self.file.stream_position()?;
        if let Err(e) = self.write_durably(&bytes) {
            if let Err(rollback) = self
                .file
                .set_len(start)
                .and_then(|_| self.file.seek(SeekFrom::Start(start)).map(|_| ()))
            {
                tracing::error!(
                    "Commit log {}: could not roll back failed append: {}",
                    self.path.display(),
                    rollback
                );
            }
            return Err(Error::CommitLog(format!("append failed: {}", e)));
        }

        tracing::trace!("Logged {} as record {}", record.message.type_name(), seq);
        self.records.push(record);
        Ok(seq)
    }

    fn write_durably(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes)?;
        self.file.flush()?;
        if self.options.fsync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Every record in append order
    pub fn entries(&self) -> &[LogRecord] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the last record is a phase-1 request still waiting for its decision
    pub fn has_interrupted_operation(&self) -> bool {
        self.interrupted_operation().is_some()
    }

    /// The phase-1 request at the end of the log, if it has no decision yet
    pub fn interrupted_operation(&self) -> Option<&KvMessage> {
        self.records
            .last()
            .map(|r| &r.message)
            .filter(|m| m.is_phase1_request())
    }

    /// The unresolved phase-1 request logged for `op_id`, if any
    pub fn pending_operation(&self, op_id: OperationId) -> Option<&KvMessage> {
        for record in self.records.iter().rev() {
            if record.message.op_id() != Some(op_id) {
                continue;
            }
            if record.message.is_phase1_request() {
                return Some(&record.message);
            }
            if record.message.decision().is_some() {
                return None;
            }
        }
        None
    }

    /// Replay every committed operation into `node`, in log order.
    ///
    /// Deleting a key that is already absent is not an error. Operations
    /// without a decision stay in the log for the handler to resolve.
    /// Returns the number of operations applied.
    pub async fn rebuild(&self, node: &ReplicaNode) -> Result<usize> {
        let mut pending: HashMap<OperationId, &KvMessage> = HashMap::new();
        let mut applied = 0;

        for record in &self.records {
            let message = &record.message;
            let Some(op_id) = message.op_id() else {
                continue;
            };

            if message.is_phase1_request() {
                pending.insert(op_id, message);
                continue;
            }

            match message.decision() {
                Some(Decision::Commit) => {
                    if let Some(op) = pending.remove(&op_id) {
                        apply(node, op).await?;
                        applied += 1;
                    }
                }
                Some(Decision::Abort) => {
                    pending.remove(&op_id);
                }
                None => {}
            }
        }

        tracing::info!(
            "Replayed {} committed operations from {} ({} unresolved)",
            applied,
            self.path.display(),
            pending.len()
        );
        Ok(applied)
    }
}

/// Apply a committed phase-1 request to a replica node
pub async fn apply(node: &ReplicaNode, operation: &KvMessage) -> Result<()> {
    match operation {
        KvMessage::PutReq { key, value, .. } => node.put(key, value).await,
        KvMessage::DelReq { key, .. } => match node.del(key).await {
            Err(Error::NotFound(_)) => Ok(()),
            other => other,
        },
        other => Err(Error::Internal(format!(
            "cannot apply {} to the store",
            other.type_name()
        ))),
    }
}
