//! Wire Messages
//!
//! The typed request/response envelope exchanged between clients, the
//! coordinator and replicas. One message travels in each direction per
//! connection.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Maximum key length in bytes
pub const MAX_KEY_SIZE: usize = 256;

/// Maximum value length in bytes
pub const MAX_VALUE_SIZE: usize = 256 * 1024;

/// Identifier of one two-phase commit operation
pub type OperationId = u64;

/// Body of a `resp` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RespBody {
    /// Free-form status or error text
    Message(String),
    /// A key/value pair returned by a get
    Entry { key: String, value: String },
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvMessage {
    /// Read a key
    GetReq { key: String },

    /// Store a value; the op id is assigned by the coordinator before phase 1
    PutReq {
        key: String,
        value: String,
        op_id: Option<OperationId>,
    },

    /// Delete a key; the op id is assigned by the coordinator before phase 1
    DelReq {
        key: String,
        op_id: Option<OperationId>,
    },

    /// Phase-1 vote to commit
    Ready { op_id: OperationId },

    /// Phase-1 vote to abort, or a phase-2 abort decision
    Abort {
        op_id: Option<OperationId>,
        message: Option<String>,
    },

    /// Phase-2 commit decision
    Commit { op_id: OperationId },

    /// Phase-2 acknowledgement
    Ack { op_id: OperationId },

    /// Replica registration, payload is `id@host:port`
    Register { payload: String },

    /// Response to a client or to a registration
    Resp(RespBody),

    /// Debug request: the next phase-1 request is dropped
    IgnoreNext,
}

/// Phase-2 decision for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Commit,
    Abort,
}

impl Decision {
    /// Build the decision message for an operation
    pub fn to_message(self, op_id: OperationId) -> KvMessage {
        match self {
            Decision::Commit => KvMessage::Commit { op_id },
            Decision::Abort => KvMessage::Abort {
                op_id: Some(op_id),
                message: None,
            },
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Commit => write!(f, "COMMIT"),
            Decision::Abort => write!(f, "ABORT"),
        }
    }
}

impl KvMessage {
    /// Build a `resp` carrying a text message
    pub fn resp(message: impl Into<String>) -> Self {
        KvMessage::Resp(RespBody::Message(message.into()))
    }

    /// Build a `resp` carrying a key/value pair
    pub fn resp_entry(key: impl Into<String>, value: impl Into<String>) -> Self {
        KvMessage::Resp(RespBody::Entry {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Serialize message to bytes
    pub fn serialize(&self) -> std::result::Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> std::result::Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Wire name of the message kind (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            KvMessage::GetReq { .. } => "getreq",
            KvMessage::PutReq { .. } => "putreq",
            KvMessage::DelReq { .. } => "delreq",
            KvMessage::Ready { .. } => "ready",
            KvMessage::Abort { .. } => "abort",
            KvMessage::Commit { .. } => "commit",
            KvMessage::Ack { .. } => "ack",
            KvMessage::Register { .. } => "register",
            KvMessage::Resp(_) => "resp",
            KvMessage::IgnoreNext => "ignoreNext",
        }
    }

    /// Key carried by the message, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            KvMessage::GetReq { key }
            | KvMessage::PutReq { key, .. }
            | KvMessage::DelReq { key, .. } => Some(key),
            KvMessage::Resp(RespBody::Entry { key, .. }) => Some(key),
            _ => None,
        }
    }

    /// Operation id carried by the message, if any
    pub fn op_id(&self) -> Option<OperationId> {
        match self {
            KvMessage::PutReq { op_id, .. }
            | KvMessage::DelReq { op_id, .. }
            | KvMessage::Abort { op_id, .. } => *op_id,
            KvMessage::Ready { op_id }
            | KvMessage::Commit { op_id }
            | KvMessage::Ack { op_id } => Some(*op_id),
            _ => None,
        }
    }

    /// Whether this is a phase-1 request (putreq/delreq)
    pub fn is_phase1_request(&self) -> bool {
        matches!(self, KvMessage::PutReq { .. } | KvMessage::DelReq { .. })
    }

    /// Phase-2 decision carried by the message, if it is one
    pub fn decision(&self) -> Option<Decision> {
        match self {
            KvMessage::Commit { .. } => Some(Decision::Commit),
            KvMessage::Abort { .. } => Some(Decision::Abort),
            _ => None,
        }
    }

    /// Check the per-kind field rules
    pub fn validate(&self) -> Result<()> {
        match self {
            KvMessage::GetReq { key }
            | KvMessage::PutReq { key, .. }
            | KvMessage::DelReq { key, .. } if key.is_empty() => Err(Error::malformed()),
            KvMessage::Register { payload } if !payload.contains('@') || !payload.contains(':') => {
                Err(Error::malformed())
            }
            _ => Ok(()),
        }
    }
}

/// Validate a key against the protocol limits
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("empty key".into()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(Error::Oversized("Oversized key".into()));
    }
    Ok(())
}

/// Validate a value against the protocol limits
pub fn validate_value(value: &str) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(Error::Oversized("Oversized value".into()));
    }
    Ok(())
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Largest accepted frame body
    pub const MAX_BODY: u32 = 1024 * 1024;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}
