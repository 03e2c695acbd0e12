//! Replica identity and address

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::hash::hash64;

/// Position of a replica on the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(pub u64);

impl ReplicaId {
    /// Id derived from an operator-chosen name
    pub fn from_name(name: &str) -> Self {
        ReplicaId(hash64(name))
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepts unsigned ids and negative ids, which keep their bit pattern
impl FromStr for ReplicaId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(id) = s.parse::<u64>() {
            return Ok(ReplicaId(id));
        }
        s.parse::<i64>()
            .map(|id| ReplicaId(id as u64))
            .map_err(|_| Error::InvalidArgument(format!("invalid replica id: {}", s)))
    }
}

/// A registered replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub id: ReplicaId,
    pub host: String,
    pub port: u16,
}

impl ReplicaInfo {
    pub fn new(id: ReplicaId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    /// Parse a registration payload of the form `id@host:port`
    pub fn parse(payload: &str) -> Result<Self> {
        let (id, address) = payload.split_once('@').ok_or_else(Error::malformed)?;
        let (host, port) = address.rsplit_once(':').ok_or_else(Error::malformed)?;
        if host.is_empty() {
            return Err(Error::malformed());
        }

        let id = id.parse::<ReplicaId>().map_err(|_| Error::malformed())?;
        let port = port.parse::<u16>().map_err(|_| Error::malformed())?;
        Ok(Self::new(id, host, port))
    }

    /// `host:port` for connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Registration payload for this replica
    pub fn to_payload(&self) -> String {
        format!("{}@{}:{}", self.id, self.host, self.port)
    }
}

impl fmt::Display for ReplicaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        let info = ReplicaInfo::parse("42@localhost:9001").unwrap();
        assert_eq!(info, ReplicaInfo::new(ReplicaId(42), "localhost", 9001));
        assert_eq!(info.address(), "localhost:9001");
        assert_eq!(info.to_payload(), "42@localhost:9001");
    }

    #[test]
    fn test_parse_signed_id() {
        let info = ReplicaInfo::parse("-2@10.0.0.1:7000").unwrap();
        assert_eq!(info.id, ReplicaId(u64::MAX - 1));
    }

    #[test]
    fn test_parse_malformed() {
        for payload in ["42localhost:9001", "42@localhost", "x@host:1", "1@host:port", "1@:80"] {
            let err = ReplicaInfo::parse(payload).unwrap_err();
            assert!(
                matches!(err, Error::Protocol(ref m) if m == "message format incorrect"),
                "payload {}",
                payload
            );
        }
    }

    #[test]
    fn test_id_from_name_is_stable() {
        assert_eq!(ReplicaId::from_name("replica-1"), ReplicaId::from_name("replica-1"));
        assert_ne!(ReplicaId::from_name("replica-1"), ReplicaId::from_name("replica-2"));
    }
}
