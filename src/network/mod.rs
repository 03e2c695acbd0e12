//! Network Module
//!
//! Handles TCP communication between clients, the coordinator and replicas.
//! Every exchange is one framed message per direction; the sender half-closes
//! its write side after the frame.

mod client;
pub mod message;
mod pool;
mod server;

pub use client::{Connection, NetworkClient};
pub use message::{
    validate_key, validate_value, Decision, FrameHeader, KvMessage, OperationId, RespBody,
    MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
pub use pool::WorkerPool;
pub use server::{MessageHandler, NetworkServer};

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Read a framed message from a reader
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<KvMessage> {
    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader
        .read_exact(&mut header_bytes)
        .await
        .map_err(|_| Error::unparseable())?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > FrameHeader::MAX_BODY {
        return Err(Error::unparseable());
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| Error::unparseable())?;

    // Verify checksum
    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::unparseable());
    }

    let message = KvMessage::deserialize(&body).map_err(|_| Error::unparseable())?;
    message.validate()?;
    Ok(message)
}

/// Read a framed message, failing with `Timeout` if nothing arrives in time
pub async fn read_message_timeout<R: AsyncRead + Unpin>(
    reader: &mut R,
    limit: Duration,
) -> Result<KvMessage> {
    match tokio::time::timeout(limit, read_message(reader)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout("could not receive data".into())),
    }
}

/// Write a framed message to a writer and half-close the write side
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &KvMessage) -> Result<()> {
    let body = message.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    writer.shutdown().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let msg = KvMessage::PutReq {
            key: "alpha".into(),
            value: "beta".into(),
            op_id: Some(11),
        };

        write_message(&mut a, &msg).await.unwrap();
        let restored = read_message(&mut b).await.unwrap();
        assert_eq!(restored, msg);
    }

    #[tokio::test]
    async fn test_corrupted_frame_is_unparseable() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let body = KvMessage::Ack { op_id: 1 }.serialize().unwrap();
        let mut header = FrameHeader::new(&body);
        header.checksum ^= 0xdead_beef;

        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(&body).await.unwrap();
        a.shutdown().await.unwrap();

        let err = read_message(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m == "unparseable message"));
    }

    #[tokio::test]
    async fn test_empty_stream_is_unparseable() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.shutdown().await.unwrap();

        let err = read_message(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (_a, mut b) = tokio::io::duplex(64);
        let err = read_message_timeout(&mut b, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_malformed_message_rejected() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let msg = KvMessage::GetReq { key: String::new() };
        write_message(&mut a, &msg).await.unwrap();

        let err = read_message(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m == "message format incorrect"));
    }
}
