//! Network Client
//!
//! Opens one connection per exchange, bounded by a fixed timeout for
//! connecting and for waiting on the reply.

use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{read_message_timeout, write_message, KvMessage};
use crate::error::{Error, Result};

/// Network client for reaching replicas and the coordinator
#[derive(Debug, Clone)]
pub struct NetworkClient {
    /// Bound on connect and on each read
    timeout: Duration,
}

/// An open connection to a peer, good for one request and one reply
pub struct Connection {
    address: String,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connect to an address
    pub async fn connect(&self, address: &str) -> Result<Connection> {
        let result = timeout(self.timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                let (reader, writer) = stream.into_split();
                Ok(Connection {
                    address: address.to_string(),
                    reader,
                    writer,
                    timeout: self.timeout,
                })
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::Timeout(format!("connecting to {}", address))),
        }
    }

    /// Send a message to a peer and wait for its reply
    pub async fn request(&self, address: &str, message: &KvMessage) -> Result<KvMessage> {
        let mut connection = self.connect(address).await?;
        connection.send(message).await?;
        connection.receive().await
    }
}

impl Connection {
    /// Peer address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send the request and half-close the write side
    pub async fn send(&mut self, message: &KvMessage) -> Result<()> {
        match timeout(self.timeout, write_message(&mut self.writer, message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Error::Io(e))) => Err(Error::ConnectionFailed {
                address: self.address.clone(),
                reason: e.to_string(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout(format!("sending to {}", self.address))),
        }
    }

    /// Wait for the reply
    pub async fn receive(&mut self) -> Result<KvMessage> {
        read_message_timeout(&mut self.reader, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_failure() {
        // Reserve a port, then free it so nothing listens there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = NetworkClient::new(Duration::from_millis(500));
        let result = client.request(&address, &KvMessage::IgnoreNext).await;
        let err = result.unwrap_err();
        assert!(err.is_retryable(), "unexpected error {}", err);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let client = NetworkClient::new(Duration::from_millis(200));
        let err = client
            .request(&address, &KvMessage::GetReq { key: "k".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
