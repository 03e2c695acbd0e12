//! Network Server
//!
//! TCP acceptor that hands each connection to a bounded worker pool. A
//! connection carries exactly one request and one response.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use super::{read_message_timeout, write_message, KvMessage, WorkerPool};
use crate::error::Result;

/// Request handler served by a `NetworkServer`
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Produce the response for one inbound request
    async fn handle(&self, peer: SocketAddr, message: KvMessage) -> KvMessage;

    /// Response sent when the request could not be read
    fn on_read_error(&self, error: &crate::Error) -> KvMessage {
        KvMessage::resp(error.to_string())
    }
}

/// Network server for one listening endpoint
pub struct NetworkServer {
    /// Bound listener
    listener: TcpListener,
    /// Worker pool size
    workers: usize,
    /// Bounded hand-off queue size
    queue_capacity: usize,
    /// Read timeout for inbound requests
    read_timeout: Duration,
    /// Shutdown signal
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl NetworkServer {
    /// Bind a listener; port 0 asks the OS for a free port
    pub async fn bind(
        bind_address: &str,
        workers: usize,
        queue_capacity: usize,
        read_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).await?;
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        Ok(Self {
            listener,
            workers,
            queue_capacity,
            read_timeout,
            shutdown: shutdown_tx,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for stopping the accept loop from elsewhere
    pub fn shutdown_handle(&self) -> tokio::sync::watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Run the accept loop until stopped
    pub async fn run(self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let local = self.local_addr()?;
        let pool = WorkerPool::new(format!("server-{}", local), self.workers, self.queue_capacity);
        tracing::info!("Network server listening on {} ({} workers)", local, pool.size());

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer)) => {
                            let handler = Arc::clone(&handler);
                            let read_timeout = self.read_timeout;
                            let job = async move {
                                if let Err(e) = handle_connection(socket, peer, handler, read_timeout).await {
                                    tracing::warn!("Connection error from {}: {}", peer, e);
                                }
                            };
                            if let Err(e) = pool.submit(job).await {
                                tracing::error!("Dropping connection from {}: {}", peer, e);
                            }
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Network server on {} stopped", local);
        Ok(())
    }
}

/// Serve a single request/response exchange
async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn MessageHandler>,
    read_timeout: Duration,
) -> Result<()> {
    let (mut reader, mut writer) = socket.into_split();

    let response = match read_message_timeout(&mut reader, read_timeout).await {
        Ok(message) => {
            tracing::trace!("Received {} from {}", message.type_name(), peer);
            handler.handle(peer, message).await
        }
        Err(e) => {
            tracing::debug!("Unreadable request from {}: {}", peer, e);
            handler.on_read_error(&e)
        }
    };

    write_message(&mut writer, &response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkClient;

    struct Echo;

    #[async_trait::async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, _peer: SocketAddr, message: KvMessage) -> KvMessage {
            message
        }
    }

    #[tokio::test]
    async fn test_server_bind() {
        let server = NetworkServer::bind("127.0.0.1:0", 2, 8, Duration::from_secs(1))
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_server_round_trip() {
        let server = NetworkServer::bind("127.0.0.1:0", 2, 8, Duration::from_secs(1))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run(Arc::new(Echo)));

        let client = NetworkClient::new(Duration::from_secs(1));
        let request = KvMessage::GetReq { key: "ping".into() };
        let response = client.request(&addr, &request).await.unwrap();
        assert_eq!(response, request);

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}
