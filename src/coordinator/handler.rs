//! Client-facing request handler for the coordinator

use std::net::SocketAddr;
use std::sync::Arc;

use super::CommitCoordinator;
use crate::error::{Error, Result};
use crate::network::{KvMessage, MessageHandler};

/// Serves client requests on the coordinator's client port
pub struct CoordinatorHandler {
    coordinator: Arc<CommitCoordinator>,
}

impl CoordinatorHandler {
    pub fn new(coordinator: Arc<CommitCoordinator>) -> Self {
        Self { coordinator }
    }

    async fn dispatch(&self, message: KvMessage) -> Result<KvMessage> {
        match message {
            KvMessage::GetReq { key } => {
                let value = self.coordinator.handle_get(&key).await?;
                Ok(KvMessage::resp_entry(key, value))
            }
            KvMessage::PutReq { key, value, .. } => {
                self.coordinator.put(&key, &value).await?;
                Ok(KvMessage::resp("Success"))
            }
            KvMessage::DelReq { key, .. } => {
                self.coordinator.del(&key).await?;
                Ok(KvMessage::resp("Success"))
            }
            KvMessage::IgnoreNext => {
                self.coordinator.handle_ignore_next().await?;
                Ok(KvMessage::resp("Success"))
            }
            _ => Err(Error::malformed()),
        }
    }
}

#[async_trait::async_trait]
impl MessageHandler for CoordinatorHandler {
    async fn handle(&self, peer: SocketAddr, message: KvMessage) -> KvMessage {
        let kind = message.type_name();
        match self.dispatch(message).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!("Client {} {} failed: {}", peer, kind, e);
                KvMessage::resp(e.to_string())
            }
        }
    }
}
