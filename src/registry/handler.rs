//! Registration Handler
//!
//! Served on the coordinator's registration port. Every request gets a
//! `resp` back, whether or not the registration succeeded.

use std::net::SocketAddr;
use std::sync::Arc;

use super::{ReplicaInfo, ReplicaRegistry};
use crate::error::Error;
use crate::network::{KvMessage, MessageHandler};

/// Accepts `register` messages into a registry
pub struct RegistrationHandler {
    registry: Arc<ReplicaRegistry>,
}

impl RegistrationHandler {
    pub fn new(registry: Arc<ReplicaRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl MessageHandler for RegistrationHandler {
    async fn handle(&self, peer: SocketAddr, message: KvMessage) -> KvMessage {
        let payload = match message {
            KvMessage::Register { payload } => payload,
            other => {
                tracing::warn!("Unexpected {} on registration port from {}", other.type_name(), peer);
                return KvMessage::resp(Error::malformed().to_string());
            }
        };

        let info = match ReplicaInfo::parse(&payload) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Bad registration {:?} from {}: {}", payload, peer, e);
                return KvMessage::resp(e.to_string());
            }
        };

        match self.registry.register(info).await {
            Ok(()) => KvMessage::resp(format!("Successfully registered {}", payload)),
            Err(e) => {
                tracing::warn!("Registration of {} failed: {}", payload, e);
                KvMessage::resp(format!("Registration of {} failed: {}", payload, e))
            }
        }
    }
}
