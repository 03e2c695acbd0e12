//! Coordinator Client
//!
//! Issues get/put/del/ignoreNext requests against a coordinator's client
//! port. Failures come back as the coordinator's error text.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::network::{validate_key, validate_value, KvMessage, NetworkClient, RespBody};

/// Client for one coordinator
#[derive(Debug, Clone)]
pub struct KvClient {
    address: String,
    network: NetworkClient,
}

impl KvClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            network: NetworkClient::new(timeout),
        }
    }

    /// Coordinator address
    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn get(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let request = KvMessage::GetReq { key: key.to_string() };
        match self.network.request(&self.address, &request).await? {
            KvMessage::Resp(RespBody::Entry { value, .. }) => Ok(value),
            reply => Err(failure(reply)),
        }
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;
        self.expect_success(KvMessage::PutReq {
            key: key.to_string(),
            value: value.to_string(),
            op_id: None,
        })
        .await
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.expect_success(KvMessage::DelReq {
            key: key.to_string(),
            op_id: None,
        })
        .await
    }

    /// Ask every replica to drop its next phase-1 request
    pub async fn ignore_next(&self) -> Result<()> {
        self.expect_success(KvMessage::IgnoreNext).await
    }

    async fn expect_success(&self, request: KvMessage) -> Result<()> {
        match self.network.request(&self.address, &request).await? {
            KvMessage::Resp(RespBody::Message(text)) if text == "Success" => Ok(()),
            reply => Err(failure(reply)),
        }
    }
}

fn failure(reply: KvMessage) -> Error {
    match reply {
        KvMessage::Resp(RespBody::Message(text)) => Error::Remote(text),
        other => Error::Protocol(format!("unexpected {} reply", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::tests::{coordinator, ids_for, spawn_replica};
    use crate::coordinator::CoordinatorHandler;
    use crate::network::NetworkServer;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_end_to_end() {
        let key = "e2e";
        let (a, b) = ids_for(key);
        let primary = spawn_replica(a).await;
        let successor = spawn_replica(b).await;
        let coordinator = Arc::new(coordinator(&[primary.info.clone(), successor.info.clone()]).await);

        let server = NetworkServer::bind("127.0.0.1:0", 4, 16, Duration::from_secs(2))
            .await
            .unwrap();
        let address = server.local_addr().unwrap().to_string();
        let shutdown = server.shutdown_handle();
        tokio::spawn(server.run(Arc::new(CoordinatorHandler::new(coordinator))));

        let client = KvClient::new(address, Duration::from_secs(2));
        client.put(key, "hello").await.unwrap();
        assert_eq!(client.get(key).await.unwrap(), "hello");
        assert_eq!(successor.handler.node().get(key).await.unwrap(), "hello");

        client.del(key).await.unwrap();
        let err = client.get(key).await.unwrap_err();
        assert!(err.to_string().contains("Not found"), "{}", err);

        client.ignore_next().await.unwrap();
        assert!(client.put(key, "dropped").await.is_err());

        shutdown.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_local_validation() {
        let client = KvClient::new("127.0.0.1:1", Duration::from_millis(100));
        assert!(matches!(client.get("").await, Err(Error::InvalidArgument(_))));
        assert!(matches!(
            client.put("k", &"v".repeat(262_145)).await,
            Err(Error::Oversized(_))
        ));
    }
}
