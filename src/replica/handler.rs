//! Replica 2PC Participant
//!
//! Serves the coordinator's phase-1 requests, phase-2 decisions and reads.
//! Each connection carries one request, so the only state carried between
//! the two phases is the commit log.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::ReplicaNode;
use crate::commitlog::{self, CommitLog};
use crate::error::{Error, Result};
use crate::network::{
    validate_key, validate_value, Decision, KvMessage, MessageHandler, NetworkClient, OperationId, RespBody,
};
use crate::registry::{ReplicaId, ReplicaInfo};

/// 2PC participant for one replica
pub struct ReplicaHandler {
    id: ReplicaId,
    node: Arc<ReplicaNode>,
    log: Arc<Mutex<CommitLog>>,
    /// Drop the next phase-1 request (fault injection)
    ignore_next: AtomicBool,
}

impl ReplicaHandler {
    /// Create the handler and replay the commit log into the node
    pub async fn new(id: ReplicaId, node: Arc<ReplicaNode>, log: Arc<Mutex<CommitLog>>) -> Result<Self> {
        {
            let log = log.lock().await;
            log.rebuild(&node).await?;
            if let Some(op) = log.interrupted_operation() {
                tracing::warn!(
                    "Replica {} restarted with unresolved {} for key {:?} (op {:?})",
                    id,
                    op.type_name(),
                    op.key().unwrap_or_default(),
                    op.op_id()
                );
            }
        }

        Ok(Self {
            id,
            node,
            log,
            ignore_next: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn node(&self) -> &Arc<ReplicaNode> {
        &self.node
    }

    pub fn log(&self) -> &Arc<Mutex<CommitLog>> {
        &self.log
    }

    /// Drop the next phase-1 request without voting
    pub fn arm_ignore_next(&self) {
        self.ignore_next.store(true, Ordering::SeqCst);
    }

    /// Announce this replica to the coordinator's registration port.
    ///
    /// Returns the coordinator's confirmation text.
    pub async fn register_with_coordinator(
        &self,
        client: &NetworkClient,
        registration_address: &str,
        advertise_host: &str,
        port: u16,
    ) -> Result<String> {
        let info = ReplicaInfo::new(self.id, advertise_host, port);
        let request = KvMessage::Register {
            payload: info.to_payload(),
        };

        match client.request(registration_address, &request).await? {
            KvMessage::Resp(RespBody::Message(text)) if text.starts_with("Successfully registered") => {
                tracing::info!("Replica {} registered with {}", info, registration_address);
                Ok(text)
            }
            KvMessage::Resp(RespBody::Message(text)) => Err(Error::Protocol(text)),
            other => Err(Error::Protocol(format!(
                "unexpected {} reply to registration",
                other.type_name()
            ))),
        }
    }

    /// Phase 1: log the request and vote
    async fn prepare(&self, message: KvMessage) -> Result<KvMessage> {
        if self.ignore_next.swap(false, Ordering::SeqCst) {
            tracing::warn!("Replica {} ignoring {} as requested", self.id, message.type_name());
            return Ok(KvMessage::resp(format!(
                "IgnoreNext Error: SlaveServer {} has ignored this 2PC request during the first phase",
                self.id
            )));
        }

        let op_id = message.op_id().ok_or_else(Error::malformed)?;
        let mut log = self.log.lock().await;

        match &message {
            KvMessage::PutReq { key, value, .. } => {
                validate_key(key)?;
                validate_value(value)?;
            }
            KvMessage::DelReq { key, .. } => {
                if !self.node.has_key(key).await? {
                    tracing::debug!("Replica {} voting abort on op {}: key not found", self.id, op_id);
                    return Ok(abort(Some(op_id), "key not found"));
                }
            }
            _ => return Err(Error::malformed()),
        }

        log.append_and_flush(message)?;
        tracing::debug!("Replica {} ready for op {}", self.id, op_id);
        Ok(KvMessage::Ready { op_id })
    }

    /// Phase 2: record the decision and apply it on commit
    async fn resolve(&self, decision: Decision, op_id: OperationId) -> Result<KvMessage> {
        let mut log = self.log.lock().await;

        let Some(operation) = log.pending_operation(op_id).cloned() else {
            tracing::debug!("Replica {} acking already resolved op {}", self.id, op_id);
            return Ok(KvMessage::Ack { op_id });
        };

        log.append_and_flush(decision.to_message(op_id))?;
        if decision == Decision::Commit {
            commitlog::apply(&self.node, &operation).await?;
        }

        tracing::info!(
            "Replica {} applied {} for op {} ({} {:?})",
            self.id,
            decision,
            op_id,
            operation.type_name(),
            operation.key().unwrap_or_default()
        );
        Ok(KvMessage::Ack { op_id })
    }

    async fn get(&self, key: &str) -> Result<KvMessage> {
        if !self.node.has_key(key).await? {
            return Ok(KvMessage::resp("key not found"));
        }
        let value = self.node.get(key).await?;
        Ok(KvMessage::resp_entry(key, value))
    }
}

fn abort(op_id: Option<OperationId>, message: impl Into<String>) -> KvMessage {
    KvMessage::Abort {
        op_id,
        message: Some(message.into()),
    }
}

#[async_trait::async_trait]
impl MessageHandler for ReplicaHandler {
    async fn handle(&self, peer: SocketAddr, message: KvMessage) -> KvMessage {
        let op_id = message.op_id();
        tracing::trace!("Replica {} got {} from {}", self.id, message.type_name(), peer);

        let result = match message {
            KvMessage::GetReq { key } => self.get(&key).await,
            KvMessage::IgnoreNext => {
                self.arm_ignore_next();
                Ok(KvMessage::resp("Success"))
            }
            KvMessage::Commit { op_id } => self.resolve(Decision::Commit, op_id).await,
            KvMessage::Abort { op_id: Some(op_id), .. } => self.resolve(Decision::Abort, op_id).await,
            message if message.is_phase1_request() => self.prepare(message).await,
            _ => Err(Error::malformed()),
        };

        result.unwrap_or_else(|e| {
            tracing::warn!("Replica {} failed request from {}: {}", self.id, peer, e);
            abort(op_id, e.to_string())
        })
    }

    fn on_read_error(&self, error: &Error) -> KvMessage {
        abort(None, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::CommitLogOptions;
    use std::path::Path;
    use tempfile::tempdir;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    async fn handler_at(path: &Path) -> ReplicaHandler {
        let log = CommitLog::open(path, CommitLogOptions::default()).unwrap();
        let node = Arc::new(ReplicaNode::new(10, 4));
        ReplicaHandler::new(ReplicaId(7), node, Arc::new(Mutex::new(log)))
            .await
            .unwrap()
    }

    fn put(key: &str, value: &str, op_id: OperationId) -> KvMessage {
        KvMessage::PutReq {
            key: key.into(),
            value: value.into(),
            op_id: Some(op_id),
        }
    }

    #[tokio::test]
    async fn test_put_commit() {
        let dir = tempdir().unwrap();
        let handler = handler_at(&dir.path().join("r.tpclog")).await;

        let vote = handler.handle(peer(), put("k", "v", 1)).await;
        assert_eq!(vote, KvMessage::Ready { op_id: 1 });
        // Not applied until the decision arrives
        assert!(!handler.node().has_key("k").await.unwrap());

        let ack = handler.handle(peer(), KvMessage::Commit { op_id: 1 }).await;
        assert_eq!(ack, KvMessage::Ack { op_id: 1 });
        assert_eq!(handler.node().get("k").await.unwrap(), "v");
        assert_eq!(handler.log().lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_put_abort_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let handler = handler_at(&dir.path().join("r.tpclog")).await;

        handler.handle(peer(), put("k", "v", 1)).await;
        let ack = handler.handle(peer(), Decision::Abort.to_message(1)).await;
        assert_eq!(ack, KvMessage::Ack { op_id: 1 });
        assert!(!handler.node().has_key("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_del_of_missing_key_votes_abort_without_logging() {
        let dir = tempdir().unwrap();
        let handler = handler_at(&dir.path().join("r.tpclog")).await;

        let vote = handler
            .handle(peer(), KvMessage::DelReq { key: "nope".into(), op_id: Some(3) })
            .await;
        assert_eq!(vote, abort(Some(3), "key not found"));
        assert!(handler.log().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_value_votes_abort() {
        let dir = tempdir().unwrap();
        let handler = handler_at(&dir.path().join("r.tpclog")).await;

        let vote = handler.handle(peer(), put("k", &"v".repeat(262_145), 4)).await;
        assert_eq!(vote, abort(Some(4), "Oversized value"));
        assert!(handler.log().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_op_id_is_rejected() {
        let dir = tempdir().unwrap();
        let handler = handler_at(&dir.path().join("r.tpclog")).await;

        let reply = handler
            .handle(peer(), KvMessage::PutReq { key: "k".into(), value: "v".into(), op_id: None })
            .await;
        assert!(matches!(reply, KvMessage::Abort { op_id: None, .. }));
    }

    #[tokio::test]
    async fn test_duplicate_decision_is_acked_once() {
        let dir = tempdir().unwrap();
        let handler = handler_at(&dir.path().join("r.tpclog")).await;

        handler.handle(peer(), put("k", "v", 1)).await;
        handler.handle(peer(), KvMessage::Commit { op_id: 1 }).await;
        let again = handler.handle(peer(), KvMessage::Commit { op_id: 1 }).await;
        assert_eq!(again, KvMessage::Ack { op_id: 1 });
        assert_eq!(handler.log().lock().await.len(), 2);

        // Decision for an op this replica never saw
        let unknown = handler.handle(peer(), KvMessage::Commit { op_id: 99 }).await;
        assert_eq!(unknown, KvMessage::Ack { op_id: 99 });
    }

    #[tokio::test]
    async fn test_ignore_next_drops_one_request() {
        let dir = tempdir().unwrap();
        let handler = handler_at(&dir.path().join("r.tpclog")).await;

        assert_eq!(handler.handle(peer(), KvMessage::IgnoreNext).await, KvMessage::resp("Success"));

        let dropped = handler.handle(peer(), put("k", "v", 1)).await;
        match dropped {
            KvMessage::Resp(RespBody::Message(text)) => {
                assert!(text.starts_with("IgnoreNext Error: SlaveServer 7"))
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(handler.log().lock().await.is_empty());

        // Consumed once
        assert_eq!(handler.handle(peer(), put("k", "v", 2)).await, KvMessage::Ready { op_id: 2 });
    }

    #[tokio::test]
    async fn test_get_replies_entry_or_not_found() {
        let dir = tempdir().unwrap();
        let handler = handler_at(&dir.path().join("r.tpclog")).await;
        handler.node().put("k", "v").await.unwrap();

        let hit = handler.handle(peer(), KvMessage::GetReq { key: "k".into() }).await;
        assert_eq!(hit, KvMessage::resp_entry("k", "v"));
        let miss = handler.handle(peer(), KvMessage::GetReq { key: "x".into() }).await;
        assert_eq!(miss, KvMessage::resp("key not found"));
    }

    #[tokio::test]
    async fn test_recovery_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.tpclog");

        {
            let handler = handler_at(&path).await;
            handler.handle(peer(), put("a", "1", 1)).await;
            handler.handle(peer(), KvMessage::Commit { op_id: 1 }).await;
            // Crash after voting on op 2
            assert_eq!(handler.handle(peer(), put("b", "2", 2)).await, KvMessage::Ready { op_id: 2 });
        }

        let handler = handler_at(&path).await;
        {
            let log = handler.log().lock().await;
            assert!(log.has_interrupted_operation());
            assert_eq!(log.interrupted_operation(), Some(&put("b", "2", 2)));
        }
        assert_eq!(handler.node().get("a").await.unwrap(), "1");
        assert!(!handler.node().has_key("b").await.unwrap());

        let ack = handler.handle(peer(), KvMessage::Commit { op_id: 2 }).await;
        assert_eq!(ack, KvMessage::Ack { op_id: 2 });
        assert_eq!(handler.node().get("b").await.unwrap(), "2");

        {
            let log = handler.log().lock().await;
            assert!(!log.has_interrupted_operation());
            assert_eq!(log.entries().last().unwrap().message, KvMessage::Commit { op_id: 2 });
        }

        // Redelivery does not apply or log twice
        handler.handle(peer(), KvMessage::Commit { op_id: 2 }).await;
        assert_eq!(handler.log().lock().await.len(), 4);

        // A further restart replays both commits exactly once
        drop(handler);
        let handler = handler_at(&path).await;
        assert_eq!(handler.node().get("b").await.unwrap(), "2");
        assert!(!handler.log().lock().await.has_interrupted_operation());
    }
}
