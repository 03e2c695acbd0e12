//! Commit Coordinator
//!
//! The coordinator ("master") owns a cache, the replica ring and the 2PC
//! state machine. A write to a key goes to the key's primary and its
//! successor. Both must vote `ready` for the coordinator to decide COMMIT.
//! The decision is then pushed to both until each acknowledges it.
//!
//! Every operation holds the key's cache-set lock from start to finish, so
//! operations on one key are totally ordered while different keys run
//! concurrently.

mod handler;
mod retry;

pub use handler::CoordinatorHandler;
pub use retry::RetryPolicy;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::KvCache;
use crate::error::{Error, Result};
use crate::network::{
    validate_key, validate_value, Decision, KvMessage, NetworkClient, OperationId, RespBody,
};
use crate::registry::{ReplicaInfo, ReplicaRegistry};

/// Which end of a replica pair a decision is bound for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Primary,
    Successor,
}

/// Write carried through two-phase commit
#[derive(Debug, Clone, Copy)]
enum Operation<'a> {
    Put { value: &'a str },
    Del,
}

impl Operation<'_> {
    fn to_message(self, key: &str, op_id: OperationId) -> KvMessage {
        match self {
            Operation::Put { value } => KvMessage::PutReq {
                key: key.to_string(),
                value: value.to_string(),
                op_id: Some(op_id),
            },
            Operation::Del => KvMessage::DelReq {
                key: key.to_string(),
                op_id: Some(op_id),
            },
        }
    }
}

/// 2PC coordinator
pub struct CommitCoordinator {
    registry: Arc<ReplicaRegistry>,
    cache: KvCache,
    client: NetworkClient,
    retry: RetryPolicy,
    next_op_id: AtomicU64,
    /// Send `ignoreNext` instead of the next phase-1 request
    ignore_next: AtomicBool,
}

impl CommitCoordinator {
    pub fn new(registry: Arc<ReplicaRegistry>, cache: KvCache, client: NetworkClient, retry: RetryPolicy) -> Self {
        Self {
            registry,
            cache,
            client,
            retry,
            next_op_id: AtomicU64::new(0),
            ignore_next: AtomicBool::new(false),
        }
    }

    /// Start with the ignore-next switch armed
    pub fn with_ignore_next(self, armed: bool) -> Self {
        self.ignore_next.store(armed, Ordering::SeqCst);
        self
    }

    /// Substitute `ignoreNext` for the next phase-1 request
    pub fn arm_ignore_next(&self) {
        self.ignore_next.store(true, Ordering::SeqCst);
    }

    pub fn registry(&self) -> &Arc<ReplicaRegistry> {
        &self.registry
    }

    /// Cached value for a key, without touching its reference bit
    pub async fn cached(&self, key: &str) -> Option<String> {
        let set = self.cache.lock(key).await;
        let found = set.slots().find(|slot| slot.key == key).map(|slot| slot.value.clone());
        found
    }

    /// Store a value on both replicas of `key`
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;
        self.perform_two_phase(key, Operation::Put { value }).await
    }

    /// Delete `key` from both replicas
    pub async fn del(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.perform_two_phase(key, Operation::Del).await
    }

    async fn perform_two_phase(&self, key: &str, operation: Operation<'_>) -> Result<()> {
        let mut set = self.cache.lock(key).await;

        let op_id = self.next_op_id.fetch_add(1, Ordering::SeqCst);
        let (primary, successor) = self.registry.replica_pair(key).await?;

        let request = if self.ignore_next.swap(false, Ordering::SeqCst) {
            tracing::warn!("Sending ignoreNext in place of phase 1 for op {}", op_id);
            KvMessage::IgnoreNext
        } else {
            operation.to_message(key, op_id)
        };

        let (first, second) = tokio::join!(
            self.solicit(&primary, &request),
            self.solicit(&successor, &request)
        );

        match (first, second) {
            (Ok(first), Ok(second)) => {
                let decision = if is_ready(&first, op_id) && is_ready(&second, op_id) {
                    Decision::Commit
                } else {
                    Decision::Abort
                };
                tracing::info!(
                    "Op {} on {:?}: {} (primary {}, successor {})",
                    op_id,
                    key,
                    decision,
                    primary.id,
                    successor.id
                );

                self.deliver_decision(key, decision, op_id, &primary, Role::Primary)
                    .await?;
                self.deliver_decision(key, decision, op_id, &successor, Role::Successor)
                    .await?;

                match (decision, operation) {
                    (Decision::Commit, Operation::Put { value }) => {
                        set.put(key, value);
                        Ok(())
                    }
                    (Decision::Commit, Operation::Del) => {
                        set.del(key);
                        Ok(())
                    }
                    (Decision::Abort, _) => Err(Error::CommitAborted(format!(
                        "{}: {}. {}: {}.",
                        primary.id,
                        vote_reason(&first),
                        successor.id,
                        vote_reason(&second)
                    ))),
                }
            }
            (Ok(_), Err(e)) => {
                self.abort_partial(key, op_id, &primary, Role::Primary, &successor, e)
                    .await
            }
            (Err(e), Ok(_)) => {
                self.abort_partial(key, op_id, &successor, Role::Successor, &primary, e)
                    .await
            }
            (Err(e1), Err(e2)) => {
                tracing::warn!("Op {} on {:?}: neither replica reachable", op_id, key);
                Err(Error::ReplicaErrors(format!(
                    "{}:= {}\n{}:= {}",
                    primary.id, e1, successor.id, e2
                )))
            }
        }
    }

    /// One replica answered phase 1 and the other could not be reached
    async fn abort_partial(
        &self,
        key: &str,
        op_id: OperationId,
        reachable: &ReplicaInfo,
        role: Role,
        unreachable: &ReplicaInfo,
        error: Error,
    ) -> Result<()> {
        tracing::warn!(
            "Op {} on {:?}: ABORT, replica {} unreachable: {}",
            op_id,
            key,
            unreachable.id,
            error
        );
        self.deliver_decision(key, Decision::Abort, op_id, reachable, role)
            .await?;
        Err(Error::CommitAborted(format!(
            "{}: connection failed. {}: connection succeeded.",
            unreachable.id, reachable.id
        )))
    }

    /// Phase 1 against one replica.
    ///
    /// `Err` only when the replica could not be reached or did not answer in
    /// time; any reply, or an unreadable one, counts as a vote.
    async fn solicit(&self, replica: &ReplicaInfo, request: &KvMessage) -> Result<Result<KvMessage>> {
        let exchange = async {
            let mut connection = self.client.connect(&replica.address()).await?;
            connection.send(request).await?;
            connection.receive().await
        };

        match exchange.await {
            Err(e) if e.is_retryable() => Err(e),
            vote => Ok(vote),
        }
    }

    /// Phase 2: push the decision until the replica acknowledges it.
    ///
    /// Retries re-resolve the target from the registry, so a replica that
    /// re-registered at a new address, or a changed ring, is picked up.
    async fn deliver_decision(
        &self,
        key: &str,
        decision: Decision,
        op_id: OperationId,
        replica: &ReplicaInfo,
        role: Role,
    ) -> Result<()> {
        let message = decision.to_message(op_id);
        let mut target = replica.clone();
        let mut attempts = 0u32;

        loop {
            match self.client.request(&target.address(), &message).await {
                Ok(KvMessage::Ack { op_id: acked }) if acked == op_id => {
                    tracing::debug!("Replica {} acked {} for op {}", target.id, decision, op_id);
                    return Ok(());
                }
                Ok(other) => {
                    return Err(Error::Protocol(format!(
                        "replica {} answered {} for op {} with {}",
                        target.id,
                        decision,
                        op_id,
                        describe(&other)
                    )));
                }
                Err(e) if e.is_retryable() => {
                    attempts = attempts.saturating_add(1);
                    if self.retry.exhausted(attempts) {
                        tracing::error!(
                            "Giving up delivering {} for op {} to {} after {} attempts",
                            decision,
                            op_id,
                            target.id,
                            attempts
                        );
                        return Err(e);
                    }

                    let delay = self.retry.backoff(attempts);
                    tracing::warn!(
                        "Delivering {} for op {} to {} failed (attempt {}), retrying in {:?}: {}",
                        decision,
                        op_id,
                        target.id,
                        attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;

                    if let Ok(current) = self.resolve(key, role).await {
                        target = current;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn resolve(&self, key: &str, role: Role) -> Result<ReplicaInfo> {
        let primary = self.registry.find_primary(key).await?;
        match role {
            Role::Primary => Ok(primary),
            Role::Successor => self.registry.find_successor(&primary).await,
        }
    }

    /// Read a key from the cache, else from the primary, else from the successor
    pub async fn handle_get(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let mut set = self.cache.lock(key).await;
        if let Some(value) = set.get(key) {
            return Ok(value);
        }

        let (primary, successor) = self.registry.replica_pair(key).await?;
        let first = match self.fetch(&primary, key).await {
            Ok(value) => {
                set.put(key, &value);
                return Ok(value);
            }
            Err(e) => e,
        };

        tracing::debug!("Get {:?} from primary {} failed: {}", key, primary.id, first);
        match self.fetch(&successor, key).await {
            Ok(value) => {
                set.put(key, &value);
                Ok(value)
            }
            Err(second) => Err(Error::ReplicaErrors(format!(
                "{}:= {}\n{}:= {}",
                primary.id, first, successor.id, second
            ))),
        }
    }

    async fn fetch(&self, replica: &ReplicaInfo, key: &str) -> Result<String> {
        let request = KvMessage::GetReq { key: key.to_string() };
        match self.client.request(&replica.address(), &request).await? {
            KvMessage::Resp(RespBody::Entry { value, .. }) => Ok(value),
            KvMessage::Resp(RespBody::Message(m)) if m == "key not found" => {
                Err(Error::NotFound(format!("key \"{}\" does not exist", key)))
            }
            other => Err(Error::Protocol(describe(&other))),
        }
    }

    /// Forward `ignoreNext` to every registered replica
    pub async fn handle_ignore_next(&self) -> Result<()> {
        let replicas = self.registry.replicas().await;
        if replicas.is_empty() {
            return Err(Error::NoReplicas);
        }

        let replies = futures::future::join_all(replicas.iter().map(|replica| async move {
            let reply = self.client.request(&replica.address(), &KvMessage::IgnoreNext).await;
            (replica.id, reply)
        }))
        .await;

        let failures: Vec<String> = replies
            .into_iter()
            .filter_map(|(id, reply)| match reply {
                Ok(KvMessage::Resp(RespBody::Message(m))) if m == "Success" => None,
                Ok(other) => Some(format!("{}:= {}", id, describe(&other))),
                Err(e) => Some(format!("{}:= {}", id, e)),
            })
            .collect();

        if failures.is_empty() {
            tracing::info!("ignoreNext armed on {} replicas", replicas.len());
            Ok(())
        } else {
            Err(Error::ReplicaErrors(failures.join("\n")))
        }
    }
}

fn is_ready(vote: &Result<KvMessage>, op_id: OperationId) -> bool {
    matches!(vote, Ok(KvMessage::Ready { op_id: voted }) if *voted == op_id)
}

fn vote_reason(vote: &Result<KvMessage>) -> String {
    match vote {
        Ok(message) => describe(message),
        Err(e) => e.to_string(),
    }
}

/// Human-readable summary of a reply
fn describe(message: &KvMessage) -> String {
    match message {
        KvMessage::Ready { .. } => "ready".to_string(),
        KvMessage::Abort {
            message: Some(text), ..
        } => text.clone(),
        KvMessage::Resp(RespBody::Message(text)) => text.clone(),
        other => format!("unexpected {}", other.type_name()),
    }
}
