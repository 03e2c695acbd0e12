//! Replica
//!
//! A replica ("slave") holds one copy of the data: an authoritative store
//! fronted by its own cache, a commit log, and the 2PC participant that the
//! coordinator talks to.

mod handler;
mod node;

pub use handler::ReplicaHandler;
pub use node::ReplicaNode;
