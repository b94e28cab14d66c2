//! Discrete-time simulation of a simplified Raft cluster.
//!
//! A driver calls [`Cluster::update`] once per frame with the elapsed
//! wall-clock milliseconds. Nodes run election timers and heartbeats against
//! that clock, and messages crawl across a simulated network with a fixed
//! transit time. The log consistency check is deliberately partial: followers
//! verify only that they are not missing entries before a batch, never the
//! term at `prev_log_idx`, so logs that diverge after a restart are not
//! repaired. Do not treat it as a safe Raft.

pub mod cluster;
pub mod config;
mod control;
mod election;
pub mod error;
pub mod msg;
pub mod node;
mod replication;
pub mod transport;

pub use cluster::Cluster;
pub use config::SimConfig;
pub use error::SimError;
pub use msg::{
    ClusterSummary, CtlMsg, LogEntry, LogIndex, Message, MessageKind, Millis, NodeId,
    NodeSummary, RaftCmd, RaftMsg, RoleKind, Term,
};
pub use node::{RaftNode, Role};
pub use transport::MessageTransport;
