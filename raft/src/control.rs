//! Failure injection and the UI command surface.

use tracing::{debug, info};

use crate::cluster::Cluster;
use crate::error::SimError;
use crate::msg::{CtlMsg, NodeId};
use crate::node::Role;

impl Cluster {
    /// Crash a node. Its followers are not told; they notice through their
    /// own election timers. Returns false for unknown or already stopped ids.
    pub fn stop_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            debug!(node = id, "Stop for unknown node");
            return false;
        };
        if node.is_stopped() {
            debug!(node = id, "Node already stopped");
            return false;
        }
        node.role = Role::Stopped;
        info!(node = id, term = node.term, "Node stopped");
        if self.leader_id == Some(id) {
            self.leader_id = None;
        }
        true
    }

    /// Restart the lowest-id stopped node, if any.
    pub fn restart_node(&mut self) -> Option<NodeId> {
        let id = self.nodes.iter().position(|n| n.is_stopped());
        match id {
            Some(id) => {
                self.restart_node_by_id(id);
            }
            None => debug!("No stopped node to restart"),
        }
        id
    }

    /// Bring a stopped node back as a Follower. Log and term are kept as they
    /// were; nothing is replayed.
    pub fn restart_node_by_id(&mut self, id: NodeId) -> bool {
        if !self.nodes.get(id).is_some_and(|n| n.is_stopped()) {
            debug!(node = id, "Restart for node that is not stopped");
            return false;
        }
        let timeout = self.random_timeout();
        let node = &mut self.nodes[id];
        node.role = Role::Follower;
        node.voted_for = None;
        node.election_timer = 0.0;
        node.election_timeout = timeout;
        node.heartbeat_timer = 0.0;
        info!(node = id, term = node.term, log_len = node.log.len(), "Node restarted");
        true
    }

    pub fn apply_ctl(&mut self, msg: CtlMsg) -> Result<(), SimError> {
        use CtlMsg::*;
        match msg {
            Start => self.start(),
            Stop => self.stop(),
            Reset { node_count } => self.reset(node_count)?,
            SetSpeed { factor } => self.set_speed(factor)?,
            AddLogEntry { command } => {
                self.add_log_entry(command);
            }
            StopNode { id } => {
                self.stop_node(id);
            }
            RestartNode => {
                self.restart_node();
            }
            RestartNodeId { id } => {
                self.restart_node_by_id(id);
            }
        }
        Ok(())
    }
}
