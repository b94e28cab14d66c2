//! Heartbeats, AppendEntries, and commit index advancement.

use tracing::{debug, info};

use crate::cluster::Cluster;
use crate::msg::{LogEntry, LogIndex, Millis, NodeId, RaftCmd, RaftMsg, Term};
use crate::node::Role;

impl Cluster {
    /// Leader tick: broadcast AppendEntries every heartbeat interval.
    pub(crate) fn tick_leader(&mut self, id: NodeId, delta: Millis) {
        let interval = self.config().heartbeat_interval_ms;
        let node = &mut self.nodes[id];
        node.heartbeat_timer += delta;
        if node.heartbeat_timer >= interval {
            node.heartbeat_timer = 0.0;
            self.send_append_entries(id);
        }
    }

    /// Send each running peer everything from its `next_idx` on. Peers that
    /// are caught up get an empty heartbeat.
    pub(crate) fn send_append_entries(&mut self, leader: NodeId) {
        let node = &self.nodes[leader];
        let Role::Leader { next_idxs, .. } = &node.role else {
            return;
        };
        let log_len = node.log.len();
        let mut outgoing = Vec::new();
        for (peer, peer_node) in self.nodes.iter().enumerate() {
            if peer == leader || peer_node.is_stopped() {
                continue;
            }
            let next_idx = next_idxs.get(&peer).copied().unwrap_or(log_len).min(log_len);
            let prev_log_idx = next_idx.checked_sub(1);
            let msg = RaftMsg::AppendEntries {
                entries: node.log[next_idx..].to_vec(),
                prev_log_idx,
                prev_log_term: prev_log_idx.map(|idx| node.log[idx].term),
                leader_commit: node.commit_idx,
            };
            outgoing.push((peer, msg));
        }
        for (peer, msg) in outgoing {
            self.send(leader, peer, msg);
        }
    }

    pub(crate) fn receive_append_entries(
        &mut self,
        id: NodeId,
        leader: NodeId,
        term: Term,
        entries: Vec<LogEntry>,
        prev_log_idx: Option<LogIndex>,
        leader_commit: Option<LogIndex>,
    ) {
        let node = &self.nodes[id];
        if term < node.term {
            debug!(node = id, leader, term, my_term = node.term, "Stale AppendEntries");
            let last_log_idx = node.last_log_idx();
            self.send(
                id,
                leader,
                RaftMsg::AppendResponse {
                    success: false,
                    last_log_idx,
                },
            );
            return;
        }
        if !matches!(node.role, Role::Follower) {
            self.step_down(id, term);
        }

        let node = &mut self.nodes[id];
        node.election_timer = 0.0;

        // Only the length of the log is checked against prev_log_idx; terms
        // are not compared, so divergent suffixes are never repaired.
        if prev_log_idx.is_some_and(|prev| prev >= node.log.len()) {
            debug!(
                node = id,
                leader,
                prev_log_idx = ?prev_log_idx,
                log_len = node.log.len(),
                "Missing entries before batch"
            );
            let last_log_idx = node.last_log_idx();
            self.send(
                id,
                leader,
                RaftMsg::AppendResponse {
                    success: false,
                    last_log_idx,
                },
            );
            return;
        }

        let appended = entries.len();
        for entry in entries {
            if entry.index == node.log.len() {
                node.log.push(LogEntry {
                    committed: false,
                    ..entry
                });
            }
        }
        if let (Some(leader_commit), Some(last)) = (leader_commit, node.last_log_idx()) {
            if node.advance_commit(leader_commit.min(last)) {
                debug!(node = id, commit_idx = ?node.commit_idx, "Follower commit advanced");
            }
        }
        if appended > 0 {
            debug!(node = id, leader, term, log_len = node.log.len(), "Appended entries");
        }
        let last_log_idx = node.last_log_idx();
        self.send(
            id,
            leader,
            RaftMsg::AppendResponse {
                success: true,
                last_log_idx,
            },
        );
    }

    pub(crate) fn receive_append_entries_reply(
        &mut self,
        id: NodeId,
        replier: NodeId,
        term: Term,
        success: bool,
        last_log_idx: Option<LogIndex>,
    ) {
        let node = &mut self.nodes[id];
        if term != node.term {
            return;
        }
        let leader_last = node.last_log_idx();
        let log_len = node.log.len();
        let Role::Leader {
            next_idxs,
            match_idxs,
        } = &mut node.role
        else {
            return;
        };

        if success {
            // The replier may hold a longer, divergent log.
            let acked = last_log_idx.zip(leader_last).map(|(a, b)| a.min(b));
            let matched = match_idxs.entry(replier).or_insert(None);
            if acked > *matched {
                *matched = acked;
            }
            let next_idx = matched.map_or(0, |m| m + 1);
            next_idxs.insert(replier, next_idx);
            self.update_commit_index(id);
        } else {
            // This follower wasn't ready for the entries we sent.
            // Back off and resend from an earlier entry next heartbeat.
            let next_idx = next_idxs.entry(replier).or_insert(log_len);
            *next_idx = next_idx.saturating_sub(1);
            debug!(node = id, replier, next_idx = *next_idx, "AppendEntries rejected");
        }
    }

    /// Commit the highest entry of the leader's own term that a quorum holds.
    pub(crate) fn update_commit_index(&mut self, leader: NodeId) {
        let quorum = self.quorum();
        let node = &self.nodes[leader];
        let Role::Leader { match_idxs, .. } = &node.role else {
            return;
        };
        let start = node.commit_idx.map_or(0, |c| c + 1);
        let mut new_commit = None;
        for idx in (start..node.log.len()).rev() {
            if node.log[idx].term != node.term {
                continue;
            }
            let replicas = 1 + match_idxs
                .iter()
                .filter(|(peer, matched)| {
                    !self.nodes[**peer].is_stopped() && matched.is_some_and(|m| m >= idx)
                })
                .count();
            if replicas >= quorum {
                new_commit = Some(idx);
                break;
            }
        }

        if let Some(idx) = new_commit {
            let node = &mut self.nodes[leader];
            if node.advance_commit(idx) {
                info!(node = leader, term = node.term, commit_idx = idx, "Leader commit advanced");
            }
        }
    }

    /// Client command. Appended on the current leader and pushed out right
    /// away. Returns the new entry's index, or None without a leader.
    pub fn add_log_entry(&mut self, command: impl Into<RaftCmd>) -> Option<LogIndex> {
        let command = command.into();
        let Some(leader) = self.leader_id.filter(|id| self.nodes[*id].is_leader()) else {
            debug!(command = %command, "No leader for client command");
            return None;
        };
        let node = &mut self.nodes[leader];
        let index = node.log.len();
        node.log.push(LogEntry {
            term: node.term,
            index,
            command,
            committed: false,
        });
        info!(node = leader, term = node.term, index, "Client command appended");
        self.send_append_entries(leader);
        // Only matters for a single-node cluster.
        self.update_commit_index(leader);
        Some(index)
    }
}
