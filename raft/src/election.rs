//! Election timers, term changes, vote granting and leader promotion.

use tracing::{debug, info};

use crate::cluster::Cluster;
use crate::msg::{Millis, NodeId, RaftMsg, Term};
use crate::node::Role;

impl Cluster {
    /// Follower and Candidate tick. Fires an election once the timer passes
    /// the node's randomized timeout.
    pub(crate) fn tick_election_timer(&mut self, id: NodeId, delta: Millis) {
        let node = &mut self.nodes[id];
        node.election_timer += delta;
        if node.election_timer >= node.election_timeout {
            debug!(
                node = id,
                term = node.term,
                role = ?node.role_kind(),
                "Election timeout"
            );
            self.start_election(id);
        }
    }

    pub(crate) fn start_election(&mut self, id: NodeId) {
        let timeout = self.random_timeout();
        let node = &mut self.nodes[id];
        node.term += 1;
        node.voted_for = Some(id);
        node.role = Role::candidate(id);
        node.election_timer = 0.0;
        node.election_timeout = timeout;
        let term = node.term;
        self.total_elections += 1;
        info!(node = id, term, "Starting election");

        for peer in 0..self.nodes.len() {
            if peer == id || self.nodes[peer].is_stopped() {
                continue;
            }
            self.send(id, peer, RaftMsg::RequestVote);
        }
        // A lone node already holds a quorum with its own vote.
        self.promote_if_quorum(id);
    }

    pub(crate) fn receive_vote_request(&mut self, id: NodeId, candidate: NodeId, term: Term) {
        let node = &mut self.nodes[id];
        let grant = term >= node.term && node.voted_for.map_or(true, |v| v == candidate);
        if grant {
            node.voted_for = Some(candidate);
            node.election_timer = 0.0;
        }
        debug!(
            node = id,
            candidate,
            term,
            my_term = node.term,
            grant,
            "Vote request"
        );
        self.send(id, candidate, RaftMsg::VoteResponse { vote_granted: grant });
    }

    pub(crate) fn receive_vote(&mut self, id: NodeId, voter: NodeId, term: Term, granted: bool) {
        let node = &mut self.nodes[id];
        if term != node.term {
            return;
        }
        let Role::Candidate { votes } = &mut node.role else {
            return;
        };
        if granted {
            votes.insert(voter);
            debug!(node = id, voter, term, votes = votes.len(), "Vote received");
            self.promote_if_quorum(id);
        }
    }

    fn promote_if_quorum(&mut self, id: NodeId) {
        let quorum = self.quorum();
        // A voter stopped since granting no longer counts.
        let won = match &self.nodes[id].role {
            Role::Candidate { votes } => {
                votes.iter().filter(|v| !self.nodes[**v].is_stopped()).count() >= quorum
            }
            _ => false,
        };
        if won {
            self.become_leader(id);
        }
    }

    pub(crate) fn become_leader(&mut self, id: NodeId) {
        let node_count = self.nodes.len();
        let node = &mut self.nodes[id];
        node.role = Role::leader(id, node_count, node.log.len());
        node.heartbeat_timer = 0.0;
        info!(node = id, term = node.term, "Became leader");
        self.leader_id = Some(id);
        self.send_append_entries(id);
    }

    /// Return `id` to Follower at `new_term`. The vote is only forgotten when
    /// the term actually moves forward.
    pub(crate) fn step_down(&mut self, id: NodeId, new_term: Term) {
        let timeout = self.random_timeout();
        let node = &mut self.nodes[id];
        if new_term > node.term {
            node.term = new_term;
            node.voted_for = None;
        }
        if !matches!(node.role, Role::Follower) {
            info!(node = id, term = node.term, from = ?node.role_kind(), "Stepping down");
        }
        node.role = Role::Follower;
        node.election_timer = 0.0;
        node.election_timeout = timeout;
        if self.leader_id == Some(id) {
            self.leader_id = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::msg::RoleKind;
    use crate::{Cluster, SimConfig};

    fn cluster(node_count: usize) -> Cluster {
        Cluster::new(SimConfig::default().with_node_count(node_count).with_seed(11)).unwrap()
    }

    #[test]
    fn start_election_bumps_term_and_votes_for_self() {
        let mut c = cluster(3);
        c.start_election(1);
        let node = c.node(1).unwrap();
        assert_eq!(node.term(), 1);
        assert_eq!(node.voted_for(), Some(1));
        assert_eq!(node.role_kind(), RoleKind::Candidate);
        assert_eq!(node.election_timer(), 0.0);
        assert_eq!(c.total_elections(), 1);
        assert_eq!(c.messages().len(), 2);
        assert!(c.messages().iter().all(|m| m.from == 1 && m.term == 1));
    }

    #[test]
    fn single_node_elects_itself() {
        let mut c = cluster(1);
        c.start_election(0);
        assert_eq!(c.leader_id(), Some(0));
        assert!(c.node(0).unwrap().is_leader());
        assert!(c.messages().is_empty());
    }

    #[test]
    fn votes_from_stopped_peers_do_not_count() {
        let mut c = cluster(5);
        c.start_election(0);
        c.receive_vote(0, 1, 1, true);
        c.stop_node(1);
        c.receive_vote(0, 2, 1, true);
        assert_eq!(c.node(0).unwrap().role_kind(), RoleKind::Candidate);
        assert_eq!(c.leader_id(), None);

        c.receive_vote(0, 3, 1, true);
        assert_eq!(c.leader_id(), Some(0));
    }

    #[test]
    fn grants_one_vote_per_term() {
        let mut c = cluster(3);
        c.step_down(0, 4);
        c.receive_vote_request(0, 1, 4);
        c.receive_vote_request(0, 2, 4);
        assert_eq!(c.node(0).unwrap().voted_for(), Some(1));
        let grants: Vec<_> = c
            .messages()
            .iter()
            .map(|m| (m.to, m.body.clone()))
            .collect();
        assert_eq!(
            grants,
            vec![
                (1, crate::RaftMsg::VoteResponse { vote_granted: true }),
                (2, crate::RaftMsg::VoteResponse { vote_granted: false }),
            ]
        );
    }

    #[test]
    fn same_term_step_down_keeps_vote() {
        let mut c = cluster(3);
        c.start_election(2);
        c.step_down(2, 1);
        let node = c.node(2).unwrap();
        assert_eq!(node.role_kind(), RoleKind::Follower);
        assert_eq!(node.voted_for(), Some(2));

        c.step_down(2, 2);
        assert_eq!(c.node(2).unwrap().voted_for(), None);
    }

    #[test]
    fn stale_vote_is_ignored() {
        let mut c = cluster(3);
        c.start_election(0);
        c.start_election(0);
        c.receive_vote(0, 1, 1, true);
        assert_eq!(c.node(0).unwrap().role_kind(), RoleKind::Candidate);
        c.receive_vote(0, 1, 2, true);
        assert!(c.node(0).unwrap().is_leader());
    }
}
