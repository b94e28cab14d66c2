use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace, warn};

use crate::config::{validate_node_count, validate_speed, SimConfig};
use crate::error::SimError;
use crate::msg::{ClusterSummary, Message, Millis, NodeId, RaftMsg, Term};
use crate::node::{RaftNode, Role};
use crate::transport::MessageTransport;

/// The whole simulation: nodes, network, clock and counters.
///
/// Driven by calling [`update`](Cluster::update) once per frame. All state
/// changes for a frame complete before `update` returns; commands such as
/// [`stop_node`](Cluster::stop_node) apply synchronously between frames.
#[derive(Debug)]
pub struct Cluster {
    config: SimConfig,
    seed: u64,
    rng: ChaCha8Rng,
    pub(crate) nodes: Vec<RaftNode>,
    pub(crate) transport: MessageTransport,
    pub(crate) leader_id: Option<NodeId>,
    pub(crate) total_elections: u64,
    simulated_time: Millis,
    running: bool,
    speed: f64,
}

impl Cluster {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let nodes = build_nodes(config.node_count, &mut rng, &config);
        info!(node_count = config.node_count, seed, "Cluster constructed");
        Ok(Self {
            transport: MessageTransport::new(config.transit_ms),
            speed: config.speed,
            config,
            seed,
            rng,
            nodes,
            leader_id: None,
            total_elections: 0,
            simulated_time: 0.0,
            running: false,
        })
    }

    pub fn with_node_count(node_count: usize) -> Result<Self, SimError> {
        Self::new(SimConfig::default().with_node_count(node_count))
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Throw away all state and rebuild with `node_count` nodes, or with the
    /// current count. Speed and the random stream carry over.
    pub fn reset(&mut self, node_count: Option<usize>) -> Result<(), SimError> {
        let node_count = node_count.unwrap_or(self.nodes.len());
        validate_node_count(node_count)?;
        self.config.node_count = node_count;
        self.nodes = build_nodes(node_count, &mut self.rng, &self.config);
        self.transport = MessageTransport::new(self.config.transit_ms);
        self.leader_id = None;
        self.total_elections = 0;
        self.simulated_time = 0.0;
        self.running = false;
        info!(node_count, "Cluster reset");
        Ok(())
    }

    pub fn set_speed(&mut self, factor: f64) -> Result<(), SimError> {
        validate_speed(factor)?;
        self.speed = factor;
        debug!(speed = factor, "Speed changed");
        Ok(())
    }

    /// Advance the simulation by one frame of `delta` wall-clock ms.
    pub fn update(&mut self, delta: Millis) {
        if !self.running {
            return;
        }
        if !delta.is_finite() || delta < 0.0 {
            warn!(delta, "Ignoring invalid frame delta");
            return;
        }
        let delta = delta * self.speed;
        self.simulated_time += delta;

        for msg in self.transport.advance(delta) {
            self.deliver(msg);
        }

        for id in 0..self.nodes.len() {
            match self.nodes[id].role {
                Role::Stopped => {}
                Role::Leader { .. } => self.tick_leader(id, delta),
                Role::Follower | Role::Candidate { .. } => self.tick_election_timer(id, delta),
            }
        }
    }

    fn deliver(&mut self, msg: Message) {
        let Message {
            from,
            to,
            term,
            body,
            ..
        } = msg;
        let (Some(sender), Some(recipient)) = (self.nodes.get(from), self.nodes.get(to)) else {
            warn!(from, to, "Dropping message for unknown node");
            return;
        };
        if sender.is_stopped() || recipient.is_stopped() {
            trace!(from, to, "Dropping message to or from stopped node");
            return;
        }
        // Any newer term seen on the wire demotes the recipient first.
        if term > recipient.term {
            self.step_down(to, term);
        }

        use RaftMsg::*;
        match body {
            RequestVote => self.receive_vote_request(to, from, term),
            VoteResponse { vote_granted } => self.receive_vote(to, from, term, vote_granted),
            AppendEntries {
                entries,
                prev_log_idx,
                leader_commit,
                ..
            } => self.receive_append_entries(to, from, term, entries, prev_log_idx, leader_commit),
            AppendResponse {
                success,
                last_log_idx,
            } => self.receive_append_entries_reply(to, from, term, success, last_log_idx),
        }
    }

    pub(crate) fn send(&mut self, from: NodeId, to: NodeId, body: RaftMsg) {
        let term = self.nodes[from].term;
        self.transport.send(Message::new(from, to, term, body));
    }

    /// Votes or replicas needed to act, out of the configured cluster size.
    pub fn quorum(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    pub fn active_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_stopped()).count()
    }

    pub(crate) fn random_timeout(&mut self) -> Millis {
        random_timeout(&mut self.rng, &self.config)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Seed actually used for timeout draws, for replaying a run.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn nodes(&self) -> &[RaftNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&RaftNode> {
        self.nodes.get(id)
    }

    pub fn messages(&self) -> &[Message] {
        self.transport.in_flight()
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id
    }

    /// Highest term observed on any node.
    pub fn current_term(&self) -> Term {
        self.nodes.iter().map(|n| n.term).max().unwrap_or_default()
    }

    pub fn total_elections(&self) -> u64 {
        self.total_elections
    }

    pub fn total_messages(&self) -> u64 {
        self.transport.total_sent()
    }

    pub fn simulated_time(&self) -> Millis {
        self.simulated_time
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn summary(&self) -> ClusterSummary {
        ClusterSummary {
            nodes: self.nodes.iter().map(RaftNode::summary).collect(),
            messages: self.transport.in_flight().to_vec(),
            current_term: self.current_term(),
            leader_id: self.leader_id,
            total_elections: self.total_elections,
            total_messages: self.transport.total_sent(),
            simulated_time: self.simulated_time,
            running: self.running,
            speed: self.speed,
        }
    }
}

fn build_nodes(node_count: usize, rng: &mut ChaCha8Rng, config: &SimConfig) -> Vec<RaftNode> {
    (0..node_count)
        .map(|id| RaftNode::new(id, random_timeout(rng, config)))
        .collect()
}

fn random_timeout(rng: &mut ChaCha8Rng, config: &SimConfig) -> Millis {
    rng.gen_range(config.election_timeout_min_ms..config.election_timeout_max_ms)
}
