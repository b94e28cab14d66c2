use std::collections::BTreeMap;

pub type Term = u64;
pub type NodeId = usize;
pub type LogIndex = usize;
pub type RaftCmd = String;

/// Simulated milliseconds.
pub type Millis = f64;

pub const HEARTBEAT_INTERVAL_MS: Millis = 500.0;
pub const ELECTION_TIMEOUT_MS_LOW: Millis = 1500.0;
pub const ELECTION_TIMEOUT_MS_HIGH: Millis = 3000.0;
/// Nominal time for a message to cross the simulated network.
pub const TRANSIT_MS: Millis = 1000.0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: RaftCmd,
    pub committed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    RequestVote,
    VoteResponse,
    AppendEntries,
    AppendResponse,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RaftMsg {
    RequestVote,
    VoteResponse {
        vote_granted: bool,
    },
    AppendEntries {
        entries: Vec<LogEntry>,
        prev_log_idx: Option<LogIndex>,
        prev_log_term: Option<Term>,
        leader_commit: Option<LogIndex>,
    },
    AppendResponse {
        success: bool,
        /// Last index in the responder's log after handling the request.
        last_log_idx: Option<LogIndex>,
    },
}

impl RaftMsg {
    pub fn kind(&self) -> MessageKind {
        use RaftMsg::*;
        match self {
            RequestVote => MessageKind::RequestVote,
            VoteResponse { .. } => MessageKind::VoteResponse,
            AppendEntries { .. } => MessageKind::AppendEntries,
            AppendResponse { .. } => MessageKind::AppendResponse,
        }
    }
}

/// A protocol message travelling between two nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub from: NodeId,
    pub to: NodeId,
    /// Sender's term at send time.
    pub term: Term,
    pub body: RaftMsg,
    /// Transit progress in [0, 1). Delivered once it reaches 1.
    pub progress: f64,
}

impl Message {
    pub fn new(from: NodeId, to: NodeId, term: Term, body: RaftMsg) -> Self {
        Self {
            from,
            to,
            term,
            body,
            progress: 0.0,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }
}

/// Commands accepted from the UI layer.
#[derive(Clone, Debug, PartialEq)]
pub enum CtlMsg {
    Start,
    Stop,
    Reset { node_count: Option<usize> },
    SetSpeed { factor: f64 },
    AddLogEntry { command: RaftCmd },
    StopNode { id: NodeId },
    RestartNode,
    RestartNodeId { id: NodeId },
}

///////////////////////////////////////////////////
// The rest of this module is the read-only view
// handed to renderers and tests.
///////////////////////////////////////////////////
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Follower,
    Candidate,
    Leader,
    Stopped,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeSummary {
    pub id: NodeId,
    pub role: RoleKind,
    pub term: Term,
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry>,
    pub commit_idx: Option<LogIndex>,
    pub last_applied: Option<LogIndex>,
    pub election_timer: Millis,
    pub election_timeout: Millis,
    pub heartbeat_timer: Millis,
    /// Present only while the node is Leader.
    pub next_idxs: Option<BTreeMap<NodeId, LogIndex>>,
    /// Present only while the node is Leader.
    pub match_idxs: Option<BTreeMap<NodeId, Option<LogIndex>>>,
}

impl NodeSummary {
    pub fn is_leader(&self) -> bool {
        self.role == RoleKind::Leader
    }

    pub fn is_stopped(&self) -> bool {
        self.role == RoleKind::Stopped
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSummary {
    pub nodes: Vec<NodeSummary>,
    pub messages: Vec<Message>,
    /// Highest term observed on any node.
    pub current_term: Term,
    pub leader_id: Option<NodeId>,
    pub total_elections: u64,
    pub total_messages: u64,
    pub simulated_time: Millis,
    pub running: bool,
    pub speed: f64,
}
