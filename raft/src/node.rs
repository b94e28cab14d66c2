use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};

use crate::msg::{LogEntry, LogIndex, Millis, NodeId, NodeSummary, RoleKind, Term};

#[derive(Clone, Debug)]
pub enum Role {
    Follower,
    Candidate {
        votes: HashSet<NodeId>,
    },
    Leader {
        // For each peer, idx of the next log entry to send to that peer
        // initialized to leader log length
        next_idxs: HashMap<NodeId, LogIndex>,
        // For each peer, idx of highest log entry known to be replicated there
        // initialized to None, increases monotonically
        match_idxs: HashMap<NodeId, Option<LogIndex>>,
    },
    Stopped,
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        use Role::*;
        match self {
            Follower => RoleKind::Follower,
            Candidate { .. } => RoleKind::Candidate,
            Leader { .. } => RoleKind::Leader,
            Stopped => RoleKind::Stopped,
        }
    }

    pub(crate) fn candidate(id: NodeId) -> Self {
        let mut votes = HashSet::new();
        votes.insert(id);
        Role::Candidate { votes }
    }

    pub(crate) fn leader(id: NodeId, node_count: usize, log_len: usize) -> Self {
        let mut next_idxs = HashMap::new();
        let mut match_idxs = HashMap::new();
        for peer in (0..node_count).filter(|peer| *peer != id) {
            next_idxs.insert(peer, log_len);
            match_idxs.insert(peer, None);
        }
        Role::Leader {
            next_idxs,
            match_idxs,
        }
    }
}

/// One simulated cluster member.
#[derive(Clone, Debug)]
pub struct RaftNode {
    pub(crate) id: NodeId,
    pub(crate) role: Role,
    pub(crate) term: Term,
    pub(crate) voted_for: Option<NodeId>,
    /// Entry `i` always has `index == i`.
    pub(crate) log: Vec<LogEntry>,
    /// Index of highest log entry known to be committed
    pub(crate) commit_idx: Option<LogIndex>,
    pub(crate) last_applied: Option<LogIndex>,
    pub(crate) election_timer: Millis,
    pub(crate) election_timeout: Millis,
    pub(crate) heartbeat_timer: Millis,
}

impl RaftNode {
    pub fn new(id: NodeId, election_timeout: Millis) -> Self {
        Self {
            id,
            role: Role::Follower,
            term: 0,
            voted_for: None,
            log: Vec::new(),
            commit_idx: None,
            last_applied: None,
            election_timer: 0.0,
            election_timeout,
            heartbeat_timer: 0.0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn role_kind(&self) -> RoleKind {
        self.role.kind()
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn commit_idx(&self) -> Option<LogIndex> {
        self.commit_idx
    }

    pub fn last_applied(&self) -> Option<LogIndex> {
        self.last_applied
    }

    pub fn election_timer(&self) -> Millis {
        self.election_timer
    }

    pub fn election_timeout(&self) -> Millis {
        self.election_timeout
    }

    pub fn heartbeat_timer(&self) -> Millis {
        self.heartbeat_timer
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.role, Role::Stopped)
    }

    pub fn last_log_idx(&self) -> Option<LogIndex> {
        self.log.len().checked_sub(1)
    }

    /// Raise the commit index to `idx` and mark every entry up to it.
    /// Returns false when `idx` would not advance it.
    pub(crate) fn advance_commit(&mut self, idx: LogIndex) -> bool {
        if self.commit_idx.is_some_and(|c| c >= idx) || idx >= self.log.len() {
            return false;
        }
        for entry in &mut self.log[..=idx] {
            entry.committed = true;
        }
        self.commit_idx = Some(idx);
        // Committed commands are applied in order as soon as they commit.
        self.last_applied = self.commit_idx;
        true
    }

    pub fn summary(&self) -> NodeSummary {
        let (next_idxs, match_idxs) = match &self.role {
            Role::Leader {
                next_idxs,
                match_idxs,
            } => (
                Some(next_idxs.iter().map(|(k, v)| (*k, *v)).collect()),
                Some(match_idxs.iter().map(|(k, v)| (*k, *v)).collect()),
            ),
            _ => (None, None),
        };
        NodeSummary {
            id: self.id,
            role: self.role.kind(),
            term: self.term,
            voted_for: self.voted_for,
            log: self.log.clone(),
            commit_idx: self.commit_idx,
            last_applied: self.last_applied,
            election_timer: self.election_timer,
            election_timeout: self.election_timeout,
            heartbeat_timer: self.heartbeat_timer,
            next_idxs,
            match_idxs,
        }
    }
}
