use std::collections::HashMap;

use raftsim_raft::msg::ELECTION_TIMEOUT_MS_HIGH;
use raftsim_raft::{
    Cluster, CtlMsg, LogIndex, MessageKind, NodeId, RoleKind, SimConfig, SimError, Term,
};

/// Frame size used to drive the cluster, in ms.
const STEP_MS: f64 = 100.0;
/// How long a leader must hold on before a test builds on it.
const STABLE_MS: f64 = 3000.0;

/// Drives a cluster in fixed steps and checks the safety properties after
/// every one of them.
struct Harness {
    cluster: Cluster,
    terms: Vec<Term>,
    commits: Vec<Option<LogIndex>>,
}

impl Harness {
    fn new(config: SimConfig) -> Self {
        let mut cluster = Cluster::new(config).unwrap();
        cluster.start();
        let terms = cluster.nodes().iter().map(|n| n.term()).collect();
        let commits = cluster.nodes().iter().map(|n| n.commit_idx()).collect();
        Self {
            cluster,
            terms,
            commits,
        }
    }

    fn step(&mut self) {
        self.cluster.update(STEP_MS);
        self.check_invariants();
    }

    fn run_for(&mut self, ms: f64) {
        let steps = (ms / STEP_MS).ceil() as usize;
        for _ in 0..steps {
            self.step();
        }
    }

    fn run_until(&mut self, limit_ms: f64, done: impl Fn(&Cluster) -> bool) -> bool {
        let mut elapsed = 0.0;
        while elapsed < limit_ms {
            self.step();
            elapsed += STEP_MS;
            if done(&self.cluster) {
                return true;
            }
        }
        false
    }

    fn run_until_stable_leader(&mut self, limit_ms: f64) -> NodeId {
        let mut held: Option<(NodeId, Term, f64)> = None;
        let mut elapsed = 0.0;
        while elapsed < limit_ms {
            self.step();
            elapsed += STEP_MS;
            let now = self.cluster.simulated_time();
            let current = self
                .cluster
                .leader_id()
                .map(|id| (id, self.cluster.node(id).unwrap().term()));
            held = match (current, held) {
                (Some((id, term)), Some((held_id, held_term, since)))
                    if id == held_id && term == held_term =>
                {
                    if now - since >= STABLE_MS {
                        return id;
                    }
                    Some((held_id, held_term, since))
                }
                (Some((id, term)), _) => Some((id, term, now)),
                (None, _) => None,
            };
        }
        panic!("No stable leader within {limit_ms}ms");
    }

    fn check_invariants(&mut self) {
        let mut leaders_per_term: HashMap<Term, usize> = HashMap::new();
        for node in self.cluster.nodes() {
            if node.is_leader() {
                *leaders_per_term.entry(node.term()).or_default() += 1;
            }
            let id = node.id();
            assert!(node.term() >= self.terms[id], "term went backwards on {id}");
            assert!(
                node.commit_idx() >= self.commits[id],
                "commit index went backwards on {id}"
            );
            self.terms[id] = node.term();
            self.commits[id] = node.commit_idx();
        }
        for (term, count) in leaders_per_term {
            assert!(count <= 1, "{count} leaders in term {term}");
        }
        if let Some(id) = self.cluster.leader_id() {
            assert!(self.cluster.node(id).unwrap().is_leader());
        }
    }

    fn leader_count(&self) -> usize {
        self.cluster.nodes().iter().filter(|n| n.is_leader()).count()
    }
}

/// Short transit so heartbeats land well inside the election window.
fn fast(seed: u64) -> SimConfig {
    SimConfig::default().with_seed(seed).with_transit_ms(200.0)
}

#[test]
fn initial_election() {
    let mut h = Harness::new(fast(1));
    assert!(h.run_until(15_000.0, |c| c.leader_id().is_some()));
    assert_eq!(h.leader_count(), 1);
    assert!(h.cluster.total_elections() >= 1);
    assert!(h.cluster.total_messages() > 0);
}

#[test]
fn initial_election_at_default_transit() {
    let mut h = Harness::new(SimConfig::default().with_seed(3));
    assert!(h.run_until(60_000.0, |c| c.leader_id().is_some()));
    assert!(h.cluster.total_elections() >= 1);
}

#[test]
fn basic_agreement() {
    let mut h = Harness::new(fast(2));
    let leader = h.run_until_stable_leader(30_000.0);

    assert_eq!(h.cluster.add_log_entry("cmd1"), Some(0));
    h.run_for(600.0);
    let expected = h.cluster.node(leader).unwrap().log()[0].clone();
    for node in h.cluster.nodes() {
        assert_eq!(node.log().len(), 1, "node {} log", node.id());
        let entry = &node.log()[0];
        assert_eq!(
            (entry.term, entry.index, &entry.command),
            (expected.term, expected.index, &expected.command)
        );
    }

    h.run_for(2000.0);
    let leader_node = h.cluster.node(leader).unwrap();
    assert_eq!(leader_node.commit_idx(), Some(0));
    assert_eq!(leader_node.last_applied(), Some(0));
    assert!(leader_node.log()[0].committed);
    for node in h.cluster.nodes() {
        assert_eq!(node.commit_idx(), Some(0), "node {} commit", node.id());
        assert!(node.log()[0].committed);
    }
}

#[test]
fn leader_failover() {
    for seed in [4, 19, 23, 42, 77, 101] {
        let mut h = Harness::new(fast(seed));
        let old_leader = h.run_until_stable_leader(30_000.0);
        let old_term = h.cluster.node(old_leader).unwrap().term();

        assert!(h.cluster.stop_node(old_leader));
        assert_eq!(h.cluster.leader_id(), None);

        assert!(
            h.run_until(2.0 * ELECTION_TIMEOUT_MS_HIGH, |c| c.leader_id().is_some()),
            "seed {seed}: no new leader in time"
        );
        let new_leader = h.cluster.leader_id().unwrap();
        assert_ne!(new_leader, old_leader);
        assert!(h.cluster.node(new_leader).unwrap().term() > old_term);
        assert_eq!(h.cluster.node(old_leader).unwrap().role_kind(), RoleKind::Stopped);
    }
}

#[test]
fn in_flight_entries_from_stopped_leader_are_dropped() {
    let mut h = Harness::new(fast(20));
    let leader = h.run_until_stable_leader(30_000.0);
    let followers: Vec<_> = (1..5).map(|i| (leader + i) % 5).collect();

    assert_eq!(h.cluster.add_log_entry("orphan"), Some(0));
    assert!(h
        .cluster
        .messages()
        .iter()
        .any(|m| m.from == leader && m.kind() == MessageKind::AppendEntries));
    h.cluster.stop_node(leader);
    let timers: Vec<_> = followers
        .iter()
        .map(|id| h.cluster.node(*id).unwrap().election_timer())
        .collect();

    h.run_for(300.0);
    assert!(h.cluster.messages().iter().all(|m| m.from != leader));
    for (id, before) in followers.iter().zip(timers) {
        let node = h.cluster.node(*id).unwrap();
        assert!(node.log().is_empty(), "node {id} took an entry");
        assert!(
            (node.election_timer() - (before + 300.0)).abs() < 1e-6,
            "node {id} reset its election timer"
        );
    }
}

#[test]
fn in_flight_ack_from_stopped_follower_is_dropped() {
    let mut h = Harness::new(fast(21));
    let leader = h.run_until_stable_leader(30_000.0);
    let victim = (leader + 1) % 5;

    assert_eq!(h.cluster.add_log_entry("x"), Some(0));
    assert!(h.run_until(1000.0, |c| !c.node(victim).unwrap().log().is_empty()));
    assert!(h
        .cluster
        .messages()
        .iter()
        .any(|m| m.from == victim && m.kind() == MessageKind::AppendResponse));
    let match_idx = |c: &Cluster| c.node(leader).unwrap().summary().match_idxs.unwrap()[&victim];
    let before = match_idx(&h.cluster);
    assert_eq!(before, None);
    h.cluster.stop_node(victim);

    h.run_for(300.0);
    assert_eq!(h.cluster.leader_id(), Some(leader));
    assert_eq!(match_idx(&h.cluster), before);
    let matched = h.cluster.node(leader).unwrap().summary().match_idxs.unwrap();
    for i in 2..5 {
        assert_eq!(matched[&((leader + i) % 5)], Some(0));
    }
}

#[test]
fn no_leader_without_quorum() {
    let mut h = Harness::new(SimConfig::default().with_seed(5));
    for id in 0..3 {
        assert!(h.cluster.stop_node(id));
    }
    assert!(!h.run_until(10_000.0, |c| c.leader_id().is_some()));
    assert_eq!(h.leader_count(), 0);
    assert!(h.cluster.total_elections() > 0);
}

#[test]
fn no_new_leader_after_losing_quorum() {
    let mut h = Harness::new(fast(6));
    let leader = h.run_until_stable_leader(30_000.0);
    h.cluster.stop_node(leader);
    h.cluster.stop_node((leader + 1) % 5);
    h.cluster.stop_node((leader + 2) % 5);
    assert_eq!(h.cluster.active_count(), 2);

    assert!(!h.run_until(20_000.0, |c| c.leader_id().is_some()));
    assert_eq!(h.leader_count(), 0);
}

#[test]
fn restart_node() {
    let mut h = Harness::new(SimConfig::default().with_seed(7));
    h.run_for(1000.0);
    assert!(h.cluster.stop_node(2));
    assert!(!h.cluster.stop_node(2));
    assert!(!h.cluster.stop_node(42));

    assert_eq!(h.cluster.restart_node(), Some(2));
    let node = h.cluster.node(2).unwrap();
    assert_eq!(node.role_kind(), RoleKind::Follower);
    assert_eq!(node.voted_for(), None);
    assert_eq!(node.election_timer(), 0.0);
    assert!((1500.0..3000.0).contains(&node.election_timeout()));

    assert_eq!(h.cluster.restart_node(), None);
}

#[test]
fn restart_picks_lowest_stopped_id() {
    let mut h = Harness::new(SimConfig::default().with_seed(8));
    h.cluster.stop_node(3);
    h.cluster.stop_node(1);
    assert_eq!(h.cluster.restart_node(), Some(1));
    assert_eq!(h.cluster.restart_node(), Some(3));
    assert!(!h.cluster.restart_node_by_id(3));
}

#[test]
fn stopped_node_is_inert() {
    let mut h = Harness::new(fast(9));
    let leader = h.run_until_stable_leader(30_000.0);
    let victim = (leader + 1) % 5;
    h.cluster.stop_node(victim);
    let before = h.cluster.node(victim).unwrap().summary();

    h.cluster.add_log_entry("a");
    h.cluster.add_log_entry("b");
    h.run_for(5000.0);

    let after = h.cluster.node(victim).unwrap().summary();
    assert_eq!(after.role, RoleKind::Stopped);
    assert_eq!(after.term, before.term);
    assert_eq!(after.voted_for, before.voted_for);
    assert_eq!(after.log, before.log);
    assert!(h
        .cluster
        .messages()
        .iter()
        .all(|m| m.from != victim && m.to != victim));
    // Four of five nodes are still enough to commit.
    assert_eq!(h.cluster.node(leader).unwrap().commit_idx(), Some(1));
}

#[test]
fn commit_waits_for_quorum() {
    let mut h = Harness::new(fast(10));
    let leader = h.run_until_stable_leader(30_000.0);
    let followers: Vec<_> = (1..4).map(|i| (leader + i) % 5).collect();
    for id in &followers {
        h.cluster.stop_node(*id);
    }

    assert_eq!(h.cluster.add_log_entry("pending"), Some(0));
    h.run_for(5000.0);
    assert_eq!(h.cluster.leader_id(), Some(leader));
    for node in h.cluster.nodes() {
        assert_eq!(node.commit_idx(), None);
        assert!(node.log().iter().all(|e| !e.committed));
    }

    h.cluster.restart_node_by_id(followers[0]);
    h.cluster.restart_node_by_id(followers[1]);
    assert!(h.run_until(5000.0, |c| c.node(leader).unwrap().commit_idx() == Some(0)));
    assert_eq!(h.cluster.node(followers[0]).unwrap().log().len(), 1);
    assert_eq!(h.cluster.node(followers[1]).unwrap().log().len(), 1);
    assert!(h.cluster.node(followers[2]).unwrap().log().is_empty());
}

#[test]
fn single_node_cluster() {
    let mut h = Harness::new(SimConfig::default().with_node_count(1).with_seed(11));
    assert!(h.run_until(3100.0, |c| c.leader_id() == Some(0)));
    assert_eq!(h.cluster.add_log_entry("solo"), Some(0));
    let node = h.cluster.node(0).unwrap();
    assert_eq!(node.commit_idx(), Some(0));
    assert!(node.log()[0].committed);
    assert_eq!(h.cluster.total_messages(), 0);
}

#[test]
fn add_log_entry_without_leader_is_noop() {
    let mut c = Cluster::new(SimConfig::default().with_seed(12)).unwrap();
    assert_eq!(c.add_log_entry("nobody home"), None);
    assert!(c.messages().is_empty());
}

#[test]
fn update_is_noop_until_started() {
    let mut c = Cluster::new(SimConfig::default().with_seed(13)).unwrap();
    c.update(5000.0);
    assert_eq!(c.simulated_time(), 0.0);
    assert_eq!(c.total_elections(), 0);

    c.start();
    c.update(100.0);
    assert_eq!(c.simulated_time(), 100.0);
    c.stop();
    c.update(100.0);
    assert_eq!(c.simulated_time(), 100.0);
    assert!(!c.is_running());
}

#[test]
fn speed_scales_frames() {
    let mut c = Cluster::new(SimConfig::default().with_seed(14)).unwrap();
    c.start();
    c.set_speed(2.5).unwrap();
    c.update(100.0);
    assert_eq!(c.simulated_time(), 250.0);

    assert_eq!(c.set_speed(0.0), Err(SimError::InvalidSpeed(0.0)));
    assert!(c.set_speed(f64::INFINITY).is_err());
    assert_eq!(c.speed(), 2.5);

    c.update(-50.0);
    assert_eq!(c.simulated_time(), 250.0);
}

#[test]
fn reset_rebuilds_everything() {
    let mut h = Harness::new(fast(15));
    h.run_until_stable_leader(30_000.0);
    h.cluster.add_log_entry("gone");

    h.cluster.reset(Some(3)).unwrap();
    let c = &mut h.cluster;
    assert_eq!(c.nodes().len(), 3);
    assert!(!c.is_running());
    assert_eq!(c.leader_id(), None);
    assert_eq!(c.total_elections(), 0);
    assert_eq!(c.total_messages(), 0);
    assert_eq!(c.simulated_time(), 0.0);
    assert!(c.messages().is_empty());
    for node in c.nodes() {
        assert_eq!(node.role_kind(), RoleKind::Follower);
        assert_eq!(node.term(), 0);
        assert!(node.log().is_empty());
    }

    c.reset(None).unwrap();
    assert_eq!(c.nodes().len(), 3);
    assert_eq!(c.reset(Some(0)), Err(SimError::InvalidNodeCount(0)));
    assert_eq!(c.nodes().len(), 3);
}

#[test]
fn same_seed_same_run() {
    let mut a = Harness::new(fast(16));
    let mut b = Harness::new(fast(16));
    a.run_for(8000.0);
    b.run_for(8000.0);
    a.cluster.add_log_entry("x");
    b.cluster.add_log_entry("x");
    a.run_for(2000.0);
    b.run_for(2000.0);
    assert_eq!(a.cluster.summary(), b.cluster.summary());
}

#[test]
fn summary_reflects_state() {
    let mut h = Harness::new(fast(17));
    let leader = h.run_until_stable_leader(30_000.0);
    let summary = h.cluster.summary();

    assert!(summary.running);
    assert_eq!(summary.leader_id, Some(leader));
    assert_eq!(summary.nodes.len(), 5);
    assert_eq!(summary.current_term, h.cluster.current_term());
    for node in &summary.nodes {
        assert_eq!(node.next_idxs.is_some(), node.id == leader);
        assert_eq!(node.match_idxs.is_some(), node.id == leader);
    }
    let next_idxs = summary.nodes[leader].next_idxs.as_ref().unwrap();
    assert_eq!(next_idxs.len(), 4);
    assert!(!next_idxs.contains_key(&leader));
    assert!(summary.messages.iter().all(|m| (0.0..1.0).contains(&m.progress)));
}

#[test]
fn control_messages() {
    let mut c = Cluster::new(SimConfig::default().with_seed(18)).unwrap();
    c.apply_ctl(CtlMsg::Start).unwrap();
    assert!(c.is_running());
    assert_eq!(
        c.apply_ctl(CtlMsg::SetSpeed { factor: -1.0 }),
        Err(SimError::InvalidSpeed(-1.0))
    );
    c.apply_ctl(CtlMsg::SetSpeed { factor: 3.0 }).unwrap();
    assert_eq!(c.speed(), 3.0);

    c.apply_ctl(CtlMsg::StopNode { id: 1 }).unwrap();
    assert!(c.node(1).unwrap().is_stopped());
    c.apply_ctl(CtlMsg::StopNode { id: 99 }).unwrap();
    c.apply_ctl(CtlMsg::RestartNodeId { id: 1 }).unwrap();
    assert_eq!(c.node(1).unwrap().role_kind(), RoleKind::Follower);
    c.apply_ctl(CtlMsg::RestartNode).unwrap();

    c.apply_ctl(CtlMsg::AddLogEntry {
        command: "dropped".to_string(),
    })
    .unwrap();
    c.apply_ctl(CtlMsg::Stop).unwrap();
    assert!(!c.is_running());
    c.apply_ctl(CtlMsg::Reset { node_count: Some(7) }).unwrap();
    assert_eq!(c.nodes().len(), 7);
}
