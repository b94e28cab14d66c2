use color_eyre::eyre::{bail, eyre, Result};
use raftsim_raft::{
    Cluster, ClusterSummary, CtlMsg, LogIndex, NodeId, NodeSummary, RaftCmd, SimConfig, Term,
};
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot},
    time::sleep,
};

use crate::{DriverMsg, LocalCluster};

pub type Nodes = Vec<NodeSummary>;

/// Polls made while waiting for a leader, 100ms apart.
const LEADER_POLLS: usize = 300;
/// Polls made while waiting for a command to commit, 100ms apart.
const COMMIT_POLLS: usize = 50;

pub struct LocalClusterRunner {
    tx: mpsc::Sender<DriverMsg>,
}

impl LocalClusterRunner {
    /// Spawn a driver for a fresh cluster. The simulation starts paused.
    pub fn new(config: SimConfig) -> Result<Self> {
        let cluster = Cluster::new(config)?;
        let (requests_tx, requests_rx) = mpsc::channel(1024);
        let mut c = LocalCluster::new(cluster, requests_rx);
        tokio::spawn(async move {
            c.run().await;
        });
        Ok(Self { tx: requests_tx })
    }

    async fn ctl(&mut self, msg: CtlMsg) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(DriverMsg::Ctl { msg, tx })
            .await
            .map_err(|_| eyre!("Local cluster is gone"))?;
        rx.await??;
        Ok(())
    }

    pub async fn start(&mut self) -> Result<()> {
        self.ctl(CtlMsg::Start).await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.ctl(CtlMsg::Stop).await
    }

    pub async fn reset(&mut self, node_count: Option<usize>) -> Result<()> {
        self.ctl(CtlMsg::Reset { node_count }).await
    }

    pub async fn set_speed(&mut self, factor: f64) -> Result<()> {
        self.ctl(CtlMsg::SetSpeed { factor }).await
    }

    pub async fn add_log_entry(&mut self, command: impl Into<RaftCmd>) -> Result<()> {
        self.ctl(CtlMsg::AddLogEntry {
            command: command.into(),
        })
        .await
    }

    pub async fn stop_node(&mut self, id: NodeId) -> Result<()> {
        self.ctl(CtlMsg::StopNode { id }).await
    }

    pub async fn restart_node(&mut self) -> Result<()> {
        self.ctl(CtlMsg::RestartNode).await
    }

    pub async fn restart_node_by_id(&mut self, id: NodeId) -> Result<()> {
        self.ctl(CtlMsg::RestartNodeId { id }).await
    }

    pub async fn get_cluster_state(&mut self) -> Result<ClusterSummary> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(DriverMsg::SummaryRequest { tx })
            .await
            .map_err(|_| eyre!("Local cluster is gone"))?;
        rx.await.map_err(|_| eyre!("No state received!"))
    }

    pub async fn sleep(&mut self, ms: u64) {
        sleep(Duration::from_millis(ms)).await;
    }

    // Only one leader at the highest live term
    pub async fn check_one_leader(&mut self) -> Result<NodeSummary> {
        for _ in 0..LEADER_POLLS {
            self.sleep(100).await;
            let nodes = self.get_cluster_state().await?.nodes;
            let highest_leaders = leaders(&nodes);
            match highest_leaders.len() {
                1 => return Ok(highest_leaders[0].clone()),
                l if l > 1 => bail!("More than one leader on the same term!"),
                _ => {}
            }
        }
        bail!("No leader elected in time!")
    }

    /// Submit `cmd` to the current leader and wait for that leader to commit
    /// it. Ok(false) if leadership changed or the entry never committed.
    pub async fn try_to_commit(&mut self, cmd: impl Into<RaftCmd>) -> Result<bool> {
        let cmd = cmd.into();
        let leader = self.check_one_leader().await?;
        let idx = leader.log.len();
        self.add_log_entry(cmd.clone()).await?;
        for _ in 0..COMMIT_POLLS {
            self.sleep(100).await;
            let state = self.get_cluster_state().await?;
            if state.leader_id != Some(leader.id) {
                return Ok(false);
            }
            let node = &state.nodes[leader.id];
            if node.commit_idx.is_some_and(|c| c >= idx) {
                return Ok(node.log[idx].command == cmd);
            }
        }
        Ok(false)
    }

    pub async fn n_committed(&mut self, idx: LogIndex) -> Result<usize> {
        let nodes = self.get_cluster_state().await?.nodes;
        Ok(nodes
            .iter()
            .filter(|n| n.commit_idx.is_some_and(|c| c >= idx))
            .count())
    }

    pub async fn has_no_leader(&mut self) -> Result<bool> {
        Ok(leaders(&self.get_cluster_state().await?.nodes).is_empty())
    }

    pub async fn current_term(&mut self) -> Result<Term> {
        Ok(self.get_cluster_state().await?.current_term)
    }

    pub async fn live_term_agreement(&mut self) -> Result<bool> {
        let nodes = self.get_cluster_state().await?.nodes;
        let mut live = nodes.iter().filter(|n| !n.is_stopped());
        let Some(first) = live.next() else {
            return Ok(true);
        };
        Ok(live.all(|n| n.term == first.term))
    }
}

impl Drop for LocalClusterRunner {
    fn drop(&mut self) {
        // The driver may already be gone; nothing left to stop then.
        let _ = self.tx.try_send(DriverMsg::Shutdown);
    }
}

fn leaders(nodes: &Nodes) -> Nodes {
    let mut highest_term = 0;
    let mut highest_leaders = Vec::new();
    for node in nodes {
        if node.is_stopped() {
            continue;
        }
        if node.term > highest_term {
            highest_term = node.term;
            highest_leaders.clear();
        }
        if node.term == highest_term && node.is_leader() {
            highest_leaders.push(node.clone());
        }
    }
    highest_leaders
}
