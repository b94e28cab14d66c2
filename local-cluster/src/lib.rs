use raftsim_raft::{Cluster, ClusterSummary, CtlMsg, SimError};
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

pub mod local_cluster_tester;

/// Wall-clock time between two frames, about one display refresh.
pub const FRAME_DURATION: Duration = Duration::from_millis(16);

pub enum DriverMsg {
    Ctl {
        msg: CtlMsg,
        tx: oneshot::Sender<Result<(), SimError>>,
    },
    SummaryRequest {
        tx: oneshot::Sender<ClusterSummary>,
    },
    Shutdown,
}

/// Runs a [`Cluster`] against the wall clock, the way an animation loop
/// would, and serves commands and snapshots between frames.
pub struct LocalCluster {
    cluster: Cluster,
    /// Channel for messages from cluster runner
    requests_rx: mpsc::Receiver<DriverMsg>,
}

impl LocalCluster {
    pub fn new(cluster: Cluster, requests_rx: mpsc::Receiver<DriverMsg>) -> Self {
        Self {
            cluster,
            requests_rx,
        }
    }

    pub async fn run(&mut self) {
        let mut frames = time::interval(FRAME_DURATION);
        frames.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_frame = Instant::now();
        loop {
            tokio::select! {
                request = self.requests_rx.recv() => {
                    let Some(request) = request else {
                        info!("Runner gone, local cluster stopping");
                        return;
                    };
                    if !self.process_request(request) {
                        info!("Local cluster shutting down");
                        return;
                    }
                }
                _ = frames.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last_frame);
                    last_frame = now;
                    self.cluster.update(elapsed.as_secs_f64() * 1000.0);
                }
            }
        }
    }

    /// Returns false once it's time to shut down.
    fn process_request(&mut self, request: DriverMsg) -> bool {
        use DriverMsg::*;
        match request {
            Ctl { msg, tx } => {
                debug!(?msg, "Control message");
                let result = self.cluster.apply_ctl(msg);
                if tx.send(result).is_err() {
                    debug!("Control reply receiver dropped");
                }
            }
            SummaryRequest { tx } => {
                if tx.send(self.cluster.summary()).is_err() {
                    debug!("Summary receiver dropped");
                }
            }
            Shutdown => return false,
        }
        true
    }
}
