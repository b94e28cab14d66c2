//! Runs a simulated Raft cluster in real time and logs what it does.
//!
//! ```bash
//! # Five nodes at double speed, kill the leader after 10s, bring it back 5s later
//! raftsim --speed 2 --transit-ms 200 --stop-leader-at 10 --restart-after 5
//! ```

use clap::Parser;
use color_eyre::eyre::Result;
use raftsim_local_cluster::local_cluster_tester::LocalClusterRunner;
use raftsim_raft::msg::TRANSIT_MS;
use raftsim_raft::{ClusterSummary, RoleKind, SimConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "raftsim")]
#[command(version, about = "Run a simulated Raft cluster in real time")]
#[command(long_about = "Run a simulated Raft cluster in real time.\n\n\
At the default 1000ms transit a new leader's first heartbeat reaches its \
voters 2s after they voted, past the 1500ms minimum election timeout, so \
elections often restart before a leader settles. Pass --transit-ms 200 for a \
cluster that elects and holds a leader quickly.")]
struct Args {
    /// Number of nodes in the cluster
    #[arg(short = 'n', long, default_value = "5")]
    nodes: usize,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Simulated milliseconds for a message to cross the network
    #[arg(long, default_value_t = TRANSIT_MS)]
    transit_ms: f64,

    /// Seed for election timeouts. When omitted, a random seed is used.
    #[arg(long)]
    seed: Option<u64>,

    /// Wall-clock run time in seconds
    #[arg(short = 'd', long, default_value = "30")]
    duration: u64,

    /// Seconds between client commands, 0 to send none
    #[arg(long, default_value = "3")]
    command_interval: u64,

    /// Stop whichever node leads at this second
    #[arg(long)]
    stop_leader_at: Option<u64>,

    /// Seconds after stopping the leader to restart a stopped node
    #[arg(long, default_value = "5")]
    restart_after: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = SimConfig::default()
        .with_node_count(args.nodes)
        .with_speed(args.speed)
        .with_transit_ms(args.transit_ms);
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    info!(
        nodes = args.nodes,
        speed = args.speed,
        transit_ms = args.transit_ms,
        seed = ?args.seed,
        duration_secs = args.duration,
        "Starting simulation"
    );

    let mut cr = LocalClusterRunner::new(config)?;
    cr.start().await?;

    let mut next_cmd = 0u64;
    let mut stopped_at = None;
    for second in 1..=args.duration {
        cr.sleep(1000).await;
        let state = cr.get_cluster_state().await?;
        report(&state);

        if args.command_interval > 0 && second % args.command_interval == 0 {
            next_cmd += 1;
            if state.leader_id.is_none() {
                warn!(cmd = next_cmd, "No leader, command will be dropped");
            }
            cr.add_log_entry(format!("set x {next_cmd}")).await?;
        }

        if args.stop_leader_at == Some(second) {
            match state.leader_id {
                Some(id) => {
                    warn!(node = id, "Stopping leader");
                    cr.stop_node(id).await?;
                    stopped_at = Some(second);
                }
                None => warn!("No leader to stop"),
            }
        }
        if stopped_at.is_some_and(|at| second == at + args.restart_after) {
            cr.restart_node().await?;
            stopped_at = None;
        }
    }

    cr.stop().await?;
    let state = cr.get_cluster_state().await?;
    info!(
        simulated_ms = state.simulated_time as u64,
        term = state.current_term,
        leader = ?state.leader_id,
        elections = state.total_elections,
        messages = state.total_messages,
        "Simulation finished"
    );
    Ok(())
}

fn report(state: &ClusterSummary) {
    let roles: String = state
        .nodes
        .iter()
        .map(|n| match n.role {
            RoleKind::Follower => 'F',
            RoleKind::Candidate => 'C',
            RoleKind::Leader => 'L',
            RoleKind::Stopped => '-',
        })
        .collect();
    let commits: Vec<_> = state.nodes.iter().map(|n| n.commit_idx).collect();
    info!(
        simulated_ms = state.simulated_time as u64,
        term = state.current_term,
        leader = ?state.leader_id,
        roles = %roles,
        commits = ?commits,
        in_flight = state.messages.len(),
        "Cluster"
    );
}
