//! Tunables for one simulation run.

use crate::error::SimError;
use crate::msg::{
    Millis, ELECTION_TIMEOUT_MS_HIGH, ELECTION_TIMEOUT_MS_LOW, HEARTBEAT_INTERVAL_MS, TRANSIT_MS,
};

/// Configuration for a [`Cluster`](crate::Cluster).
///
/// Defaults match the protocol constants in [`msg`](crate::msg). All timings
/// are simulated milliseconds, before the speed multiplier is applied.
#[derive(Clone, Debug, PartialEq)]
pub struct SimConfig {
    pub node_count: usize,
    pub election_timeout_min_ms: Millis,
    pub election_timeout_max_ms: Millis,
    pub heartbeat_interval_ms: Millis,
    pub transit_ms: Millis,
    pub speed: f64,
    /// Seed for election timeout draws. `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            node_count: 5,
            election_timeout_min_ms: ELECTION_TIMEOUT_MS_LOW,
            election_timeout_max_ms: ELECTION_TIMEOUT_MS_HIGH,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            transit_ms: TRANSIT_MS,
            speed: 1.0,
            seed: None,
        }
    }
}

impl SimConfig {
    pub fn with_node_count(mut self, node_count: usize) -> Self {
        self.node_count = node_count;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_transit_ms(mut self, transit_ms: Millis) -> Self {
        self.transit_ms = transit_ms;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, interval: Millis) -> Self {
        self.heartbeat_interval_ms = interval;
        self
    }

    pub fn with_election_timeout_ms(mut self, min: Millis, max: Millis) -> Self {
        self.election_timeout_min_ms = min;
        self.election_timeout_max_ms = max;
        self
    }

    pub fn validate(&self) -> Result<(), SimError> {
        validate_node_count(self.node_count)?;
        validate_speed(self.speed)?;
        let timings = [
            ("election_timeout_min_ms", self.election_timeout_min_ms),
            ("election_timeout_max_ms", self.election_timeout_max_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("transit_ms", self.transit_ms),
        ];
        for (name, value) in timings {
            if !value.is_finite() || value <= 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(SimError::InvalidConfig(format!(
                "empty election timeout window [{}, {})",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_node_count(node_count: usize) -> Result<(), SimError> {
    if node_count == 0 {
        return Err(SimError::InvalidNodeCount(node_count));
    }
    Ok(())
}

pub(crate) fn validate_speed(factor: f64) -> Result<(), SimError> {
    if !factor.is_finite() || factor <= 0.0 {
        return Err(SimError::InvalidSpeed(factor));
    }
    Ok(())
}
