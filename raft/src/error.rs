use thiserror::Error;

/// Rejections at the command boundary. Expected protocol edge cases are
/// no-ops, not errors.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SimError {
    #[error("speed must be positive and finite, got {0}")]
    InvalidSpeed(f64),

    #[error("cluster needs at least one node, got {0}")]
    InvalidNodeCount(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
