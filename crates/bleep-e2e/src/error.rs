// Error taxonomy for scenario runs.
//
// Transport failures (ReadError) are recoverable and never count as invariant
// violations. Invariant violations always carry expected and observed values.
// Interceptor faults and scheduling faults end the run.

use bleep_chain_reader::ReadError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::lifecycle::Component;

/// A consensus-state arithmetic mismatch observed on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantViolation {
    pub node: usize,
    pub check: &'static str,
    pub expected: String,
    pub observed: String,
    pub detail: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node {} [{}]: {} (expected {}, observed {})",
            self.node, self.check, self.detail, self.expected, self.observed
        )
    }
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("node {node}: read failed: {source}")]
    Read {
        node: usize,
        #[source]
        source: ReadError,
    },

    #[error("invariant violated: {0}")]
    Invariant(InvariantViolation),

    #[error("node {node} is required but currently unavailable")]
    NodeUnavailable { node: usize },

    #[error("node {node} is not part of the cluster")]
    UnknownNode { node: usize },

    #[error("no node is available to evaluate against")]
    NoAvailableNode,

    #[error("could not record `{key}`: {source}")]
    Scratch {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EvaluationError {
    pub fn read(node: usize, source: ReadError) -> Self {
        EvaluationError::Read { node, source }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, EvaluationError::Invariant(_))
    }
}

impl From<InvariantViolation> for EvaluationError {
    fn from(v: InvariantViolation) -> Self {
        EvaluationError::Invariant(v)
    }
}

/// Failure to change cluster availability. Always run-fatal.
#[derive(Debug, Error)]
pub enum InterceptorError {
    #[error("could not {action} {component} of node {node}: {reason}")]
    Lifecycle {
        action: &'static str,
        component: Component,
        node: usize,
        reason: String,
    },

    #[error("node {node} is not part of the cluster")]
    UnknownNode { node: usize },

    #[error("invalid interceptor configuration: {0}")]
    Config(String),
}

/// Errors raised while building configuration or assembling a run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("could not build node client for node {node}: {source}")]
    Client {
        node: usize,
        #[source]
        source: ReadError,
    },
}

/// Faults that stop the runner before or during the epoch loop.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("cluster has {available} nodes, scenario needs at least {required}")]
    InsufficientNodes { required: usize, available: usize },

    #[error("genesis could not be retrieved: {0}")]
    GenesisUnavailable(String),

    #[error("timed out after {elapsed_secs}s at epoch {reached} of {target}")]
    TimedOut {
        reached: u64,
        target: u64,
        elapsed_secs: u64,
    },
}
