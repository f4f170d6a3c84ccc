// Evaluation policies.
//
// A policy is a pure predicate over the current tick. Every policy here is a
// monotonic step function: once eligible, eligible for the rest of the run.

use bleep_chain_reader::Epoch;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationPolicy {
    /// Runs on every tick.
    AllEpochs,
    /// Runs once `epoch > n`.
    AfterNthEpoch(Epoch),
    /// Runs once `epoch >= n`.
    OnwardsNthEpoch(Epoch),
}

impl EvaluationPolicy {
    pub fn should_run(&self, epoch: Epoch) -> bool {
        match *self {
            EvaluationPolicy::AllEpochs => true,
            EvaluationPolicy::AfterNthEpoch(n) => epoch > n,
            EvaluationPolicy::OnwardsNthEpoch(n) => epoch >= n,
        }
    }
}

pub fn after_nth_epoch(n: Epoch) -> EvaluationPolicy {
    EvaluationPolicy::AfterNthEpoch(n)
}

pub fn onwards_nth_epoch(n: Epoch) -> EvaluationPolicy {
    EvaluationPolicy::OnwardsNthEpoch(n)
}

pub fn all_epochs() -> EvaluationPolicy {
    EvaluationPolicy::AllEpochs
}
