// Finality evaluators.
//
// Two independently named invariants:
//   finalizes_at_epoch_N               head-derived: finalized == head - 2,
//                                      previous_justified + 1 == justified,
//                                      justified + 1 == head
//   new_finalized_checkpoint_at_epoch_N  wall-clock derived:
//                                      finalized == epochs_since_genesis - 2

use async_trait::async_trait;
use bleep_chain_reader::{ChainHeadSnapshot, Epoch};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connections::{ConnectionSet, NodeSelection};
use crate::context::EvaluationContext;
use crate::error::{EvaluationError, InvariantViolation};
use crate::evaluator::{Evaluation, Evaluator};
use crate::policy::after_nth_epoch;

/// Lag between head and finalized epoch on a healthy chain.
pub const FINALITY_LAG: Epoch = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityParams {
    /// Evaluation starts on the first tick after this epoch.
    pub epoch: Epoch,
    #[serde(default)]
    pub node: NodeSelection,
}

impl FinalityParams {
    pub fn at(epoch: Epoch) -> Self {
        FinalityParams {
            epoch,
            node: NodeSelection::default(),
        }
    }

    pub fn on(mut self, node: NodeSelection) -> Self {
        self.node = node;
        self
    }

    pub fn describe_finalization(&self) -> String {
        format!("finalizes_at_epoch_{}", self.epoch)
    }

    pub fn describe_new_checkpoint(&self) -> String {
        format!("new_finalized_checkpoint_at_epoch_{}", self.epoch)
    }
}

pub fn finalization_occurs(epoch: Epoch) -> Evaluator {
    finalization_occurs_with(FinalityParams::at(epoch))
}

pub fn finalization_occurs_with(params: FinalityParams) -> Evaluator {
    Evaluator::new(
        params.describe_finalization(),
        after_nth_epoch(params.epoch),
        FinalizationOccurs { node: params.node },
    )
}

pub fn new_finalized_checkpoint_occurs(epoch: Epoch) -> Evaluator {
    new_finalized_checkpoint_occurs_with(FinalityParams::at(epoch))
}

pub fn new_finalized_checkpoint_occurs_with(params: FinalityParams) -> Evaluator {
    Evaluator::new(
        params.describe_new_checkpoint(),
        after_nth_epoch(params.epoch),
        NewFinalizedCheckpointOccurs { node: params.node },
    )
}

fn violation(
    node: usize,
    check: &'static str,
    expected: impl ToString,
    observed: impl ToString,
    detail: String,
) -> InvariantViolation {
    InvariantViolation {
        node,
        check,
        expected: expected.to_string(),
        observed: observed.to_string(),
        detail,
    }
}

fn lagged(epoch: Epoch) -> Option<Epoch> {
    epoch.checked_sub(FINALITY_LAG)
}

fn show(epoch: Option<Epoch>) -> String {
    epoch.map_or_else(|| "none (epoch below 2)".to_string(), |e| e.to_string())
}

/// Check the three head-derived relationships of one snapshot.
pub fn check_local_finality(
    node: usize,
    head: &ChainHeadSnapshot,
) -> Result<(), InvariantViolation> {
    let expected = lagged(head.head_epoch);
    if expected != Some(head.finalized_epoch) {
        return Err(violation(
            node,
            "finalized_lags_head_by_two",
            show(expected),
            head.finalized_epoch,
            format!(
                "expected finalized epoch to be {}, received: {}",
                show(expected),
                head.finalized_epoch
            ),
        ));
    }

    if head.previous_justified_epoch.checked_add(1) != Some(head.justified_epoch) {
        return Err(violation(
            node,
            "justified_follows_previous_justified",
            format!("{} + 1", head.previous_justified_epoch),
            head.justified_epoch,
            format!(
                "there should be no gaps between current and previous justified epochs, received current {} and previous {}",
                head.justified_epoch, head.previous_justified_epoch
            ),
        ));
    }

    if head.justified_epoch.checked_add(1) != Some(head.head_epoch) {
        return Err(violation(
            node,
            "head_follows_justified",
            format!("{} + 1", head.justified_epoch),
            head.head_epoch,
            format!(
                "there should be no gaps between current epoch and current justified epoch, received current {} and justified {}",
                head.head_epoch, head.justified_epoch
            ),
        ));
    }

    Ok(())
}

/// Compare a node-reported finalized epoch with the wall-clock expectation.
pub fn check_wall_clock_finality(
    node: usize,
    wall_clock_epoch: Epoch,
    finalized_epoch: Epoch,
) -> Result<(), InvariantViolation> {
    let expected = lagged(wall_clock_epoch);
    if expected == Some(finalized_epoch) {
        return Ok(());
    }
    Err(violation(
        node,
        "finalized_lags_wall_clock_by_two",
        show(expected),
        finalized_epoch,
        format!(
            "expected finalized epoch to be {}, received: {} (wall clock epoch {})",
            show(expected),
            finalized_epoch,
            wall_clock_epoch
        ),
    ))
}

fn last_finalized_key(node: usize) -> String {
    format!("last_finalized:{}", node)
}

/// Head-derived finality check against one node.
///
/// Also remembers the last finalized epoch seen per node and reports a
/// regression when a node's finalized epoch moves backwards between ticks.
#[derive(Debug, Clone, Copy)]
pub struct FinalizationOccurs {
    pub node: NodeSelection,
}

#[async_trait]
impl Evaluation for FinalizationOccurs {
    async fn evaluate(
        &self,
        ctx: &mut EvaluationContext,
        conns: &ConnectionSet,
    ) -> Result<(), EvaluationError> {
        let (node, head) = conns.read(self.node, ctx, |r| r.chain_head()).await?;
        debug!(node, head = head.head_epoch, finalized = head.finalized_epoch, "chain head");

        let key = last_finalized_key(node);
        if let Some(previous) = ctx.recall::<Epoch>(&key) {
            if head.finalized_epoch < previous {
                return Err(violation(
                    node,
                    "finalized_never_regresses",
                    format!(">= {}", previous),
                    head.finalized_epoch,
                    format!(
                        "finalized epoch went backwards from {} to {}",
                        previous, head.finalized_epoch
                    ),
                )
                .into());
            }
        }
        ctx.record(key, &head.finalized_epoch)?;

        check_local_finality(node, &head)?;
        Ok(())
    }
}

/// Cross-source finality check: RPC finalized epoch against the epoch derived
/// from the node's genesis time and the context clock.
#[derive(Debug, Clone, Copy)]
pub struct NewFinalizedCheckpointOccurs {
    pub node: NodeSelection,
}

#[async_trait]
impl Evaluation for NewFinalizedCheckpointOccurs {
    async fn evaluate(
        &self,
        ctx: &mut EvaluationContext,
        conns: &ConnectionSet,
    ) -> Result<(), EvaluationError> {
        let (node, head) = conns.read(self.node, ctx, |r| r.chain_head()).await?;

        let wall_clock_epoch = match ctx.wall_clock_epoch() {
            Some(epoch) => epoch,
            None => {
                let (_, genesis) = conns.read(self.node, ctx, |r| r.genesis()).await?;
                let epoch = ctx.epoch_clock().wall_clock_epoch(&genesis, ctx.clock());
                ctx.set_genesis(genesis);
                epoch
            }
        };
        debug!(
            node,
            wall_clock_epoch,
            finalized = head.finalized_epoch,
            "wall clock finality"
        );

        check_wall_clock_finality(node, wall_clock_epoch, head.finalized_epoch)?;
        Ok(())
    }
}
