// RPC vs HTTP checkpoint agreement.

use async_trait::async_trait;
use bleep_chain_reader::{reconcile, Epoch};

use crate::connections::{ConnectionSet, NodeSelection};
use crate::context::EvaluationContext;
use crate::error::{EvaluationError, InvariantViolation};
use crate::evaluator::{Evaluation, Evaluator};
use crate::policy::after_nth_epoch;

pub fn checkpoints_agree_across_sources(epoch: Epoch) -> Evaluator {
    Evaluator::new(
        format!("checkpoints_agree_at_epoch_{}", epoch),
        after_nth_epoch(epoch),
        CheckpointsAgree {
            node: NodeSelection::default(),
        },
    )
}

/// Both channels of one node must report the same finalized and justified
/// checkpoints.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointsAgree {
    pub node: NodeSelection,
}

#[async_trait]
impl Evaluation for CheckpointsAgree {
    async fn evaluate(
        &self,
        ctx: &mut EvaluationContext,
        conns: &ConnectionSet,
    ) -> Result<(), EvaluationError> {
        let (node, (head, checkpoints)) = conns
            .read(self.node, ctx, |r| async move {
                tokio::try_join!(r.chain_head(), r.finality_checkpoints())
            })
            .await?;

        let divergences = reconcile(&head, &checkpoints);
        if divergences.is_empty() {
            return Ok(());
        }

        let fields: Vec<_> = divergences.iter().map(|d| d.field).collect();
        Err(InvariantViolation {
            node,
            check: "rpc_and_http_checkpoints_agree",
            expected: divergences
                .iter()
                .map(|d| format!("{}={}", d.field, d.rpc))
                .collect::<Vec<_>>()
                .join(" "),
            observed: divergences
                .iter()
                .map(|d| format!("{}={}", d.field, d.http))
                .collect::<Vec<_>>()
                .join(" "),
            detail: format!("rpc and http channels disagree on {}", fields.join(", ")),
        }
        .into())
    }
}
