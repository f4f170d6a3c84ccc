//! Built-in evaluators.
//!
//! Each constructor fixes the evaluator's name from its parameters when the
//! suite is assembled; names never change afterwards.

pub mod checkpoints;
pub mod finality;

pub use checkpoints::{checkpoints_agree_across_sources, CheckpointsAgree};
pub use finality::{
    finalization_occurs, finalization_occurs_with, new_finalized_checkpoint_occurs,
    new_finalized_checkpoint_occurs_with, FinalityParams, FinalizationOccurs,
    NewFinalizedCheckpointOccurs,
};

#[cfg(test)]
pub(crate) mod mocks {
    use async_trait::async_trait;
    use bleep_chain_reader::{
        ChainHeadSnapshot, FinalityCheckpoints, GenesisInfo, NodeClient, ReadError,
    };
    use mockall::mock;

    mock! {
        pub Node {}

        #[async_trait]
        impl NodeClient for Node {
            async fn chain_head(&self) -> Result<ChainHeadSnapshot, ReadError>;
            async fn genesis(&self) -> Result<GenesisInfo, ReadError>;
            async fn finality_checkpoints(&self) -> Result<FinalityCheckpoints, ReadError>;
        }
    }
}
