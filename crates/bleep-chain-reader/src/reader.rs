// Timeout-bounded reads and cross-source reconciliation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;

use crate::client::NodeClient;
use crate::error::ReadError;
use crate::types::{ChainHeadSnapshot, Epoch, FinalityCheckpoints, GenesisInfo};

/// Wraps a `NodeClient` so that no single query can hang the caller.
///
/// Dropping the returned future cancels the in-flight request.
#[derive(Clone)]
pub struct ChainStateReader {
    client: Arc<dyn NodeClient>,
    query_timeout: Duration,
}

impl ChainStateReader {
    pub fn new(client: Arc<dyn NodeClient>, query_timeout: Duration) -> Self {
        ChainStateReader {
            client,
            query_timeout,
        }
    }

    pub async fn chain_head(&self) -> Result<ChainHeadSnapshot, ReadError> {
        self.bounded("chain head", self.client.chain_head()).await
    }

    pub async fn genesis(&self) -> Result<GenesisInfo, ReadError> {
        self.bounded("genesis", self.client.genesis()).await
    }

    pub async fn finality_checkpoints(&self) -> Result<FinalityCheckpoints, ReadError> {
        self.bounded("finality checkpoints", self.client.finality_checkpoints())
            .await
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ReadError>
    where
        F: std::future::Future<Output = Result<T, ReadError>>,
    {
        match timeout(self.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ReadError::Timeout {
                operation,
                timeout: self.query_timeout,
            }),
        }
    }
}

/// One field on which the RPC and HTTP channels disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub field: &'static str,
    pub rpc: Epoch,
    pub http: Epoch,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: rpc={} http={}", self.field, self.rpc, self.http)
    }
}

/// Compare an RPC chain-head summary with HTTP finality checkpoints.
///
/// Returns every disagreeing field, empty when both channels agree.
pub fn reconcile(rpc: &ChainHeadSnapshot, http: &FinalityCheckpoints) -> Vec<Divergence> {
    [
        ("finalized_epoch", rpc.finalized_epoch, http.finalized_epoch),
        ("justified_epoch", rpc.justified_epoch, http.current_justified_epoch),
        (
            "previous_justified_epoch",
            rpc.previous_justified_epoch,
            http.previous_justified_epoch,
        ),
    ]
    .into_iter()
    .filter(|(_, a, b)| a != b)
    .map(|(field, rpc, http)| Divergence { field, rpc, http })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct SlowNode {
        delay: Duration,
    }

    #[async_trait]
    impl NodeClient for SlowNode {
        async fn chain_head(&self) -> Result<ChainHeadSnapshot, ReadError> {
            tokio::time::sleep(self.delay).await;
            Ok(ChainHeadSnapshot::new(5, 3, 4, 3))
        }

        async fn genesis(&self) -> Result<GenesisInfo, ReadError> {
            Ok(GenesisInfo::at(0))
        }

        async fn finality_checkpoints(&self) -> Result<FinalityCheckpoints, ReadError> {
            Ok(FinalityCheckpoints {
                previous_justified_epoch: 3,
                current_justified_epoch: 4,
                finalized_epoch: 3,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_query_times_out() {
        let reader = ChainStateReader::new(
            Arc::new(SlowNode {
                delay: Duration::from_secs(60),
            }),
            Duration::from_secs(2),
        );
        match reader.chain_head().await {
            Err(ReadError::Timeout { operation, timeout }) => {
                assert_eq!(operation, "chain head");
                assert_eq!(timeout, Duration::from_secs(2));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_query_passes_through() {
        let reader = ChainStateReader::new(
            Arc::new(SlowNode {
                delay: Duration::from_millis(10),
            }),
            Duration::from_secs(2),
        );
        assert_eq!(reader.chain_head().await.unwrap().head_epoch, 5);
    }

    #[test]
    fn test_reconcile_agreeing_sources() {
        let rpc = ChainHeadSnapshot::new(5, 3, 4, 3);
        let http = FinalityCheckpoints {
            previous_justified_epoch: 3,
            current_justified_epoch: 4,
            finalized_epoch: 3,
        };
        assert!(reconcile(&rpc, &http).is_empty());
    }

    #[test]
    fn test_reconcile_reports_each_field() {
        let rpc = ChainHeadSnapshot::new(5, 3, 4, 3);
        let http = FinalityCheckpoints {
            previous_justified_epoch: 2,
            current_justified_epoch: 4,
            finalized_epoch: 2,
        };
        let diffs = reconcile(&rpc, &http);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].field, "finalized_epoch");
        assert_eq!(diffs[1].to_string(), "previous_justified_epoch: rpc=3 http=2");
    }
}
