#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bleep_chain_reader::{
    ChainHeadSnapshot, Clock, Epoch, EpochClock, FinalityCheckpoints, GenesisInfo, NodeClient,
    ReadError,
};
use bleep_e2e::{
    Component, ConnectionSet, E2EConfig, Evaluation, EvaluationContext, EvaluationError,
    InvariantViolation, NodeSelection, ProcessLifecycle,
};
use parking_lot::Mutex;
use tokio::time::Instant;

pub const GENESIS_UNIX: i64 = 1_700_000_000;
pub const CLOCK: EpochClock = EpochClock::MINIMAL;

/// Unix clock that follows tokio's (possibly paused) time from `GENESIS_UNIX`.
pub struct TokioClock {
    start: Instant,
}

impl TokioClock {
    pub fn starting_at(start: Instant) -> Arc<Self> {
        Arc::new(TokioClock { start })
    }
}

impl Clock for TokioClock {
    fn now_unix(&self) -> i64 {
        GENESIS_UNIX + self.start.elapsed().as_secs() as i64
    }
}

/// Node whose head advances one epoch every `CLOCK` epoch, finalizing
/// normally, until it stalls.
pub struct FakeNode {
    start: Instant,
    stall_at: Option<Epoch>,
    unreachable: bool,
}

impl FakeNode {
    pub fn healthy(start: Instant) -> Self {
        FakeNode {
            start,
            stall_at: None,
            unreachable: false,
        }
    }

    pub fn stalling_at(mut self, epoch: Epoch) -> Self {
        self.stall_at = Some(epoch);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    fn head(&self) -> Epoch {
        let epoch = self.start.elapsed().as_secs() / CLOCK.epoch_duration_secs();
        match self.stall_at {
            Some(stall) => epoch.min(stall),
            None => epoch,
        }
    }

    fn refuse(&self) -> Result<(), ReadError> {
        if self.unreachable {
            return Err(ReadError::Connection {
                url: "http://127.0.0.1:3400/eth/v1alpha1".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn chain_head(&self) -> Result<ChainHeadSnapshot, ReadError> {
        self.refuse()?;
        let head = self.head();
        Ok(ChainHeadSnapshot::healthy_at(head).unwrap_or(ChainHeadSnapshot::new(head, 0, 0, 0)))
    }

    async fn genesis(&self) -> Result<GenesisInfo, ReadError> {
        self.refuse()?;
        Ok(GenesisInfo::at(GENESIS_UNIX))
    }

    async fn finality_checkpoints(&self) -> Result<FinalityCheckpoints, ReadError> {
        self.refuse()?;
        let head = self.head();
        Ok(FinalityCheckpoints {
            previous_justified_epoch: head.saturating_sub(2),
            current_justified_epoch: head.saturating_sub(1),
            finalized_epoch: head.saturating_sub(2),
        })
    }
}

pub fn cluster(nodes: Vec<FakeNode>) -> ConnectionSet {
    let clients: Vec<Arc<dyn NodeClient>> = nodes
        .into_iter()
        .map(|n| Arc::new(n) as Arc<dyn NodeClient>)
        .collect();
    ConnectionSet::from_clients(clients, Duration::from_secs(2))
}

pub fn healthy_cluster(start: Instant, n: usize) -> ConnectionSet {
    cluster((0..n).map(|_| FakeNode::healthy(start)).collect())
}

pub fn config(epochs: Epoch, nodes: usize) -> E2EConfig {
    E2EConfig {
        epochs,
        beacon_node_count: nodes,
        epoch_clock: CLOCK,
        poll_interval_ms: 6_000,
        query_timeout_ms: 2_000,
        ..E2EConfig::default()
    }
}

/// Records the ticks it ran on and fails on the listed ones.
#[derive(Clone, Default)]
pub struct TickRecorder {
    pub fail_at: Vec<Epoch>,
    pub calls: Arc<Mutex<Vec<Epoch>>>,
}

impl TickRecorder {
    pub fn failing_at(epochs: &[Epoch]) -> Self {
        TickRecorder {
            fail_at: epochs.to_vec(),
            ..TickRecorder::default()
        }
    }

    pub fn calls(&self) -> Vec<Epoch> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Evaluation for TickRecorder {
    async fn evaluate(
        &self,
        ctx: &mut EvaluationContext,
        conns: &ConnectionSet,
    ) -> Result<(), EvaluationError> {
        let epoch = ctx.epoch();
        self.calls.lock().push(epoch);
        conns.select(NodeSelection::default())?;
        if self.fail_at.contains(&epoch) {
            return Err(InvariantViolation {
                node: 0,
                check: "recorded_failure",
                expected: "pass".to_string(),
                observed: "fail".to_string(),
                detail: format!("forced failure at epoch {}", epoch),
            }
            .into());
        }
        Ok(())
    }
}

/// Process lifecycle that records calls instead of touching processes.
#[derive(Default)]
pub struct RecordingLifecycle {
    pub calls: Mutex<Vec<(&'static str, Component, usize)>>,
    pub refuse_stop: bool,
    pub hang_start: bool,
}

impl RecordingLifecycle {
    pub fn refusing_stop() -> Self {
        RecordingLifecycle {
            refuse_stop: true,
            ..RecordingLifecycle::default()
        }
    }

    pub fn hanging_start() -> Self {
        RecordingLifecycle {
            hang_start: true,
            ..RecordingLifecycle::default()
        }
    }

    pub fn count(&self, action: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.0 == action).count()
    }
}

#[async_trait]
impl ProcessLifecycle for RecordingLifecycle {
    async fn stop(&self, component: Component, node: usize) -> Result<(), String> {
        if self.refuse_stop {
            return Err("process would not stop".to_string());
        }
        self.calls.lock().push(("stop", component, node));
        Ok(())
    }

    async fn start(&self, component: Component, node: usize) -> Result<(), String> {
        if self.hang_start {
            futures::future::pending::<()>().await;
        }
        self.calls.lock().push(("start", component, node));
        Ok(())
    }

    async fn is_running(&self, component: Component, node: usize) -> Result<bool, String> {
        let calls = self.calls.lock();
        let last = calls
            .iter()
            .rev()
            .find(|c| c.1 == component && c.2 == node)
            .map(|c| c.0);
        Ok(last != Some("stop"))
    }
}
