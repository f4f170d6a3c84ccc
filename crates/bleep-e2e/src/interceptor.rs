// Scenario interceptors.
//
// An interceptor is the only place where cluster availability changes during
// a run. It sees the connection set and the process lifecycle through
// `ClusterControl`, which has no handle on the runner's epoch counter.

use async_trait::async_trait;
use bleep_chain_reader::Epoch;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::connections::ConnectionSet;
use crate::error::InterceptorError;
use crate::lifecycle::{Component, ProcessLifecycle};

/// What the runner does with the evaluator pass of the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterceptOutcome {
    Proceed,
    /// The cluster is known not to satisfy the invariants on this tick.
    SkipEvaluation,
}

impl InterceptOutcome {
    pub fn skips(&self) -> bool {
        matches!(self, InterceptOutcome::SkipEvaluation)
    }

    fn or(self, other: InterceptOutcome) -> InterceptOutcome {
        if self.skips() || other.skips() {
            InterceptOutcome::SkipEvaluation
        } else {
            InterceptOutcome::Proceed
        }
    }
}

/// Mutable view of the cluster handed to an interceptor for one call.
pub struct ClusterControl<'a> {
    conns: &'a mut ConnectionSet,
    lifecycle: &'a dyn ProcessLifecycle,
}

impl<'a> ClusterControl<'a> {
    pub fn new(conns: &'a mut ConnectionSet, lifecycle: &'a dyn ProcessLifecycle) -> Self {
        ClusterControl { conns, lifecycle }
    }

    pub fn connections(&self) -> &ConnectionSet {
        self.conns
    }

    pub fn node_count(&self) -> usize {
        self.conns.len()
    }

    pub async fn stop(&self, component: Component, node: usize) -> Result<(), InterceptorError> {
        self.check_index(node)?;
        self.lifecycle
            .stop(component, node)
            .await
            .map_err(|reason| InterceptorError::Lifecycle {
                action: "stop",
                component,
                node,
                reason,
            })
    }

    pub async fn start(&self, component: Component, node: usize) -> Result<(), InterceptorError> {
        self.check_index(node)?;
        self.lifecycle
            .start(component, node)
            .await
            .map_err(|reason| InterceptorError::Lifecycle {
                action: "start",
                component,
                node,
                reason,
            })
    }

    /// Mark `node` unavailable, then stop `components` in order.
    pub async fn take_offline(
        &mut self,
        node: usize,
        components: &[Component],
    ) -> Result<(), InterceptorError> {
        self.conns.mark_unavailable(node)?;
        for &component in components {
            self.stop(component, node).await?;
        }
        Ok(())
    }

    /// Start `components` in reverse order, then mark `node` available again.
    ///
    /// A node that is already available is left alone. Returns whether
    /// anything was restored.
    pub async fn bring_online(
        &mut self,
        node: usize,
        components: &[Component],
    ) -> Result<bool, InterceptorError> {
        self.check_index(node)?;
        if self.conns.is_available(node) {
            return Ok(false);
        }
        for &component in components.iter().rev() {
            self.start(component, node).await?;
        }
        self.conns.restore(node)
    }

    fn check_index(&self, node: usize) -> Result<(), InterceptorError> {
        if node < self.conns.len() {
            Ok(())
        } else {
            Err(InterceptorError::UnknownNode { node })
        }
    }
}

#[async_trait]
pub trait ScenarioInterceptor: Send {
    fn name(&self) -> &str;

    /// Called once per processed tick. Must not assume any tick is seen twice.
    async fn intercept(
        &mut self,
        control: &mut ClusterControl<'_>,
        epoch: Epoch,
    ) -> Result<InterceptOutcome, InterceptorError>;

    /// Undo any outstanding mutation. Called at stage hand-off and when the
    /// run ends, whatever its outcome.
    async fn conclude(&mut self, _control: &mut ClusterControl<'_>) -> Result<(), InterceptorError> {
        Ok(())
    }

    /// Clear interceptor-local state.
    fn reset(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Targets {
    All,
    Nodes(Vec<usize>),
}

impl Targets {
    fn resolve(&self, node_count: usize) -> Vec<usize> {
        match self {
            Targets::All => (0..node_count).collect(),
            Targets::Nodes(nodes) => nodes.clone(),
        }
    }
}

/// When an outage starts, how long it lasts and how long recovery takes.
///
/// The outage covers `[offline_at, offline_at + outage_epochs)`; restoration
/// happens on tick `offline_at + outage_epochs`, and the recovery window
/// covers the `recovery_epochs` ticks starting there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutageSchedule {
    pub targets: Targets,
    pub offline_at: Epoch,
    pub outage_epochs: u64,
    pub recovery_epochs: u64,
    /// Keep evaluating the surviving nodes while the targets are down.
    #[serde(default)]
    pub evaluate_during_outage: bool,
}

impl OutageSchedule {
    pub fn restore_at(&self) -> Epoch {
        self.offline_at.saturating_add(self.outage_epochs)
    }

    pub fn recovered_at(&self) -> Epoch {
        self.restore_at().saturating_add(self.recovery_epochs)
    }

    fn in_recovery(&self, epoch: Epoch) -> bool {
        epoch >= self.restore_at() && epoch < self.recovered_at()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OutageState {
    Idle,
    Down(Vec<usize>),
    Restored,
}

/// Shared choreography for process outages.
#[derive(Debug)]
struct Outage {
    schedule: OutageSchedule,
    components: &'static [Component],
    /// Whether the targets leave the connection set while down.
    consensus: bool,
    state: OutageState,
}

impl Outage {
    async fn intercept(
        &mut self,
        control: &mut ClusterControl<'_>,
        epoch: Epoch,
        label: &str,
    ) -> Result<InterceptOutcome, InterceptorError> {
        let mut outcome = InterceptOutcome::Proceed;

        if self.state == OutageState::Idle
            && epoch >= self.schedule.offline_at
            && epoch < self.schedule.restore_at()
        {
            let targets = self.schedule.targets.resolve(control.node_count());
            info!(interceptor = label, epoch, ?targets, "taking nodes offline");
            // a partial outage is still undone by conclude()
            self.state = OutageState::Down(targets.clone());
            for node in targets {
                if self.consensus {
                    control.take_offline(node, self.components).await?;
                } else {
                    for &component in self.components {
                        control.stop(component, node).await?;
                    }
                }
            }
        }

        if matches!(self.state, OutageState::Down(_)) {
            if epoch >= self.schedule.restore_at() {
                info!(interceptor = label, epoch, "bringing nodes back online");
                self.restore(control).await?;
            } else if !self.consensus
                || !self.schedule.evaluate_during_outage
                || control.connections().available_count() == 0
            {
                outcome = InterceptOutcome::SkipEvaluation;
            }
        }

        if self.schedule.in_recovery(epoch) {
            outcome = outcome.or(InterceptOutcome::SkipEvaluation);
        }
        Ok(outcome)
    }

    async fn restore(&mut self, control: &mut ClusterControl<'_>) -> Result<(), InterceptorError> {
        let down = match std::mem::replace(&mut self.state, OutageState::Restored) {
            OutageState::Down(down) => down,
            other => {
                self.state = other;
                return Ok(());
            }
        };
        for (i, &node) in down.iter().enumerate() {
            let result = if self.consensus {
                control.bring_online(node, self.components).await.map(|_| ())
            } else {
                let mut res = Ok(());
                for &component in self.components.iter().rev() {
                    res = control.start(component, node).await;
                    if res.is_err() {
                        break;
                    }
                }
                res
            };
            if let Err(err) = result {
                self.state = OutageState::Down(down[i..].to_vec());
                return Err(err);
            }
        }
        Ok(())
    }
}

const CONSENSUS_COMPONENTS: &[Component] = &[Component::ValidatorClient, Component::BeaconNode];
const EXECUTION_COMPONENTS: &[Component] = &[Component::ExecutionClient];

/// Takes the targeted beacon nodes (and their validator clients) offline for a
/// bounded number of epochs, then restores them.
///
/// Evaluation is skipped during the outage, unless the schedule asks to keep
/// evaluating survivors and at least one node is left, and during the
/// recovery window that follows restoration.
#[derive(Debug)]
pub struct AllNodesOffline {
    outage: Outage,
}

impl AllNodesOffline {
    pub fn new(schedule: OutageSchedule) -> Self {
        AllNodesOffline {
            outage: Outage {
                schedule,
                components: CONSENSUS_COMPONENTS,
                consensus: true,
                state: OutageState::Idle,
            },
        }
    }
}

#[async_trait]
impl ScenarioInterceptor for AllNodesOffline {
    fn name(&self) -> &str {
        "all_nodes_offline"
    }

    async fn intercept(
        &mut self,
        control: &mut ClusterControl<'_>,
        epoch: Epoch,
    ) -> Result<InterceptOutcome, InterceptorError> {
        self.outage.intercept(control, epoch, "all_nodes_offline").await
    }

    async fn conclude(&mut self, control: &mut ClusterControl<'_>) -> Result<(), InterceptorError> {
        self.outage.restore(control).await
    }

    fn reset(&mut self) {
        self.outage.state = OutageState::Idle;
    }
}

/// Stops the execution-layer companion of the targets. Consensus availability
/// is untouched; evaluation is skipped for the outage and recovery window.
#[derive(Debug)]
pub struct EeOffline {
    outage: Outage,
}

impl EeOffline {
    pub fn new(schedule: OutageSchedule) -> Self {
        EeOffline {
            outage: Outage {
                schedule,
                components: EXECUTION_COMPONENTS,
                consensus: false,
                state: OutageState::Idle,
            },
        }
    }
}

#[async_trait]
impl ScenarioInterceptor for EeOffline {
    fn name(&self) -> &str {
        "ee_offline"
    }

    async fn intercept(
        &mut self,
        control: &mut ClusterControl<'_>,
        epoch: Epoch,
    ) -> Result<InterceptOutcome, InterceptorError> {
        self.outage.intercept(control, epoch, "ee_offline").await
    }

    async fn conclude(&mut self, control: &mut ClusterControl<'_>) -> Result<(), InterceptorError> {
        self.outage.restore(control).await
    }

    fn reset(&mut self) {
        self.outage.state = OutageState::Idle;
    }
}

/// One sub-scenario of a `MultiScenario`, active on `first..=last`.
pub struct Stage {
    pub first: Epoch,
    pub last: Epoch,
    pub interceptor: Box<dyn ScenarioInterceptor>,
}

impl Stage {
    pub fn new(first: Epoch, last: Epoch, interceptor: impl ScenarioInterceptor + 'static) -> Self {
        Stage {
            first,
            last,
            interceptor: Box::new(interceptor),
        }
    }

    fn covers(&self, epoch: Epoch) -> bool {
        epoch >= self.first && epoch <= self.last
    }
}

/// Runs several sub-scenarios in one run, at most one per tick.
///
/// When the active stage changes, the outgoing stage is concluded and reset
/// before the incoming one sees its first tick.
pub struct MultiScenario {
    stages: Vec<Stage>,
    active: Option<usize>,
}

impl MultiScenario {
    pub fn new(mut stages: Vec<Stage>) -> Result<Self, InterceptorError> {
        stages.sort_by_key(|s| s.first);
        for stage in &stages {
            if stage.first > stage.last {
                return Err(InterceptorError::Config(format!(
                    "stage {} has an empty window {}..={}",
                    stage.interceptor.name(),
                    stage.first,
                    stage.last
                )));
            }
        }
        for pair in stages.windows(2) {
            if pair[1].first <= pair[0].last {
                return Err(InterceptorError::Config(format!(
                    "stages {} and {} overlap at epoch {}",
                    pair[0].interceptor.name(),
                    pair[1].interceptor.name(),
                    pair[1].first
                )));
            }
        }
        Ok(MultiScenario {
            stages,
            active: None,
        })
    }

    async fn hand_off(&mut self, control: &mut ClusterControl<'_>) -> Result<(), InterceptorError> {
        if let Some(i) = self.active.take() {
            let stage = &mut self.stages[i];
            info!(stage = stage.interceptor.name(), "concluding stage");
            stage.interceptor.conclude(control).await?;
            stage.interceptor.reset();
        }
        Ok(())
    }
}

#[async_trait]
impl ScenarioInterceptor for MultiScenario {
    fn name(&self) -> &str {
        "multi_scenario"
    }

    async fn intercept(
        &mut self,
        control: &mut ClusterControl<'_>,
        epoch: Epoch,
    ) -> Result<InterceptOutcome, InterceptorError> {
        let current = self.stages.iter().position(|s| s.covers(epoch));
        if current != self.active {
            self.hand_off(control).await?;
            self.active = current;
        }
        match self.active {
            Some(i) => self.stages[i].interceptor.intercept(control, epoch).await,
            None => Ok(InterceptOutcome::Proceed),
        }
    }

    async fn conclude(&mut self, control: &mut ClusterControl<'_>) -> Result<(), InterceptorError> {
        self.hand_off(control).await
    }

    fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.interceptor.reset();
        }
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ProcessLifecycle;
    use async_trait::async_trait;
    use bleep_chain_reader::{
        ChainHeadSnapshot, FinalityCheckpoints, GenesisInfo, NodeClient, ReadError,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    struct Healthy;

    #[async_trait]
    impl NodeClient for Healthy {
        async fn chain_head(&self) -> Result<ChainHeadSnapshot, ReadError> {
            Ok(ChainHeadSnapshot::new(6, 4, 5, 4))
        }
        async fn genesis(&self) -> Result<GenesisInfo, ReadError> {
            Ok(GenesisInfo::at(0))
        }
        async fn finality_checkpoints(&self) -> Result<FinalityCheckpoints, ReadError> {
            Ok(FinalityCheckpoints {
                previous_justified_epoch: 4,
                current_justified_epoch: 5,
                finalized_epoch: 4,
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(&'static str, Component, usize)>>,
        fail_start: bool,
    }

    #[async_trait]
    impl ProcessLifecycle for Recorder {
        async fn stop(&self, component: Component, node: usize) -> Result<(), String> {
            self.calls.lock().push(("stop", component, node));
            Ok(())
        }
        async fn start(&self, component: Component, node: usize) -> Result<(), String> {
            if self.fail_start {
                return Err("refused".to_string());
            }
            self.calls.lock().push(("start", component, node));
            Ok(())
        }
        async fn is_running(&self, _component: Component, _node: usize) -> Result<bool, String> {
            Ok(true)
        }
    }

    fn cluster(n: usize) -> ConnectionSet {
        let clients: Vec<Arc<dyn NodeClient>> =
            (0..n).map(|_| Arc::new(Healthy) as Arc<dyn NodeClient>).collect();
        ConnectionSet::from_clients(clients, Duration::from_secs(1))
    }

    fn schedule(targets: Targets) -> OutageSchedule {
        OutageSchedule {
            targets,
            offline_at: 4,
            outage_epochs: 2,
            recovery_epochs: 2,
            evaluate_during_outage: true,
        }
    }

    async fn drive(
        interceptor: &mut dyn ScenarioInterceptor,
        conns: &mut ConnectionSet,
        lifecycle: &dyn ProcessLifecycle,
        epochs: std::ops::RangeInclusive<Epoch>,
    ) -> Vec<(Epoch, InterceptOutcome, usize)> {
        let mut seen = Vec::new();
        for epoch in epochs {
            let mut control = ClusterControl::new(conns, lifecycle);
            let outcome = interceptor.intercept(&mut control, epoch).await.unwrap();
            seen.push((epoch, outcome, conns.available_count()));
        }
        seen
    }

    #[tokio::test]
    async fn test_all_nodes_offline_window() {
        let mut conns = cluster(4);
        let lifecycle = Recorder::default();
        let mut interceptor = AllNodesOffline::new(schedule(Targets::All));

        let seen = drive(&mut interceptor, &mut conns, &lifecycle, 3..=9).await;
        use InterceptOutcome::*;
        assert_eq!(
            seen,
            vec![
                (3, Proceed, 4),
                (4, SkipEvaluation, 0),
                (5, SkipEvaluation, 0),
                (6, SkipEvaluation, 4),
                (7, SkipEvaluation, 4),
                (8, Proceed, 4),
                (9, Proceed, 4),
            ]
        );
        let calls = lifecycle.calls.lock();
        assert_eq!(calls.iter().filter(|c| c.0 == "stop").count(), 8);
        assert_eq!(calls.iter().filter(|c| c.0 == "start").count(), 8);
        // beacon node comes back before its validator client
        let node0: Vec<_> = calls.iter().filter(|c| c.2 == 0 && c.0 == "start").collect();
        assert_eq!(node0[0].1, Component::BeaconNode);
        assert_eq!(node0[1].1, Component::ValidatorClient);
    }

    #[tokio::test]
    async fn test_partial_outage_keeps_evaluating_survivors() {
        let mut conns = cluster(3);
        let lifecycle = Recorder::default();
        let mut interceptor = AllNodesOffline::new(schedule(Targets::Nodes(vec![1])));

        let seen = drive(&mut interceptor, &mut conns, &lifecycle, 4..=5).await;
        assert_eq!(seen[0], (4, InterceptOutcome::Proceed, 2));
        assert!(!conns.is_available(1));
        assert_eq!(conns.get(1).map(|n| n.index()), Some(1));
    }

    #[tokio::test]
    async fn test_restore_twice_is_a_no_op() {
        let mut conns = cluster(2);
        let lifecycle = Recorder::default();
        let mut interceptor = AllNodesOffline::new(schedule(Targets::All));
        drive(&mut interceptor, &mut conns, &lifecycle, 4..=4).await;

        let mut control = ClusterControl::new(&mut conns, &lifecycle);
        interceptor.conclude(&mut control).await.unwrap();
        interceptor.conclude(&mut control).await.unwrap();
        assert!(!control.bring_online(0, CONSENSUS_COMPONENTS).await.unwrap());

        assert_eq!(conns.available_count(), 2);
        let starts = lifecycle
            .calls
            .lock()
            .iter()
            .filter(|c| c.0 == "start")
            .count();
        assert_eq!(starts, 4);
    }

    #[tokio::test]
    async fn test_failed_restart_is_an_interceptor_fault() {
        let mut conns = cluster(1);
        let lifecycle = Recorder {
            fail_start: true,
            ..Recorder::default()
        };
        let mut interceptor = AllNodesOffline::new(schedule(Targets::All));
        drive(&mut interceptor, &mut conns, &lifecycle, 4..=4).await;

        let mut control = ClusterControl::new(&mut conns, &lifecycle);
        let err = interceptor.intercept(&mut control, 6).await.unwrap_err();
        assert!(matches!(
            err,
            InterceptorError::Lifecycle {
                action: "start",
                node: 0,
                ..
            }
        ));
        assert!(!conns.is_available(0));
    }

    #[tokio::test]
    async fn test_unknown_target_is_rejected() {
        let mut conns = cluster(2);
        let lifecycle = Recorder::default();
        let mut interceptor = AllNodesOffline::new(schedule(Targets::Nodes(vec![5])));
        let mut control = ClusterControl::new(&mut conns, &lifecycle);
        assert!(matches!(
            interceptor.intercept(&mut control, 4).await,
            Err(InterceptorError::UnknownNode { node: 5 })
        ));
    }

    #[tokio::test]
    async fn test_ee_offline_keeps_consensus_available() {
        let mut conns = cluster(2);
        let lifecycle = Recorder::default();
        let mut interceptor = EeOffline::new(schedule(Targets::Nodes(vec![0])));

        let seen = drive(&mut interceptor, &mut conns, &lifecycle, 4..=8).await;
        assert!(seen.iter().all(|s| s.2 == 2));
        assert!(seen[..4].iter().all(|s| s.1.skips()));
        assert_eq!(seen[4].1, InterceptOutcome::Proceed);
        let calls = lifecycle.calls.lock();
        assert!(calls.iter().all(|c| c.1 == Component::ExecutionClient));
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test]
    async fn test_multi_scenario_hands_off_between_stages() {
        let mut conns = cluster(2);
        let lifecycle = Recorder::default();
        let first = AllNodesOffline::new(OutageSchedule {
            targets: Targets::Nodes(vec![0]),
            offline_at: 2,
            outage_epochs: 10,
            recovery_epochs: 0,
            evaluate_during_outage: true,
        });
        let second = EeOffline::new(OutageSchedule {
            targets: Targets::Nodes(vec![1]),
            offline_at: 5,
            outage_epochs: 1,
            recovery_epochs: 1,
            evaluate_during_outage: false,
        });
        let mut multi =
            MultiScenario::new(vec![Stage::new(5, 7, second), Stage::new(2, 3, first)]).unwrap();

        let seen = drive(&mut multi, &mut conns, &lifecycle, 1..=8).await;
        assert_eq!(seen[2], (3, InterceptOutcome::Proceed, 1));
        // node 0 was still down when the first stage ended; hand-off restored it
        assert_eq!(seen[3].2, 2);
        assert!(seen[4].1.skips());
        assert_eq!(seen[7].1, InterceptOutcome::Proceed);
        assert!(multi.active.is_none());
        assert!(conns.is_available(0));
    }

    #[test]
    fn test_overlapping_stages_rejected() {
        let a = AllNodesOffline::new(schedule(Targets::All));
        let b = AllNodesOffline::new(schedule(Targets::All));
        let err = MultiScenario::new(vec![Stage::new(2, 5, a), Stage::new(5, 8, b)])
            .err()
            .map(|e| e.to_string());
        assert!(err.unwrap().contains("overlap at epoch 5"));
    }
}
