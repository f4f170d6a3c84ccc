// Scenario runner.
//
// Pending -> Running -> {Completed, Failed, TimedOut, Aborted}
//
// One driving loop per run. Each poll queries every available node, takes the
// reference node's head epoch (or the wall-clock epoch when the whole cluster
// is down) and processes every epoch not yet processed, in order: interceptor,
// then eligible evaluators in registration order. Terminal states are final.

use std::future::Future;
use std::sync::Arc;

use bleep_chain_reader::{Clock, Epoch, GenesisInfo, SystemClock};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{E2EConfig, FailureMode, InterceptorPhase};
use crate::connections::ConnectionSet;
use crate::context::EvaluationContext;
use crate::error::{ConfigError, RunnerError};
use crate::evaluator::EvaluatorSuite;
use crate::interceptor::{ClusterControl, InterceptOutcome, ScenarioInterceptor};
use crate::lifecycle::ProcessLifecycle;
use crate::report::{FailureSource, RunReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    /// Cancelled from outside the run.
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Pending | RunState::Running)
    }
}

enum Wake<T> {
    Ready(T),
    Cancelled,
    Deadline,
}

/// Await `fut` unless the run is cancelled or its deadline passes first.
/// Dropping `fut` cancels any query it has in flight.
async fn guarded<F: Future>(
    cancel: &CancellationToken,
    deadline: Instant,
    fut: F,
) -> Wake<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Wake::Cancelled,
        _ = sleep_until(deadline) => Wake::Deadline,
        out = fut => Wake::Ready(out),
    }
}

pub struct ScenarioRunner {
    name: String,
    config: E2EConfig,
    suite: EvaluatorSuite,
    interceptor: Option<Box<dyn ScenarioInterceptor>>,
    conns: ConnectionSet,
    lifecycle: Arc<dyn ProcessLifecycle>,
    ctx: EvaluationContext,
    cancel: CancellationToken,
    state: RunState,
    last_processed: Option<Epoch>,
    report: RunReport,
}

impl ScenarioRunner {
    pub fn new(
        name: impl Into<String>,
        config: E2EConfig,
        conns: ConnectionSet,
        lifecycle: Arc<dyn ProcessLifecycle>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let name = name.into();
        let ctx = EvaluationContext::new(config.epoch_clock, Arc::new(SystemClock));
        let report = RunReport::new(name.clone(), config.epochs);
        Ok(ScenarioRunner {
            name,
            config,
            suite: EvaluatorSuite::new(),
            interceptor: None,
            conns,
            lifecycle,
            ctx,
            cancel: CancellationToken::new(),
            state: RunState::Pending,
            last_processed: None,
            report,
        })
    }

    pub fn with_evaluators(mut self, suite: EvaluatorSuite) -> Self {
        self.suite = suite;
        self
    }

    pub fn with_interceptor(mut self, interceptor: Box<dyn ScenarioInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Clock used for wall-clock epochs, both by evaluators and by the
    /// runner's own fallback epoch source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ctx = EvaluationContext::new(self.config.epoch_clock, clock);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &E2EConfig {
        &self.config
    }

    /// Drive the scenario to a terminal state and return its report.
    pub async fn run(mut self) -> RunReport {
        let started = Instant::now();
        let deadline = started + self.config.run_timeout();
        info!(
            scenario = %self.name,
            epochs = self.config.epochs,
            evaluators = ?self.suite.names(),
            interceptor = self.interceptor.as_ref().map(|i| i.name()),
            "starting scenario"
        );

        let mut state = self.drive(started, deadline).await;
        if !self.teardown().await && state == RunState::Completed {
            state = RunState::Failed;
        }
        self.transition(state);
        self.report.finish(self.state);

        match self.state {
            RunState::Completed => info!(scenario = %self.name, "scenario completed"),
            state => error!(
                scenario = %self.name,
                ?state,
                failures = self.report.failures.len(),
                "scenario did not complete"
            ),
        }
        self.report
    }

    fn transition(&mut self, next: RunState) {
        if self.state.is_terminal() {
            warn!(from = ?self.state, to = ?next, "ignoring transition out of terminal state");
            return;
        }
        debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
    }

    async fn drive(&mut self, started: Instant, deadline: Instant) -> RunState {
        let cancel = self.cancel.clone();

        let required = self.config.beacon_node_count.max(1);
        if self.conns.len() < required {
            let err = RunnerError::InsufficientNodes {
                required,
                available: self.conns.len(),
            };
            self.report
                .record_failure(FailureSource::Runner, None, err.to_string());
            return RunState::Failed;
        }

        let genesis = match guarded(&cancel, deadline, self.fetch_genesis()).await {
            Wake::Ready(genesis) => genesis,
            Wake::Cancelled => return RunState::Aborted,
            Wake::Deadline => {
                let err = RunnerError::GenesisUnavailable(format!(
                    "no node answered within {:?}",
                    self.config.run_timeout()
                ));
                self.report
                    .record_failure(FailureSource::Runner, None, err.to_string());
                return RunState::TimedOut;
            }
        };
        info!(genesis_time = genesis.genesis_time_unix_seconds, "genesis retrieved");
        self.ctx.set_genesis(genesis);
        self.transition(RunState::Running);
        self.report.state = RunState::Running;

        let target = self.config.epochs;
        loop {
            let observed = match guarded(&cancel, deadline, self.observe_epoch()).await {
                Wake::Ready(observed) => observed,
                Wake::Cancelled => return RunState::Aborted,
                Wake::Deadline => return self.timed_out(started),
            };

            if let Some(observed) = observed {
                let first = self.last_processed.map_or(observed, |e| e.saturating_add(1));
                if first <= observed {
                    let last = observed.min(target).max(first);
                    for epoch in first..=last {
                        let tick = guarded(&cancel, deadline, self.process_tick(epoch)).await;
                        let halt = match tick {
                            Wake::Ready(halt) => halt,
                            Wake::Cancelled => return RunState::Aborted,
                            Wake::Deadline => return self.timed_out(started),
                        };
                        self.last_processed = Some(epoch);
                        if let Some(state) = halt {
                            return state;
                        }
                        if epoch >= target {
                            return RunState::Completed;
                        }
                    }
                }
            }

            match guarded(&cancel, deadline, sleep(self.config.poll_interval())).await {
                Wake::Ready(()) => {}
                Wake::Cancelled => return RunState::Aborted,
                Wake::Deadline => return self.timed_out(started),
            }
        }
    }

    fn timed_out(&mut self, started: Instant) -> RunState {
        let err = RunnerError::TimedOut {
            reached: self.last_processed.unwrap_or(0),
            target: self.config.epochs,
            elapsed_secs: started.elapsed().as_secs(),
        };
        error!(scenario = %self.name, "{}", err);
        self.report
            .record_failure(FailureSource::Runner, self.last_processed, err.to_string());
        RunState::TimedOut
    }

    /// Reference node first, then any other available node; retried every
    /// poll interval until one answers.
    async fn fetch_genesis(&mut self) -> GenesisInfo {
        loop {
            let mut order: Vec<usize> = self.conns.available().map(|n| n.index()).collect();
            order.sort_by_key(|&i| i != self.config.reference_node);
            for index in order {
                let Some(node) = self.conns.get(index) else {
                    continue;
                };
                match node.reader().genesis().await {
                    Ok(genesis) => return genesis,
                    Err(err) => {
                        warn!(node = index, %err, "genesis not available yet");
                        self.report.note_transport(None, index, err.to_string());
                    }
                }
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    /// Current epoch of the cluster, or `None` when no node answered.
    ///
    /// Nodes that fail to answer are noted and excluded for this poll only.
    async fn observe_epoch(&mut self) -> Option<Epoch> {
        if self.conns.available_count() == 0 {
            let epoch = self.ctx.wall_clock_epoch()?;
            debug!(epoch, "no node available, using wall clock epoch");
            return Some(epoch);
        }

        let mut reference = None;
        let mut fallback = None;
        for (index, result) in self.conns.query_heads().await {
            match result {
                Ok(head) if index == self.config.reference_node => reference = Some(head.head_epoch),
                Ok(head) => {
                    fallback.get_or_insert(head.head_epoch);
                }
                Err(err) => {
                    warn!(node = index, %err, "head query failed");
                    self.report
                        .note_transport(self.last_processed, index, err.to_string());
                }
            }
        }
        reference.or(fallback)
    }

    /// Process one epoch. Returns the terminal state when the run must stop.
    async fn process_tick(&mut self, epoch: Epoch) -> Option<RunState> {
        info!(scenario = %self.name, epoch, "processing epoch");
        self.ctx.set_epoch(epoch);
        self.report.epochs_processed.push(epoch);

        let mut outcome = InterceptOutcome::Proceed;
        if self.config.interceptor_phase == InterceptorPhase::BeforeEvaluation {
            outcome = match self.intercept(epoch).await {
                Ok(outcome) => outcome,
                Err(state) => return Some(state),
            };
        }

        if outcome.skips() {
            info!(epoch, "evaluation skipped by interceptor");
            self.report.skipped_epochs.push(epoch);
        } else {
            for evaluator in self.suite.eligible(epoch) {
                let result = evaluator.evaluate(&mut self.ctx, &self.conns).await;
                for (node, message) in self.ctx.take_unreachable() {
                    self.report.note_transport(Some(epoch), node, message);
                }
                match result {
                    Ok(()) => {
                        debug!(epoch, evaluator = evaluator.name(), "passed");
                        self.report.record_pass(epoch, evaluator.name());
                    }
                    Err(err) => {
                        if err.is_invariant_violation() {
                            error!(epoch, evaluator = evaluator.name(), %err, "invariant violated");
                        } else {
                            error!(epoch, evaluator = evaluator.name(), %err, "evaluation failed");
                        }
                        self.report
                            .record_evaluation_failure(epoch, evaluator.name(), &err);
                        if self.config.failure_mode == FailureMode::Fatal {
                            return Some(RunState::Failed);
                        }
                    }
                }
            }
        }

        if self.config.interceptor_phase == InterceptorPhase::AfterEvaluation {
            if let Err(state) = self.intercept(epoch).await {
                return Some(state);
            }
        }
        None
    }

    /// Interceptor faults end the run whatever the failure mode.
    async fn intercept(&mut self, epoch: Epoch) -> Result<InterceptOutcome, RunState> {
        let Some(interceptor) = self.interceptor.as_mut() else {
            return Ok(InterceptOutcome::Proceed);
        };
        let mut control = ClusterControl::new(&mut self.conns, self.lifecycle.as_ref());
        match interceptor.intercept(&mut control, epoch).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(epoch, interceptor = interceptor.name(), %err, "interceptor fault");
                self.report.record_failure(
                    FailureSource::Interceptor(interceptor.name().to_string()),
                    Some(epoch),
                    err.to_string(),
                );
                Err(RunState::Failed)
            }
        }
    }

    /// Undo outstanding interceptor mutations, whatever the final state.
    /// Bounded by the teardown timeout; returns false when the cluster could
    /// not be restored in time.
    async fn teardown(&mut self) -> bool {
        let Some(interceptor) = self.interceptor.as_mut() else {
            return true;
        };
        let limit = self.config.teardown_timeout();
        let mut control = ClusterControl::new(&mut self.conns, self.lifecycle.as_ref());
        let failure = match timeout(limit, interceptor.conclude(&mut control)).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!("cluster was not restored within {:?}", limit)),
        };
        if let Some(message) = &failure {
            error!(interceptor = interceptor.name(), %message, "could not restore cluster");
            self.report.record_failure(
                FailureSource::Interceptor(interceptor.name().to_string()),
                self.last_processed,
                message.clone(),
            );
        }
        interceptor.reset();
        failure.is_none()
    }
}
