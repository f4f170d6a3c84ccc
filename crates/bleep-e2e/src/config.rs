// Run configuration.
//
// One `E2EConfig` is built per scenario run and owned by its runner. Options
// are applied once, when the suite is assembled.

use std::collections::HashMap;
use std::time::Duration;

use bleep_chain_reader::{BeaconNodeType, Epoch, EpochClock, Ports};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lifecycle::{CommandTemplates, Component};

/// Recognized scenario options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigOption {
    Epochs(Epoch),
    BeaconNodeCount(usize),
    /// Extra flags appended to every beacon node's command line.
    BeaconFlags(Vec<String>),
    /// Validators sign through a remote signer.
    RemoteSigner,
    /// Late nodes start from a finalized checkpoint instead of genesis.
    CheckpointSync,
    /// Validator clients talk to beacon nodes over the REST API.
    ValidatorRestApi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// The first failure ends the run.
    #[default]
    Fatal,
    /// Evaluation failures are recorded and the run continues.
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterceptorPhase {
    #[default]
    BeforeEvaluation,
    AfterEvaluation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct E2EConfig {
    /// Target epoch; the run completes once this epoch has been processed.
    pub epochs: Epoch,
    pub beacon_node_count: usize,
    pub beacon_flags: Vec<String>,
    pub remote_signer: bool,
    pub checkpoint_sync: bool,
    pub validator_rest_api: bool,

    pub host: String,
    pub ports: Ports,
    pub node_type: BeaconNodeType,
    pub epoch_clock: EpochClock,
    /// Index of the node whose head drives the epoch counter.
    pub reference_node: usize,

    pub poll_interval_ms: u64,
    pub query_timeout_ms: u64,
    /// Wall-clock ceiling of the whole run. Derived from the epoch clock
    /// when unset.
    pub run_timeout_secs: Option<u64>,
    /// Ceiling on restoring the cluster once the run has ended.
    pub teardown_timeout_secs: u64,

    pub failure_mode: FailureMode,
    pub interceptor_phase: InterceptorPhase,
}

impl Default for E2EConfig {
    fn default() -> Self {
        E2EConfig {
            epochs: 10,
            beacon_node_count: 2,
            beacon_flags: Vec::new(),
            remote_signer: false,
            checkpoint_sync: false,
            validator_rest_api: false,
            host: "127.0.0.1".to_string(),
            ports: Ports::default(),
            node_type: BeaconNodeType::default(),
            epoch_clock: EpochClock::MINIMAL,
            reference_node: 0,
            poll_interval_ms: 1_000,
            query_timeout_ms: 5_000,
            run_timeout_secs: None,
            teardown_timeout_secs: 120,
            failure_mode: FailureMode::default(),
            interceptor_phase: InterceptorPhase::default(),
        }
    }
}

impl E2EConfig {
    /// Minimal-preset configuration with `options` applied in order.
    pub fn minimal(options: impl IntoIterator<Item = ConfigOption>) -> Result<Self, ConfigError> {
        let mut config = E2EConfig::default();
        for option in options {
            config.apply(option);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, option: ConfigOption) {
        match option {
            ConfigOption::Epochs(n) => self.epochs = n,
            ConfigOption::BeaconNodeCount(n) => self.beacon_node_count = n,
            ConfigOption::BeaconFlags(flags) => self.beacon_flags.extend(flags),
            ConfigOption::RemoteSigner => self.remote_signer = true,
            ConfigOption::CheckpointSync => self.checkpoint_sync = true,
            ConfigOption::ValidatorRestApi => self.validator_rest_api = true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epochs == 0 {
            return Err(ConfigError::Invalid("epochs must be greater than zero".into()));
        }
        if self.beacon_node_count == 0 {
            return Err(ConfigError::Invalid(
                "beacon_node_count must be greater than zero".into(),
            ));
        }
        if self.reference_node >= self.beacon_node_count {
            return Err(ConfigError::Invalid(format!(
                "reference_node {} is outside a cluster of {} nodes",
                self.reference_node, self.beacon_node_count
            )));
        }
        if self.poll_interval_ms == 0 || self.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms and query_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.run_timeout_secs == Some(0) || self.teardown_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "run_timeout_secs and teardown_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }

    /// Explicit ceiling, or twice the nominal duration of the run plus four
    /// epochs of startup slack.
    pub fn run_timeout(&self) -> Duration {
        match self.run_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => {
                let epochs = self.epochs.saturating_add(4).saturating_mul(2);
                Duration::from_secs(epochs.saturating_mul(self.epoch_clock.epoch_duration_secs()))
            }
        }
    }
}

/// Operator overrides loaded by the harness binary. Every field is optional;
/// unset fields leave the scenario's configuration untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    pub host: Option<String>,
    pub prysm_gateway_port: Option<u16>,
    pub lighthouse_http_port: Option<u16>,
    pub node_type: Option<BeaconNodeType>,
    pub seconds_per_slot: Option<u64>,
    pub slots_per_epoch: Option<u64>,
    pub reference_node: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub query_timeout_ms: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    pub teardown_timeout_secs: Option<u64>,
    /// Ceiling on each process control command.
    pub command_timeout_secs: Option<u64>,
    pub failure_mode: Option<FailureMode>,
    pub interceptor_phase: Option<InterceptorPhase>,
    /// Process control commands, keyed by component.
    pub lifecycle: HashMap<Component, CommandTemplates>,
}

impl HarnessSettings {
    pub fn apply_to(&self, config: &mut E2EConfig) -> Result<(), ConfigError> {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.prysm_gateway_port {
            config.ports.prysm_gateway_port = port;
        }
        if let Some(port) = self.lighthouse_http_port {
            config.ports.lighthouse_http_port = port;
        }
        if let Some(node_type) = self.node_type {
            config.node_type = node_type;
        }
        if self.seconds_per_slot.is_some() || self.slots_per_epoch.is_some() {
            config.epoch_clock = EpochClock::new(
                self.seconds_per_slot
                    .unwrap_or(config.epoch_clock.seconds_per_slot()),
                self.slots_per_epoch
                    .unwrap_or(config.epoch_clock.slots_per_epoch()),
            )
            .map_err(ConfigError::Invalid)?;
        }
        if let Some(index) = self.reference_node {
            config.reference_node = index;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(ms) = self.query_timeout_ms {
            config.query_timeout_ms = ms;
        }
        if self.run_timeout_secs.is_some() {
            config.run_timeout_secs = self.run_timeout_secs;
        }
        if let Some(secs) = self.teardown_timeout_secs {
            config.teardown_timeout_secs = secs;
        }
        if let Some(mode) = self.failure_mode {
            config.failure_mode = mode;
        }
        if let Some(phase) = self.interceptor_phase {
            config.interceptor_phase = phase;
        }
        config.validate()
    }
}
