// Registered scenarios.
//
// Each scenario fixes its configuration, evaluator suite and interceptor when
// it is assembled; nothing is read from ambient state at run time.

use std::sync::Arc;

use crate::config::{ConfigOption, E2EConfig};
use crate::connections::ConnectionSet;
use crate::error::{ConfigError, InterceptorError};
use crate::evaluator::EvaluatorSuite;
use crate::evaluators::{
    checkpoints_agree_across_sources, finalization_occurs, new_finalized_checkpoint_occurs,
};
use crate::interceptor::{
    AllNodesOffline, EeOffline, MultiScenario, OutageSchedule, ScenarioInterceptor, Stage, Targets,
};
use crate::lifecycle::ProcessLifecycle;
use crate::runner::ScenarioRunner;

type SuiteBuilder = fn() -> EvaluatorSuite;
type InterceptorBuilder = fn() -> Result<Box<dyn ScenarioInterceptor>, InterceptorError>;

pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    /// Why the scenario is registered but not run.
    pub skip: Option<&'static str>,
    pub config: E2EConfig,
    suite: SuiteBuilder,
    interceptor: Option<InterceptorBuilder>,
}

impl Scenario {
    pub fn evaluators(&self) -> EvaluatorSuite {
        (self.suite)()
    }

    pub fn interceptor(&self) -> Result<Option<Box<dyn ScenarioInterceptor>>, InterceptorError> {
        self.interceptor.map(|build| build()).transpose()
    }

    /// Assemble a runner for this scenario against `conns`.
    pub fn runner(
        &self,
        config: E2EConfig,
        conns: ConnectionSet,
        lifecycle: Arc<dyn ProcessLifecycle>,
    ) -> Result<ScenarioRunner, ConfigError> {
        let mut runner = ScenarioRunner::new(self.name, config, conns, lifecycle)?
            .with_evaluators(self.evaluators());
        if let Some(interceptor) = self
            .interceptor()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?
        {
            runner = runner.with_interceptor(interceptor);
        }
        Ok(runner)
    }
}

/// Evaluators shared by the fault-injection scenarios.
pub fn scenario_evals() -> EvaluatorSuite {
    EvaluatorSuite::new().with(finalization_occurs(3))
}

fn offline_scenario_evals() -> EvaluatorSuite {
    scenario_evals().with(new_finalized_checkpoint_occurs(3))
}

fn rest_api_evals() -> EvaluatorSuite {
    scenario_evals().with(checkpoints_agree_across_sources(3))
}

fn all_nodes_offline() -> Result<Box<dyn ScenarioInterceptor>, InterceptorError> {
    Ok(Box::new(AllNodesOffline::new(OutageSchedule {
        targets: Targets::All,
        offline_at: 6,
        outage_epochs: 1,
        recovery_epochs: 2,
        evaluate_during_outage: false,
    })))
}

fn ee_offline() -> Result<Box<dyn ScenarioInterceptor>, InterceptorError> {
    Ok(Box::new(EeOffline::new(OutageSchedule {
        targets: Targets::All,
        offline_at: 6,
        outage_epochs: 1,
        recovery_epochs: 2,
        evaluate_during_outage: false,
    })))
}

/// Node 0 frozen on 9..=12, execution clients down on 16..=20.
fn multi_scenario() -> Result<Box<dyn ScenarioInterceptor>, InterceptorError> {
    let freeze = AllNodesOffline::new(OutageSchedule {
        targets: Targets::Nodes(vec![0]),
        offline_at: 9,
        outage_epochs: 1,
        recovery_epochs: 2,
        evaluate_during_outage: false,
    });
    let execution = EeOffline::new(OutageSchedule {
        targets: Targets::Nodes(vec![0]),
        offline_at: 16,
        outage_epochs: 1,
        recovery_epochs: 2,
        evaluate_during_outage: false,
    });
    Ok(Box::new(MultiScenario::new(vec![
        Stage::new(9, 12, freeze),
        Stage::new(16, 20, execution),
    ])?))
}

pub fn registry() -> Result<Vec<Scenario>, ConfigError> {
    Ok(vec![
        Scenario {
            name: "multi_scenario_run",
            description: "node freeze and execution client outage in one 24 epoch run",
            skip: None,
            config: E2EConfig::minimal([ConfigOption::Epochs(24)])?,
            suite: scenario_evals,
            interceptor: Some(multi_scenario),
        },
        Scenario {
            name: "minimal_config_web3signer",
            description: "minimal config with validators signing through a remote signer",
            skip: None,
            config: E2EConfig::minimal([ConfigOption::RemoteSigner])?,
            suite: scenario_evals,
            interceptor: None,
        },
        Scenario {
            name: "minimal_config_validator_rest_api",
            description: "checkpoint sync with validators on the beacon REST API",
            skip: None,
            config: E2EConfig::minimal([
                ConfigOption::CheckpointSync,
                ConfigOption::ValidatorRestApi,
            ])?,
            suite: rest_api_evals,
            interceptor: None,
        },
        Scenario {
            name: "scenario_run_ee_offline",
            description: "execution clients go offline and come back",
            skip: Some("beacon nodes cannot yet handle an offline execution client"),
            config: E2EConfig::minimal(Vec::<ConfigOption>::new())?,
            suite: scenario_evals,
            interceptor: Some(ee_offline),
        },
        Scenario {
            name: "scenario_run_all_nodes_go_offline",
            description: "every node goes offline at once and recovers",
            skip: None,
            config: E2EConfig::minimal([
                ConfigOption::Epochs(10),
                ConfigOption::BeaconNodeCount(4),
                ConfigOption::BeaconFlags(vec![
                    "--min-sync-peers=1".into(),
                    "--enable-crash-recovery".into(),
                ]),
            ])?,
            suite: offline_scenario_evals,
            interceptor: Some(all_nodes_offline),
        },
        Scenario {
            name: "scenario_run_single_node_goes_offline",
            description: "the only node goes offline and recovers",
            skip: None,
            config: E2EConfig::minimal([
                ConfigOption::Epochs(10),
                ConfigOption::BeaconNodeCount(1),
                ConfigOption::BeaconFlags(vec![
                    "--min-sync-peers=0".into(),
                    "--startup-unfinalized".into(),
                ]),
            ])?,
            suite: offline_scenario_evals,
            interceptor: Some(all_nodes_offline),
        },
    ])
}

pub fn find(name: &str) -> Result<Option<Scenario>, ConfigError> {
    Ok(registry()?.into_iter().find(|s| s.name == name))
}
