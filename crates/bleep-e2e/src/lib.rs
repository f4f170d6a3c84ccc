//! Epoch-driven scenario runner for live BLEEP clusters.
//!
//! A [`ScenarioRunner`] follows the cluster's head epoch, lets an optional
//! [`ScenarioInterceptor`] change node availability at chosen epochs, and runs
//! a policy-gated [`EvaluatorSuite`] against the nodes on every tick. The
//! outcome of a run is a serializable [`RunReport`].

pub mod config;
pub mod connections;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod evaluators;
pub mod interceptor;
pub mod lifecycle;
pub mod policy;
pub mod report;
pub mod runner;
pub mod scenarios;

pub use config::{ConfigOption, E2EConfig, FailureMode, HarnessSettings, InterceptorPhase};
pub use connections::{ConnectionSet, NodeConnection, NodeSelection};
pub use context::EvaluationContext;
pub use error::{ConfigError, EvaluationError, InterceptorError, InvariantViolation, RunnerError};
pub use evaluator::{Evaluation, Evaluator, EvaluatorSuite};
pub use interceptor::{
    AllNodesOffline, ClusterControl, EeOffline, InterceptOutcome, MultiScenario, OutageSchedule,
    ScenarioInterceptor, Stage, Targets,
};
pub use lifecycle::{CommandLifecycle, CommandTemplates, Component, ProcessLifecycle};
pub use policy::{after_nth_epoch, all_epochs, onwards_nth_epoch, EvaluationPolicy};
pub use report::{Failure, FailureSource, RunReport, Verdict};
pub use runner::{RunState, ScenarioRunner};
pub use scenarios::{registry, Scenario};
