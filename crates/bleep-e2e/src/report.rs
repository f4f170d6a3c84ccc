// Structured run report.
//
// Every evaluator invocation and every error seen during a run ends up here.
// The report is the only output of a run consumed by CI.

use bleep_chain_reader::Epoch;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{EvaluationError, InvariantViolation};
use crate::runner::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
}

/// One evaluator invocation.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRecord {
    pub epoch: Epoch,
    pub evaluator: String,
    pub outcome: Outcome,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum FailureSource {
    Evaluator(String),
    Interceptor(String),
    Runner,
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub source: FailureSource,
    pub epoch: Option<Epoch>,
    pub message: String,
    /// Expected/observed values when the failure is an invariant violation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<InvariantViolation>,
    pub at: DateTime<Utc>,
}

/// A recovered transport error, e.g. a node that did not answer the epoch poll.
#[derive(Debug, Clone, Serialize)]
pub struct TransportNote {
    pub epoch: Option<Epoch>,
    pub node: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub state: RunState,
    pub target_epoch: Epoch,
    pub epochs_processed: Vec<Epoch>,
    pub skipped_epochs: Vec<Epoch>,
    pub evaluations: Vec<EvaluationRecord>,
    pub failures: Vec<Failure>,
    pub transport_errors: Vec<TransportNote>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(scenario: impl Into<String>, target_epoch: Epoch) -> Self {
        RunReport {
            scenario: scenario.into(),
            state: RunState::Pending,
            target_epoch,
            epochs_processed: Vec::new(),
            skipped_epochs: Vec::new(),
            evaluations: Vec::new(),
            failures: Vec::new(),
            transport_errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn verdict(&self) -> Verdict {
        if self.state == RunState::Completed && self.failures.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict() == Verdict::Pass
    }

    pub(crate) fn record_pass(&mut self, epoch: Epoch, evaluator: &str) {
        self.evaluations.push(EvaluationRecord {
            epoch,
            evaluator: evaluator.to_string(),
            outcome: Outcome::Passed,
            at: Utc::now(),
        });
    }

    pub(crate) fn record_evaluation_failure(
        &mut self,
        epoch: Epoch,
        evaluator: &str,
        err: &EvaluationError,
    ) {
        self.evaluations.push(EvaluationRecord {
            epoch,
            evaluator: evaluator.to_string(),
            outcome: Outcome::Failed,
            at: Utc::now(),
        });
        let violation = match err {
            EvaluationError::Invariant(v) => Some(v.clone()),
            _ => None,
        };
        self.failures.push(Failure {
            source: FailureSource::Evaluator(evaluator.to_string()),
            epoch: Some(epoch),
            message: err.to_string(),
            violation,
            at: Utc::now(),
        });
    }

    pub(crate) fn record_failure(
        &mut self,
        source: FailureSource,
        epoch: Option<Epoch>,
        message: impl Into<String>,
    ) {
        self.failures.push(Failure {
            source,
            epoch,
            message: message.into(),
            violation: None,
            at: Utc::now(),
        });
    }

    pub(crate) fn note_transport(&mut self, epoch: Option<Epoch>, node: usize, message: String) {
        self.transport_errors.push(TransportNote {
            epoch,
            node,
            message,
        });
    }

    pub(crate) fn finish(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    /// Invocations of `evaluator`, in order.
    pub fn invocations_of<'a>(
        &'a self,
        evaluator: &'a str,
    ) -> impl Iterator<Item = &'a EvaluationRecord> + 'a {
        self.evaluations
            .iter()
            .filter(move |r| r.evaluator == evaluator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_needs_completion_and_no_failures() {
        let mut report = RunReport::new("s", 4);
        assert_eq!(report.verdict(), Verdict::Fail);

        report.finish(RunState::Completed);
        assert!(report.passed());

        report.record_failure(FailureSource::Runner, None, "late failure");
        assert_eq!(report.verdict(), Verdict::Fail);
    }

    #[test]
    fn test_violation_is_kept_in_report() {
        let mut report = RunReport::new("s", 4);
        let err = EvaluationError::from(InvariantViolation {
            node: 0,
            check: "finalized_lags_head_by_two",
            expected: "3".into(),
            observed: "2".into(),
            detail: "expected finalized epoch to be 3, received: 2".into(),
        });
        report.record_evaluation_failure(5, "finalizes_at_epoch_3", &err);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failures"][0]["source"]["kind"], "evaluator");
        assert_eq!(json["failures"][0]["source"]["name"], "finalizes_at_epoch_3");
        assert_eq!(json["failures"][0]["violation"]["expected"], "3");
        assert_eq!(json["evaluations"][0]["outcome"], "failed");
        assert_eq!(json["state"], "pending");
    }
}
