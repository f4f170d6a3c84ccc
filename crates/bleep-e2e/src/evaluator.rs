// Evaluators and suites.
//
// An evaluator is a named, policy-gated observation over the cluster. It must
// be safe to call on every eligible tick and must never change cluster state.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bleep_chain_reader::Epoch;

use crate::connections::ConnectionSet;
use crate::context::EvaluationContext;
use crate::error::EvaluationError;
use crate::policy::EvaluationPolicy;

#[async_trait]
pub trait Evaluation: Send + Sync {
    async fn evaluate(
        &self,
        ctx: &mut EvaluationContext,
        conns: &ConnectionSet,
    ) -> Result<(), EvaluationError>;
}

/// Immutable once built; the name is fixed at construction.
#[derive(Clone)]
pub struct Evaluator {
    name: String,
    policy: EvaluationPolicy,
    evaluation: Arc<dyn Evaluation>,
}

impl Evaluator {
    pub fn new<E>(name: impl Into<String>, policy: EvaluationPolicy, evaluation: E) -> Self
    where
        E: Evaluation + 'static,
    {
        Evaluator {
            name: name.into(),
            policy,
            evaluation: Arc::new(evaluation),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> EvaluationPolicy {
        self.policy
    }

    pub fn should_run(&self, epoch: Epoch) -> bool {
        self.policy.should_run(epoch)
    }

    pub async fn evaluate(
        &self,
        ctx: &mut EvaluationContext,
        conns: &ConnectionSet,
    ) -> Result<(), EvaluationError> {
        self.evaluation.evaluate(ctx, conns).await
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Ordered evaluators of one scenario. Registration order is run order.
#[derive(Debug, Clone, Default)]
pub struct EvaluatorSuite {
    evaluators: Vec<Evaluator>,
}

impl EvaluatorSuite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, evaluator: Evaluator) -> Self {
        self.push(evaluator);
        self
    }

    pub fn push(&mut self, evaluator: Evaluator) {
        self.evaluators.push(evaluator);
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Evaluator> {
        self.evaluators.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.evaluators.iter().map(|e| e.name()).collect()
    }

    /// Evaluators eligible on `epoch`, in registration order.
    pub fn eligible(&self, epoch: Epoch) -> impl Iterator<Item = &Evaluator> {
        self.evaluators.iter().filter(move |e| e.should_run(epoch))
    }
}

impl Extend<Evaluator> for EvaluatorSuite {
    fn extend<T: IntoIterator<Item = Evaluator>>(&mut self, iter: T) {
        self.evaluators.extend(iter);
    }
}

impl FromIterator<Evaluator> for EvaluatorSuite {
    fn from_iter<T: IntoIterator<Item = Evaluator>>(iter: T) -> Self {
        EvaluatorSuite {
            evaluators: iter.into_iter().collect(),
        }
    }
}
