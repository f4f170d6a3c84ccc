use std::collections::HashMap;
use std::sync::Arc;

use bleep_chain_reader::{Clock, Epoch, EpochClock, GenesisInfo, ReadError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::EvaluationError;

/// Scratch space shared by the evaluators of one run.
///
/// Created when the run starts and dropped with it; never shared between
/// runs. Evaluators may record observations here and read them back on a
/// later tick.
pub struct EvaluationContext {
    clock: Arc<dyn Clock>,
    epoch_clock: EpochClock,
    genesis: Option<GenesisInfo>,
    epoch: Epoch,
    observed: HashMap<String, Value>,
    unreachable: Vec<(usize, String)>,
}

impl EvaluationContext {
    pub fn new(epoch_clock: EpochClock, clock: Arc<dyn Clock>) -> Self {
        EvaluationContext {
            clock,
            epoch_clock,
            genesis: None,
            epoch: 0,
            observed: HashMap::new(),
            unreachable: Vec::new(),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn epoch_clock(&self) -> &EpochClock {
        &self.epoch_clock
    }

    /// Genesis retrieved by the runner before the epoch loop started.
    pub fn genesis(&self) -> Option<&GenesisInfo> {
        self.genesis.as_ref()
    }

    pub fn set_genesis(&mut self, genesis: GenesisInfo) {
        self.genesis = Some(genesis);
    }

    /// Epoch the cluster should be at by now, `None` before genesis is known.
    pub fn wall_clock_epoch(&self) -> Option<Epoch> {
        let genesis = self.genesis.as_ref()?;
        Some(self.epoch_clock.wall_clock_epoch(genesis, self.clock.as_ref()))
    }

    /// Tick currently being evaluated. Only the runner moves it.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub(crate) fn set_epoch(&mut self, epoch: Epoch) {
        self.epoch = epoch;
    }

    pub fn record<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), EvaluationError> {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(v) => {
                self.observed.insert(key, v);
                Ok(())
            }
            Err(source) => Err(EvaluationError::Scratch { key, source }),
        }
    }

    pub fn recall<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.observed
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Note a node that could not be reached while another one answered in
    /// its place.
    pub fn note_unreachable(&mut self, node: usize, err: &ReadError) {
        self.unreachable.push((node, err.to_string()));
    }

    pub(crate) fn take_unreachable(&mut self) -> Vec<(usize, String)> {
        std::mem::take(&mut self.unreachable)
    }
}
