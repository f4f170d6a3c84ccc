// Chain state observed from a single beacon node.
//
// Every value here is a point-in-time observation. Nothing in this module
// decides whether an observation is healthy; that is the evaluators' job.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// A fixed-duration span of consensus time.
pub type Epoch = u64;

/// Slot number within the chain.
pub type Slot = u64;

/// Normalized chain-head summary, as reported by one node's RPC channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHeadSnapshot {
    pub head_epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub justified_epoch: Epoch,
    pub previous_justified_epoch: Epoch,

    /// Diagnostic only, not every node reports it.
    pub head_slot: Option<Slot>,
    pub finalized_slot: Option<Slot>,
}

impl ChainHeadSnapshot {
    pub fn new(
        head_epoch: Epoch,
        finalized_epoch: Epoch,
        justified_epoch: Epoch,
        previous_justified_epoch: Epoch,
    ) -> Self {
        ChainHeadSnapshot {
            head_epoch,
            finalized_epoch,
            justified_epoch,
            previous_justified_epoch,
            head_slot: None,
            finalized_slot: None,
        }
    }

    /// Snapshot of a cluster finalizing on every epoch with head at `head_epoch`.
    ///
    /// Returns `None` while the head is too young to have a finalized checkpoint.
    pub fn healthy_at(head_epoch: Epoch) -> Option<Self> {
        let finalized = head_epoch.checked_sub(2)?;
        Some(ChainHeadSnapshot::new(
            head_epoch,
            finalized,
            head_epoch - 1,
            finalized,
        ))
    }
}

/// Genesis data from the HTTP channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisInfo {
    pub genesis_time_unix_seconds: i64,
    pub genesis_validators_root: Option<String>,
}

impl GenesisInfo {
    pub fn at(genesis_time_unix_seconds: i64) -> Self {
        GenesisInfo {
            genesis_time_unix_seconds,
            genesis_validators_root: None,
        }
    }
}

/// Finality checkpoints as exposed by the HTTP channel for the head state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityCheckpoints {
    pub previous_justified_epoch: Epoch,
    pub current_justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
}

/// Slot timing used to turn wall-clock time into epochs.
///
/// Both values are non-zero; the only ways in are `new` and deserialization,
/// which goes through `new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SlotTiming")]
pub struct EpochClock {
    seconds_per_slot: u64,
    slots_per_epoch: u64,
}

#[derive(Deserialize)]
struct SlotTiming {
    seconds_per_slot: u64,
    slots_per_epoch: u64,
}

impl TryFrom<SlotTiming> for EpochClock {
    type Error = String;

    fn try_from(t: SlotTiming) -> Result<Self, Self::Error> {
        EpochClock::new(t.seconds_per_slot, t.slots_per_epoch)
    }
}

impl EpochClock {
    /// 12s slots, 32 slots per epoch.
    pub const MAINNET: EpochClock = EpochClock {
        seconds_per_slot: 12,
        slots_per_epoch: 32,
    };

    /// 6s slots, 8 slots per epoch.
    pub const MINIMAL: EpochClock = EpochClock {
        seconds_per_slot: 6,
        slots_per_epoch: 8,
    };

    pub fn new(seconds_per_slot: u64, slots_per_epoch: u64) -> Result<Self, String> {
        if seconds_per_slot == 0 {
            return Err("seconds_per_slot must be > 0".to_string());
        }
        if slots_per_epoch == 0 {
            return Err("slots_per_epoch must be > 0".to_string());
        }
        Ok(EpochClock {
            seconds_per_slot,
            slots_per_epoch,
        })
    }

    pub fn seconds_per_slot(&self) -> u64 {
        self.seconds_per_slot
    }

    pub fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }

    pub fn epoch_duration_secs(&self) -> u64 {
        self.seconds_per_slot.saturating_mul(self.slots_per_epoch)
    }

    /// Whole epochs elapsed between genesis and `now` (both unix seconds).
    ///
    /// Zero while `now` precedes genesis.
    pub fn epochs_since_genesis(&self, genesis_time: i64, now: i64) -> Epoch {
        if now <= genesis_time {
            return 0;
        }
        now.abs_diff(genesis_time) / self.epoch_duration_secs().max(1)
    }

    /// Epoch derived from `genesis` and the current time of `clock`,
    /// independent of what any node reports as its head.
    pub fn wall_clock_epoch(&self, genesis: &GenesisInfo, clock: &dyn Clock) -> Epoch {
        self.epochs_since_genesis(genesis.genesis_time_unix_seconds, clock.now_unix())
    }
}

impl Default for EpochClock {
    fn default() -> Self {
        EpochClock::MINIMAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use proptest::prelude::*;

    #[test]
    fn test_epoch_duration() {
        assert_eq!(EpochClock::MAINNET.epoch_duration_secs(), 384);
        assert_eq!(EpochClock::MINIMAL.epoch_duration_secs(), 48);
    }

    #[test]
    fn test_epochs_since_genesis_mainnet() {
        let clock = EpochClock::MAINNET;
        assert_eq!(clock.epochs_since_genesis(0, 1920), 5);
        assert_eq!(clock.epochs_since_genesis(0, 1919), 4);
        assert_eq!(clock.epochs_since_genesis(1_000, 1_000 + 5 * 384), 5);
    }

    #[test]
    fn test_before_genesis_is_epoch_zero() {
        let clock = EpochClock::MINIMAL;
        assert_eq!(clock.epochs_since_genesis(500, 100), 0);
        assert_eq!(clock.epochs_since_genesis(500, 500), 0);
    }

    #[test]
    fn test_zero_timing_rejected() {
        assert!(EpochClock::new(0, 8).is_err());
        assert!(EpochClock::new(6, 0).is_err());
        assert_eq!(EpochClock::new(6, 8).unwrap(), EpochClock::MINIMAL);
    }

    #[test]
    fn test_zero_timing_rejected_on_deserialize() {
        let err = serde_json::from_str::<EpochClock>(r#"{"seconds_per_slot":0,"slots_per_epoch":8}"#)
            .unwrap_err();
        assert!(err.to_string().contains("seconds_per_slot must be > 0"));
        let clock: EpochClock =
            serde_json::from_str(r#"{"seconds_per_slot":12,"slots_per_epoch":32}"#).unwrap();
        assert_eq!(clock, EpochClock::MAINNET);
    }

    #[test]
    fn test_wall_clock_epoch() {
        let clock = FixedClock::new(1920);
        let genesis = GenesisInfo::at(0);
        assert_eq!(EpochClock::MAINNET.wall_clock_epoch(&genesis, &clock), 5);
        clock.advance(-1);
        assert_eq!(EpochClock::MAINNET.wall_clock_epoch(&genesis, &clock), 4);
    }

    #[test]
    fn test_healthy_requires_two_epochs() {
        assert!(ChainHeadSnapshot::healthy_at(0).is_none());
        assert!(ChainHeadSnapshot::healthy_at(1).is_none());
        let snap = ChainHeadSnapshot::healthy_at(2).unwrap();
        assert_eq!(snap.finalized_epoch, 0);
        assert_eq!(snap.justified_epoch, 1);
    }

    proptest! {
        #[test]
        fn prop_healthy_snapshot_arithmetic(head in 2u64..1_000_000) {
            let snap = ChainHeadSnapshot::healthy_at(head).unwrap();
            prop_assert_eq!(snap.finalized_epoch, snap.head_epoch - 2);
            prop_assert_eq!(snap.justified_epoch, snap.head_epoch - 1);
            prop_assert_eq!(snap.previous_justified_epoch + 1, snap.justified_epoch);
        }

        #[test]
        fn prop_epoch_boundaries(epoch in 0u64..100_000, genesis in 0i64..2_000_000_000) {
            let clock = EpochClock::MINIMAL;
            let start = genesis + (epoch * clock.epoch_duration_secs()) as i64;
            prop_assert_eq!(clock.epochs_since_genesis(genesis, start + 1), epoch);
            prop_assert_eq!(clock.epochs_since_genesis(genesis, start + 47), epoch);
        }
    }
}
