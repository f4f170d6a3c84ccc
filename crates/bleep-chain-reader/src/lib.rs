//! Chain state reader for BLEEP end-to-end runs.
//!
//! Queries a single beacon node through two independent channels, the RPC
//! gateway's chain-head summary and the `/eth/v1` HTTP API, and normalizes
//! both into [`ChainHeadSnapshot`], [`GenesisInfo`] and
//! [`FinalityCheckpoints`].

pub mod client;
pub mod clock;
pub mod endpoints;
pub mod error;
pub mod reader;
pub mod types;

pub use client::{GatewayNodeClient, NodeClient};
pub use clock::{Clock, FixedClock, SystemClock};
pub use endpoints::{BeaconNodeType, NodeEndpoints, Ports};
pub use error::ReadError;
pub use reader::{reconcile, ChainStateReader, Divergence};
pub use types::{ChainHeadSnapshot, Epoch, EpochClock, FinalityCheckpoints, GenesisInfo, Slot};
