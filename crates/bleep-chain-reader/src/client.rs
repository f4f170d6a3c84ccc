// Node channels.
//
// The RPC channel is the chain-head summary served by the node's RPC gateway
// (`/eth/v1alpha1/beacon/chainhead`). The HTTP channel is the standard
// `/eth/v1` beacon API. Both are read-only.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::endpoints::NodeEndpoints;
use crate::error::ReadError;
use crate::types::{ChainHeadSnapshot, FinalityCheckpoints, GenesisInfo};

/// Read access to one node. Implementations must not mutate node state.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Chain-head summary over the RPC channel.
    async fn chain_head(&self) -> Result<ChainHeadSnapshot, ReadError>;

    /// Genesis data over the HTTP channel.
    async fn genesis(&self) -> Result<GenesisInfo, ReadError>;

    /// Head-state finality checkpoints over the HTTP channel.
    async fn finality_checkpoints(&self) -> Result<FinalityCheckpoints, ReadError>;
}

/// `NodeClient` over the node's RPC gateway and HTTP API.
#[derive(Clone)]
pub struct GatewayNodeClient {
    endpoints: NodeEndpoints,
    http: Client,
    timeout: Duration,
}

impl GatewayNodeClient {
    pub fn new(endpoints: NodeEndpoints, timeout: Duration) -> Result<Self, ReadError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReadError::Connection {
                url: endpoints.rpc_base.clone(),
                reason: e.to_string(),
            })?;
        Ok(GatewayNodeClient {
            endpoints,
            http,
            timeout,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ReadError> {
        debug!(url, "GET");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ReadError::from_reqwest(url, e, self.timeout))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = match resp.text().await {
                // Keep JSON bodies compact, fall back to raw text.
                Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => value.to_string(),
                    Err(_) => text,
                },
                Err(e) => format!("<unreadable body: {}>", e),
            };
            return Err(ReadError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ReadError::from_reqwest(url, e, self.timeout))?;
        serde_json::from_slice(&bytes).map_err(|e| ReadError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl NodeClient for GatewayNodeClient {
    async fn chain_head(&self) -> Result<ChainHeadSnapshot, ReadError> {
        let url = format!("{}/beacon/chainhead", self.endpoints.rpc_base);
        let head: ChainHeadResponse = self.get_json(&url).await?;
        Ok(head.into())
    }

    async fn genesis(&self) -> Result<GenesisInfo, ReadError> {
        let url = format!("{}/beacon/genesis", self.endpoints.http_base);
        let resp: DataEnvelope<GenesisData> = self.get_json(&url).await?;
        resp.data.try_into()
    }

    async fn finality_checkpoints(&self) -> Result<FinalityCheckpoints, ReadError> {
        let url = format!(
            "{}/beacon/states/head/finality_checkpoints",
            self.endpoints.http_base
        );
        let resp: DataEnvelope<CheckpointsData> = self.get_json(&url).await?;
        Ok(FinalityCheckpoints {
            previous_justified_epoch: resp.data.previous_justified.epoch,
            current_justified_epoch: resp.data.current_justified.epoch,
            finalized_epoch: resp.data.finalized.epoch,
        })
    }
}

// ── wire formats ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainHeadResponse {
    #[serde(deserialize_with = "u64_from_str_or_num")]
    head_epoch: u64,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    finalized_epoch: u64,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    justified_epoch: u64,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    previous_justified_epoch: u64,
    #[serde(default, deserialize_with = "opt_u64_from_str_or_num")]
    head_slot: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64_from_str_or_num")]
    finalized_slot: Option<u64>,
}

impl From<ChainHeadResponse> for ChainHeadSnapshot {
    fn from(r: ChainHeadResponse) -> Self {
        ChainHeadSnapshot {
            head_epoch: r.head_epoch,
            finalized_epoch: r.finalized_epoch,
            justified_epoch: r.justified_epoch,
            previous_justified_epoch: r.previous_justified_epoch,
            head_slot: r.head_slot,
            finalized_slot: r.finalized_slot,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct GenesisData {
    genesis_time: String,
    #[serde(default)]
    genesis_validators_root: Option<String>,
}

impl TryFrom<GenesisData> for GenesisInfo {
    type Error = ReadError;

    fn try_from(d: GenesisData) -> Result<Self, Self::Error> {
        let genesis_time = d
            .genesis_time
            .trim()
            .parse::<i64>()
            .map_err(|e| ReadError::Parse {
                field: "genesis_time",
                reason: format!("{:?}: {}", d.genesis_time, e),
            })?;
        Ok(GenesisInfo {
            genesis_time_unix_seconds: genesis_time,
            genesis_validators_root: d.genesis_validators_root,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CheckpointsData {
    previous_justified: Checkpoint,
    current_justified: Checkpoint,
    finalized: Checkpoint,
}

#[derive(Debug, Deserialize)]
struct Checkpoint {
    #[serde(deserialize_with = "u64_from_str_or_num")]
    epoch: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StrOrNum {
    Str(String),
    Num(u64),
}

impl StrOrNum {
    fn into_u64<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            StrOrNum::Num(n) => Ok(n),
            StrOrNum::Str(s) => s.trim().parse().map_err(E::custom),
        }
    }
}

// 64-bit values come as decimal strings from the gateway.
fn u64_from_str_or_num<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    StrOrNum::deserialize(d)?.into_u64()
}

fn opt_u64_from_str_or_num<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    match Option::<StrOrNum>::deserialize(d)? {
        Some(v) => v.into_u64().map(Some),
        None => Ok(None),
    }
}
