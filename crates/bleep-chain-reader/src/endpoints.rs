// Per-node network endpoints.
//
// A node's stable index is the only thing that addresses it: every port is
// `base + index`, so an index must never be reused for another logical node.

use serde::{Deserialize, Serialize};

/// Which beacon client implementation serves a node's HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BeaconNodeType {
    #[default]
    Prysm,
    Lighthouse,
}

/// Base ports of the cluster. Node `i` listens on `base + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    /// RPC gateway: serves both the chain-head summary and, for prysm nodes,
    /// the HTTP API.
    pub prysm_gateway_port: u16,
    pub lighthouse_http_port: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Ports {
            prysm_gateway_port: 3400,
            lighthouse_http_port: 5150,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoints {
    pub index: usize,
    /// Base url of the chain-head RPC gateway.
    pub rpc_base: String,
    /// Base url of the `/eth/v1` HTTP API.
    pub http_base: String,
}

impl NodeEndpoints {
    pub fn for_index(
        host: &str,
        ports: &Ports,
        node_type: BeaconNodeType,
        index: usize,
    ) -> Result<Self, String> {
        let gateway = offset_port(ports.prysm_gateway_port, index)?;
        let http = match node_type {
            BeaconNodeType::Prysm => gateway,
            BeaconNodeType::Lighthouse => offset_port(ports.lighthouse_http_port, index)?,
        };
        Ok(NodeEndpoints {
            index,
            rpc_base: format!("http://{}:{}/eth/v1alpha1", host, gateway),
            http_base: format!("http://{}:{}/eth/v1", host, http),
        })
    }
}

fn offset_port(base: u16, index: usize) -> Result<u16, String> {
    u16::try_from(index)
        .ok()
        .and_then(|i| base.checked_add(i))
        .ok_or_else(|| format!("port {} + node index {} overflows", base, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prysm_endpoints_share_gateway() {
        let e = NodeEndpoints::for_index("localhost", &Ports::default(), BeaconNodeType::Prysm, 2)
            .unwrap();
        assert_eq!(e.rpc_base, "http://localhost:3402/eth/v1alpha1");
        assert_eq!(e.http_base, "http://localhost:3402/eth/v1");
    }

    #[test]
    fn test_lighthouse_http_port() {
        let e = NodeEndpoints::for_index(
            "127.0.0.1",
            &Ports::default(),
            BeaconNodeType::Lighthouse,
            1,
        )
        .unwrap();
        assert_eq!(e.rpc_base, "http://127.0.0.1:3401/eth/v1alpha1");
        assert_eq!(e.http_base, "http://127.0.0.1:5151/eth/v1");
    }

    #[test]
    fn test_port_overflow_rejected() {
        let ports = Ports {
            prysm_gateway_port: u16::MAX,
            lighthouse_http_port: 1,
        };
        assert!(NodeEndpoints::for_index("h", &ports, BeaconNodeType::Prysm, 1).is_err());
    }
}
