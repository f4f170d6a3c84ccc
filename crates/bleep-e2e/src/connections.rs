// Connection set: one handle per cluster member, addressed by stable index.
//
// Nodes taken offline stay in the set, flagged unavailable, so that indices
// (and the ports derived from them) never shift during a run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bleep_chain_reader::{ChainHeadSnapshot, ChainStateReader, NodeClient, ReadError};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::EvaluationContext;
use crate::error::{EvaluationError, InterceptorError};

/// How an evaluator picks the node it queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeSelection {
    /// Use this node, or the next available one while it is offline or
    /// unreachable.
    Preferred(usize),
    /// Use exactly this node; its absence is a reportable failure.
    Required(usize),
}

impl Default for NodeSelection {
    fn default() -> Self {
        NodeSelection::Preferred(0)
    }
}

pub struct NodeConnection {
    index: usize,
    reader: ChainStateReader,
    available: bool,
}

impl NodeConnection {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn reader(&self) -> &ChainStateReader {
        &self.reader
    }
}

pub struct ConnectionSet {
    nodes: Vec<NodeConnection>,
}

impl ConnectionSet {
    /// Node `i` of the set is `readers[i]`.
    pub fn new(readers: Vec<ChainStateReader>) -> Self {
        let nodes = readers
            .into_iter()
            .enumerate()
            .map(|(index, reader)| NodeConnection {
                index,
                reader,
                available: true,
            })
            .collect();
        ConnectionSet { nodes }
    }

    pub fn from_clients(clients: Vec<Arc<dyn NodeClient>>, query_timeout: Duration) -> Self {
        Self::new(
            clients
                .into_iter()
                .map(|c| ChainStateReader::new(c, query_timeout))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NodeConnection> {
        self.nodes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeConnection> {
        self.nodes.iter()
    }

    pub fn available(&self) -> impl Iterator<Item = &NodeConnection> {
        self.nodes.iter().filter(|n| n.available)
    }

    pub fn available_count(&self) -> usize {
        self.available().count()
    }

    pub fn is_available(&self, index: usize) -> bool {
        self.get(index).map(|n| n.available).unwrap_or(false)
    }

    /// Returns whether availability changed.
    pub fn mark_unavailable(&mut self, index: usize) -> Result<bool, InterceptorError> {
        self.set_available(index, false)
    }

    /// Returns whether availability changed. Restoring an available node is a no-op.
    pub fn restore(&mut self, index: usize) -> Result<bool, InterceptorError> {
        self.set_available(index, true)
    }

    fn set_available(&mut self, index: usize, available: bool) -> Result<bool, InterceptorError> {
        let node = self
            .nodes
            .get_mut(index)
            .ok_or(InterceptorError::UnknownNode { node: index })?;
        let changed = node.available != available;
        node.available = available;
        Ok(changed)
    }

    pub fn select(&self, selection: NodeSelection) -> Result<&NodeConnection, EvaluationError> {
        match selection {
            NodeSelection::Required(index) => {
                let node = self
                    .get(index)
                    .ok_or(EvaluationError::UnknownNode { node: index })?;
                if !node.available {
                    return Err(EvaluationError::NodeUnavailable { node: index });
                }
                Ok(node)
            }
            NodeSelection::Preferred(index) => {
                if self.get(index).is_none() {
                    return Err(EvaluationError::UnknownNode { node: index });
                }
                match self.get(index).filter(|n| n.available) {
                    Some(node) => Ok(node),
                    None => self.available().next().ok_or(EvaluationError::NoAvailableNode),
                }
            }
        }
    }

    /// Available nodes in the order a read with `selection` tries them.
    fn candidates(
        &self,
        selection: NodeSelection,
    ) -> Result<Vec<&NodeConnection>, EvaluationError> {
        let first = self.select(selection)?;
        let mut order = vec![first];
        if let NodeSelection::Preferred(_) = selection {
            order.extend(self.available().filter(|n| n.index != first.index));
        }
        Ok(order)
    }

    /// Run `query` against the node picked by `selection` and return its
    /// index with the answer.
    ///
    /// A `Preferred` read moves on to the next available node while the
    /// current one is unreachable, noting each skipped node in `ctx`. Any
    /// other read failure, or an unreachable last candidate, is returned.
    pub async fn read<'a, T, F, Fut>(
        &'a self,
        selection: NodeSelection,
        ctx: &mut EvaluationContext,
        query: F,
    ) -> Result<(usize, T), EvaluationError>
    where
        F: Fn(&'a ChainStateReader) -> Fut,
        Fut: Future<Output = Result<T, ReadError>>,
    {
        let candidates = self.candidates(selection)?;
        let last = candidates.len() - 1;
        for (i, node) in candidates.into_iter().enumerate() {
            match query(&node.reader).await {
                Ok(value) => return Ok((node.index, value)),
                Err(err) if err.is_unreachable() && i < last => {
                    warn!(node = node.index, %err, "node unreachable, reading from next node");
                    ctx.note_unreachable(node.index, &err);
                }
                Err(err) => return Err(EvaluationError::read(node.index, err)),
            }
        }
        Err(EvaluationError::NoAvailableNode)
    }

    /// Query the head of every available node concurrently.
    ///
    /// Each query is bounded by its reader's timeout, so the call returns once
    /// every node has answered or timed out. Results are in index order.
    pub async fn query_heads(&self) -> Vec<(usize, Result<ChainHeadSnapshot, ReadError>)> {
        let queries = self.available().map(|node| async move {
            (node.index, node.reader.chain_head().await)
        });
        join_all(queries).await
    }
}
