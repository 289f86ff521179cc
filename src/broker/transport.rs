//! Node RPC transports.
//!
//! The broker talks to executors through [`NodeTransport`]. `HttpTransport`
//! posts JSON to the node's internal endpoints; `LocalTransport` calls
//! executors living in the same process.

use crate::executor::executor::PartitionExecutor;
use crate::executor::protocol::{ENDPOINT_EXECUTE, ENDPOINT_NODE_STATS, NodeSearchRequest, NodeStats};
use crate::index::engine::IndexEngine;
use crate::membership::types::{NodeId, NodeInfo};
use crate::search::types::PartialResult;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait NodeTransport: Send + Sync + 'static {
    /// Runs `request` on `node` and returns its node-level partial result.
    async fn execute(&self, node: &NodeInfo, request: NodeSearchRequest) -> Result<PartialResult>;

    async fn stats(&self, node: &NodeInfo) -> Result<NodeStats>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `timeout` caps every call; the broker's own deadline is usually shorter.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn execute(&self, node: &NodeInfo, request: NodeSearchRequest) -> Result<PartialResult> {
        let url = format!("http://{}{}", node.addr, ENDPOINT_EXECUTE);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("node {} unreachable at {}", node.id, node.addr))?;

        if !response.status().is_success() {
            bail!("node {} answered {}", node.id, response.status());
        }

        response
            .json::<PartialResult>()
            .await
            .with_context(|| format!("decoding response from node {}", node.id))
    }

    async fn stats(&self, node: &NodeInfo) -> Result<NodeStats> {
        let url = format!("http://{}{}", node.addr, ENDPOINT_NODE_STATS);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("node {} unreachable at {}", node.id, node.addr))?;

        if !response.status().is_success() {
            bail!("node {} answered {}", node.id, response.status());
        }

        response
            .json::<NodeStats>()
            .await
            .with_context(|| format!("decoding stats from node {}", node.id))
    }
}

/// In-process transport over registered executors.
pub struct LocalTransport<E: IndexEngine> {
    executors: DashMap<NodeId, Arc<PartitionExecutor<E>>>,
    default_budget: Duration,
}

impl<E: IndexEngine> LocalTransport<E> {
    pub fn new(default_budget: Duration) -> Arc<Self> {
        Arc::new(Self {
            executors: DashMap::new(),
            default_budget,
        })
    }

    pub fn register(&self, executor: Arc<PartitionExecutor<E>>) {
        self.executors.insert(executor.node_id().clone(), executor);
    }

    pub fn unregister(&self, node: &NodeId) {
        self.executors.remove(node);
    }

    fn executor(&self, node: &NodeInfo) -> Result<Arc<PartitionExecutor<E>>> {
        self.executors
            .get(&node.id)
            .map(|e| e.value().clone())
            .with_context(|| format!("node {} unreachable: no local executor", node.id))
    }
}

#[async_trait]
impl<E: IndexEngine> NodeTransport for LocalTransport<E> {
    async fn execute(&self, node: &NodeInfo, request: NodeSearchRequest) -> Result<PartialResult> {
        let executor = self.executor(node)?;
        let budget = request
            .budget_ms
            .map(Duration::from_millis)
            .map_or(self.default_budget, |b| b.min(self.default_budget));
        Ok(executor
            .execute(&request.request, &request.partitions, budget)
            .await)
    }

    async fn stats(&self, node: &NodeInfo) -> Result<NodeStats> {
        Ok(self.executor(node)?.stats())
    }
}
