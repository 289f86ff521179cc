//! Document Search Broker
//!
//! Client-facing entry point. A request is customized once, planned against a
//! single routing-table snapshot, sent as one RPC per node, gathered until the
//! deadline and merged into the final page.

use super::customize::RequestCustomizer;
use super::scatter::{BoxFuture, CallFn, Gathered, NodeFailure, ScatterGather};
use super::transport::NodeTransport;
use crate::executor::protocol::NodeSearchRequest;
use crate::membership::types::{NodeId, NodeInfo};
use crate::merge::{finalize, merge_partials};
use crate::metrics::SearchMetrics;
use crate::routing::router::PartitionRouter;
use crate::search::error::{RequestError, SearchError};
use crate::search::types::{MAX_WINDOW, PartialResult, PartitionId, SearchRequest, SearchResult};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Whole-request deadline, measured from the moment `browse` is called.
    pub timeout: Duration,
    /// Node RPCs in flight at once across all requests.
    pub dispatch_concurrency: usize,
    /// Largest `offset + count` accepted.
    pub max_window: usize,
    /// Time kept back from each node's budget for its merge and reply.
    /// Never more than half of what is left of the deadline.
    pub node_budget_margin: Duration,
}

pub const DEFAULT_NODE_BUDGET_MARGIN: Duration = Duration::from_millis(100);

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            dispatch_concurrency: 64,
            max_window: MAX_WINDOW,
            node_budget_margin: DEFAULT_NODE_BUDGET_MARGIN,
        }
    }
}

impl BrokerConfig {
    /// Budget a node gets when `remaining` is left before the deadline. The
    /// node stops waiting for partitions early enough to answer in time.
    pub fn node_budget(&self, remaining: Duration) -> Duration {
        remaining.saturating_sub(self.node_budget_margin.min(remaining / 2))
    }
}

pub struct Broker {
    router: Arc<PartitionRouter>,
    transport: Arc<dyn NodeTransport>,
    customizer: Arc<dyn RequestCustomizer>,
    dispatch_permits: Arc<Semaphore>,
    config: BrokerConfig,
    metrics: Arc<SearchMetrics>,
}

impl Broker {
    pub fn new(
        router: Arc<PartitionRouter>,
        transport: Arc<dyn NodeTransport>,
        customizer: Arc<dyn RequestCustomizer>,
        config: BrokerConfig,
        metrics: Arc<SearchMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            router,
            transport,
            customizer,
            dispatch_permits: Arc::new(Semaphore::new(config.dispatch_concurrency.max(1))),
            config,
            metrics,
        })
    }

    /// Runs `request` across the cluster. Never fails: every problem is
    /// reported in the result's error list.
    pub async fn browse(&self, request: SearchRequest) -> SearchResult {
        let start = Instant::now();
        let request_id = request.request_id.clone();
        match self.try_browse(request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Rejected request {:?}: {}", request_id, e);
                let mut result = SearchResult::empty(request_id);
                result.errors.push(SearchError::Gather {
                    message: format!("invalid request: {}", e),
                });
                result.elapsed_ms = start.elapsed().as_millis() as u64;
                result
            }
        }
    }

    /// Like [`browse`](Self::browse), but surfaces malformed requests to the
    /// caller before anything is dispatched.
    pub async fn try_browse(&self, mut request: SearchRequest) -> Result<SearchResult, RequestError> {
        let start = Instant::now();
        request.validate()?;
        if request.window_end() > self.config.max_window {
            return Err(RequestError::WindowTooLarge {
                offset: request.offset,
                count: request.count,
                max: self.config.max_window,
            });
        }

        SearchMetrics::incr(&self.metrics.requests);
        if request.request_id.is_none() {
            request.request_id = Some(uuid::Uuid::new_v4().to_string());
        }
        let routing_key = request
            .routing_key
            .clone()
            .unwrap_or_else(|| format!("{:016x}", rand::random::<u64>()));

        // Plan against one table so a concurrent membership change cannot
        // split the request across two views.
        let table = self.router.snapshot();
        let targets = request
            .partitions
            .clone()
            .unwrap_or_else(|| table.partitions());
        if targets.is_empty() {
            return Ok(self.no_partitions(&request, start, "request targets no partitions".to_string()));
        }

        let mut plan: BTreeMap<NodeId, (NodeInfo, Vec<PartitionId>)> = BTreeMap::new();
        let mut unrouted = Vec::new();
        for &partition in &targets {
            match table.route(partition, routing_key.as_bytes()) {
                Some(node) => plan
                    .entry(node.id.clone())
                    .or_insert_with(|| (node.clone(), Vec::new()))
                    .1
                    .push(partition),
                None => unrouted.push(partition),
            }
        }
        if !unrouted.is_empty() {
            SearchMetrics::add(&self.metrics.unrouted_partitions, unrouted.len() as u64);
            tracing::warn!(
                "Request {:?}: no owner for partitions {:?}, searching without them",
                request.request_id,
                unrouted
            );
        }
        if plan.is_empty() {
            let message = format!("none of the {} target partitions has an owner", targets.len());
            return Ok(self.no_partitions(&request, start, message));
        }

        let node_request = self.customizer.customize(&request);
        let deadline = start + self.config.timeout;
        let budget_ms = self
            .config
            .node_budget(deadline.saturating_duration_since(Instant::now()))
            .as_millis() as u64;

        let assignments: BTreeMap<NodeId, Vec<PartitionId>> = plan
            .iter()
            .map(|(id, (_, partitions))| (id.clone(), partitions.clone()))
            .collect();
        let dispatch: Vec<(NodeInfo, NodeSearchRequest)> = plan
            .into_values()
            .map(|(node, partitions)| {
                (
                    node,
                    NodeSearchRequest {
                        request: node_request.clone(),
                        partitions,
                        budget_ms: Some(budget_ms),
                    },
                )
            })
            .collect();

        tracing::debug!(
            "Request {:?}: dispatching {} partitions to {} nodes",
            request.request_id,
            targets.len() - unrouted.len(),
            dispatch.len()
        );

        // Node results keep `offset + count` hits; only `finalize` trims.
        let merge_request = request.clone();
        let scatter = ScatterGather::new(
            self.dispatch_permits.clone(),
            move |partials| merge_partials(&merge_request, partials),
            PartialResult::empty,
        );
        let transport = self.transport.clone();
        let call: CallFn<NodeSearchRequest, PartialResult> =
            Arc::new(move |node: NodeInfo, req: NodeSearchRequest| {
                let transport = transport.clone();
                Box::pin(async move { transport.execute(&node, req).await })
                    as BoxFuture<anyhow::Result<PartialResult>>
            });

        let gathered = scatter.run(dispatch, call, deadline).await;
        self.metrics
            .dispatch
            .record(start.elapsed().saturating_sub(gathered.merge_elapsed));

        let dispatch_errors = self.failure_errors(&gathered, &assignments);
        let result = self.finish(&request, gathered, dispatch_errors, start);

        tracing::info!(
            "Request {:?}: {} hits of {} docs in {}ms ({} errors)",
            result.request_id,
            result.hits.len(),
            result.total_docs,
            result.elapsed_ms,
            result.errors.len()
        );
        Ok(result)
    }

    /// One error per partition of every node that did not answer.
    fn failure_errors(
        &self,
        gathered: &Gathered<PartialResult>,
        assignments: &BTreeMap<NodeId, Vec<PartitionId>>,
    ) -> Vec<SearchError> {
        let budget_ms = self.config.timeout.as_millis() as u64;
        let mut errors = Vec::new();
        for (node, failure) in &gathered.failures {
            let partitions = assignments.get(&node.id).map(Vec::as_slice).unwrap_or(&[]);
            match failure {
                NodeFailure::Timeout { .. } => {
                    SearchMetrics::incr(&self.metrics.node_timeouts);
                    errors.extend(
                        partitions
                            .iter()
                            .map(|&p| SearchError::partition_timeout(p, budget_ms)),
                    );
                }
                NodeFailure::Failed { message } => {
                    SearchMetrics::incr(&self.metrics.node_failures);
                    errors.extend(partitions.iter().map(|&p| SearchError::PartitionExecution {
                        partition: p,
                        message: format!("node {}: {}", node.id, message),
                    }));
                }
            }
        }
        errors
    }

    fn finish(
        &self,
        request: &SearchRequest,
        gathered: Gathered<PartialResult>,
        dispatch_errors: Vec<SearchError>,
        start: Instant,
    ) -> SearchResult {
        let mut result = if gathered.responded == 0 {
            let mut empty = SearchResult::empty(request.request_id.clone());
            empty.errors.push(SearchError::Gather {
                message: format!(
                    "no node answered ({} dispatched)",
                    gathered.failures.len()
                ),
            });
            empty
        } else {
            let finalize_start = Instant::now();
            let finalized = finalize(request, gathered.result);
            self.metrics
                .merge
                .record(gathered.merge_elapsed + finalize_start.elapsed());
            finalized
        };

        result.errors.extend(dispatch_errors);
        if let Some(message) = gathered.merge_failure {
            result.errors.push(SearchError::Merge {
                field: "*".to_string(),
                message,
            });
        }

        let merge_errors = result
            .errors
            .iter()
            .filter(|e| matches!(e, SearchError::Merge { .. }))
            .count();
        SearchMetrics::add(&self.metrics.merge_errors, merge_errors as u64);

        result.elapsed_ms = start.elapsed().as_millis() as u64;
        result
    }

    fn no_partitions(&self, request: &SearchRequest, start: Instant, message: String) -> SearchResult {
        tracing::warn!("Request {:?}: {}", request.request_id, message);
        let mut result = SearchResult::empty(request.request_id.clone());
        result.errors.push(SearchError::NoPartitions { message });
        result.elapsed_ms = start.elapsed().as_millis() as u64;
        result
    }
}
