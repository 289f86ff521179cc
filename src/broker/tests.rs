//! Broker Module Tests
//!
//! In-process clusters: every node is a `PartitionExecutor` over its own
//! `MemoryIndex`, reached through `LocalTransport`.
//!
//! ## Test Scopes
//! - **Window**: pages match a reference sort of the whole data set.
//! - **Determinism**: repeated requests return identical results.
//! - **Degradation**: unreachable, slow and unrouted nodes or partitions.
//! - **Scored partitions**: disjoint score ranges, healthy and with a straggler.
//! - **Scatter engine**: merge panics and empty gathers.

#[cfg(test)]
mod tests {
    use crate::broker::broker::{Broker, BrokerConfig, DEFAULT_NODE_BUDGET_MARGIN};
    use crate::broker::customize::DefaultCustomizer;
    use crate::broker::info::ClusterInfoBroker;
    use crate::broker::scatter::{BoxFuture, CallFn, NodeFailure, ScatterGather};
    use crate::broker::transport::{LocalTransport, NodeTransport};
    use crate::executor::executor::PartitionExecutor;
    use crate::executor::protocol::{NodeSearchRequest, NodeStats};
    use crate::index::engine::{IndexEngine, IndexError, PartitionStats, SegmentMeta};
    use crate::index::memory::{Document, MemoryIndex, PartitionSnapshot};
    use crate::index::pruning::KeepAll;
    use crate::membership::types::{MembershipView, NodeId, NodeInfo};
    use crate::metrics::SearchMetrics;
    use crate::routing::router::PartitionRouter;
    use crate::search::error::{RequestError, SearchError, TimeoutSource};
    use crate::search::types::{
        FacetSpec, FieldValue, PartialResult, PartitionId, SearchRequest, SearchResult,
    };
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const NODES: u32 = 3;
    const PARTITIONS: u32 = 6;
    const DOCS_PER_PARTITION: u64 = 10;
    const COLORS: [&str; 3] = ["red", "green", "blue"];

    fn doc(partition: u32, i: u64) -> Document {
        let mut fields = BTreeMap::new();
        fields.insert(
            "color".to_string(),
            FieldValue::from(COLORS[((partition as u64 + i) % 3) as usize]),
        );
        Document {
            uid: partition as u64 * 100 + i,
            score: ((partition as u64 * 7 + i * 3) % 11) as f64,
            timestamp: 0,
            fields,
        }
    }

    fn all_docs() -> Vec<Document> {
        (0..PARTITIONS)
            .flat_map(|p| (0..DOCS_PER_PARTITION).map(move |i| doc(p, i)))
            .collect()
    }

    /// Score descending, uid ascending.
    fn reference_uids() -> Vec<u64> {
        let mut docs = all_docs();
        docs.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.uid.cmp(&b.uid)));
        docs.iter().map(|d| d.uid).collect()
    }

    struct TestCluster {
        broker: Arc<Broker>,
        info: Arc<ClusterInfoBroker>,
        local: Arc<LocalTransport<MemoryIndex>>,
        view: MembershipView,
        metrics: Arc<SearchMetrics>,
    }

    fn node_id(n: u32) -> NodeId {
        NodeId::from(format!("node-{}", n).as_str())
    }

    fn owned_partitions(n: u32, replicas: u32) -> Vec<u32> {
        (0..PARTITIONS)
            .filter(|p| (0..replicas).any(|r| (p + r) % NODES == n))
            .collect()
    }

    fn local_cluster(replicas: u32) -> (Arc<LocalTransport<MemoryIndex>>, MembershipView, Arc<SearchMetrics>) {
        let metrics = SearchMetrics::new();
        let local = LocalTransport::new(Duration::from_secs(5));
        let mut members = Vec::new();

        for n in 0..NODES {
            let partitions = owned_partitions(n, replicas);
            let index = MemoryIndex::with_segment_capacity(4);
            for &p in &partitions {
                index.add_documents(p, (0..DOCS_PER_PARTITION).map(|i| doc(p, i)).collect());
            }
            local.register(PartitionExecutor::new(
                node_id(n),
                index,
                Arc::new(KeepAll),
                4,
                metrics.clone(),
            ));
            let addr = format!("127.0.0.1:{}", 9100 + n).parse().unwrap();
            members.push(NodeInfo::new(node_id(n), addr, partitions));
        }

        (local, MembershipView::new(1, members), metrics)
    }

    fn cluster_with(
        replicas: u32,
        timeout: Duration,
        wrap: impl FnOnce(Arc<LocalTransport<MemoryIndex>>) -> Arc<dyn NodeTransport>,
    ) -> TestCluster {
        let (local, view, metrics) = local_cluster(replicas);
        let router = PartitionRouter::from_view(&view, 16);
        let transport = wrap(local.clone());
        let broker = Broker::new(
            router.clone(),
            transport.clone(),
            Arc::new(DefaultCustomizer::default()),
            BrokerConfig {
                timeout,
                ..Default::default()
            },
            metrics.clone(),
        );
        let info = ClusterInfoBroker::new(router, transport, 8, timeout);
        TestCluster {
            broker,
            info,
            local,
            view,
            metrics,
        }
    }

    fn cluster(replicas: u32) -> TestCluster {
        cluster_with(replicas, Duration::from_secs(2), |local| local as Arc<dyn NodeTransport>)
    }

    fn uids(result: &SearchResult) -> Vec<u64> {
        result.hits.iter().map(|h| h.uid).collect()
    }

    /// Delays every call to one node.
    struct DelayedTransport {
        inner: Arc<LocalTransport<MemoryIndex>>,
        slow: NodeId,
        delay: Duration,
    }

    #[async_trait]
    impl NodeTransport for DelayedTransport {
        async fn execute(&self, node: &NodeInfo, request: NodeSearchRequest) -> anyhow::Result<PartialResult> {
            if node.id == self.slow {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.execute(node, request).await
        }

        async fn stats(&self, node: &NodeInfo) -> anyhow::Result<NodeStats> {
            self.inner.stats(node).await
        }
    }

    // ============================================================
    // WINDOW
    // ============================================================

    #[tokio::test]
    async fn test_pages_match_reference_sort() {
        // ARRANGE
        let cluster = cluster(1);
        let reference = reference_uids();
        let available = reference.len();

        for (offset, count) in [(0, 5), (0, 60), (7, 9), (25, 20), (55, 10), (70, 5)] {
            // ACT
            let request = SearchRequest::default().with_window(offset, count);
            let result = cluster.broker.browse(request).await;

            // ASSERT
            let expected: Vec<u64> = reference.iter().skip(offset).take(count).copied().collect();
            assert_eq!(uids(&result), expected, "offset={} count={}", offset, count);
            assert_eq!(result.hits.len(), count.min(available.saturating_sub(offset)));
            assert_eq!(result.total_docs, available as u64);
            assert!(result.errors.is_empty(), "{:?}", result.errors);
        }
    }

    #[tokio::test]
    async fn test_explicit_partition_subset() {
        let cluster = cluster(1);
        let request = SearchRequest::default()
            .with_window(0, 100)
            .with_partitions([1, 4]);

        let result = cluster.broker.browse(request).await;

        assert_eq!(result.total_docs, 2 * DOCS_PER_PARTITION);
        assert!(result.hits.iter().all(|h| h.partition == 1 || h.partition == 4));
    }

    #[tokio::test]
    async fn test_facets_are_exact_across_nodes() {
        let cluster = cluster(1);
        let mut request = SearchRequest::default();
        request.facets = vec![FacetSpec::terms("color", 2)];

        let result = cluster.broker.browse(request).await;

        let mut expected: BTreeMap<String, u64> = BTreeMap::new();
        for d in all_docs() {
            *expected.entry(d.fields["color"].label()).or_insert(0) += 1;
        }
        let color = &result.facets["color"];
        assert_eq!(color.len(), 2);
        for facet in color {
            assert_eq!(Some(&facet.count), expected.get(&facet.value));
        }
    }

    #[tokio::test]
    async fn test_request_id_is_assigned_and_kept() {
        let cluster = cluster(1);

        let generated = cluster.broker.browse(SearchRequest::default()).await;
        assert!(generated.request_id.is_some());

        let mut request = SearchRequest::default();
        request.request_id = Some("req-7".to_string());
        let kept = cluster.broker.browse(request).await;
        assert_eq!(kept.request_id.as_deref(), Some("req-7"));
    }

    // ============================================================
    // DETERMINISM
    // ============================================================

    #[tokio::test]
    async fn test_identical_requests_identical_results() {
        // Replicated, so random routing keys pick different replicas.
        let cluster = cluster(2);
        let mut request = SearchRequest::default().with_window(3, 12);
        request.facets = vec![FacetSpec::terms("color", 3)];

        let first = cluster.broker.browse(request.clone()).await;
        for _ in 0..5 {
            let again = cluster.broker.browse(request.clone()).await;
            assert_eq!(again.hits, first.hits);
            assert_eq!(again.total_docs, first.total_docs);
            assert_eq!(again.facets, first.facets);
        }
    }

    #[tokio::test]
    async fn test_replicated_partitions_counted_once() {
        let cluster = cluster(2);

        let result = cluster.broker.browse(SearchRequest::default()).await;

        assert_eq!(result.total_docs, PARTITIONS as u64 * DOCS_PER_PARTITION);
    }

    // ============================================================
    // DEGRADATION
    // ============================================================

    #[tokio::test]
    async fn test_unreachable_node_drops_its_partitions() {
        // ARRANGE: node-0 disappears without a membership change
        let cluster = cluster(1);
        cluster.local.unregister(&node_id(0));
        let lost: BTreeSet<u32> = owned_partitions(0, 1).into_iter().collect();

        // ACT
        let result = cluster
            .broker
            .browse(SearchRequest::default().with_window(0, 100))
            .await;

        // ASSERT
        let answering = (PARTITIONS as u64 - lost.len() as u64) * DOCS_PER_PARTITION;
        assert_eq!(result.total_docs, answering);
        assert_eq!(result.hits.len(), answering as usize);
        assert!(result.hits.iter().all(|h| !lost.contains(&h.partition)));
        assert_eq!(result.errors.len(), lost.len());
        for error in &result.errors {
            assert!(matches!(error, SearchError::PartitionExecution { .. }));
            assert!(lost.contains(&error.partition().unwrap()));
        }
        assert_eq!(cluster.metrics.snapshot().node_failures, 1);
    }

    #[tokio::test]
    async fn test_slow_node_times_out_per_partition() {
        let cluster = cluster_with(1, Duration::from_millis(100), |local| {
            Arc::new(DelayedTransport {
                inner: local,
                slow: node_id(2),
                delay: Duration::from_millis(400),
            }) as Arc<dyn NodeTransport>
        });
        let slow: BTreeSet<u32> = owned_partitions(2, 1).into_iter().collect();

        let started = Instant::now();
        let result = cluster.broker.browse(SearchRequest::default()).await;

        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(
            result.total_docs,
            (PARTITIONS as u64 - slow.len() as u64) * DOCS_PER_PARTITION
        );
        assert_eq!(result.errors.len(), slow.len());
        for error in &result.errors {
            let SearchError::ExecutionTimeout {
                origin: TimeoutSource::Partition(p),
                ..
            } = error
            else {
                panic!("expected a timeout, got {:?}", error);
            };
            assert!(slow.contains(p));
        }
    }

    #[tokio::test]
    async fn test_no_node_answers_is_gather_error() {
        let cluster = cluster(1);
        for n in 0..NODES {
            cluster.local.unregister(&node_id(n));
        }

        let result = cluster.broker.browse(SearchRequest::default()).await;

        assert!(result.hits.is_empty());
        assert_eq!(result.total_docs, 0);
        assert!(matches!(result.errors[0], SearchError::Gather { .. }));
        assert_eq!(result.errors.len(), 1 + PARTITIONS as usize);
    }

    #[tokio::test]
    async fn test_empty_target_set_is_no_partitions() {
        let cluster = cluster(1);
        let request = SearchRequest::default().with_partitions(Vec::new());

        let result = cluster.broker.browse(request).await;

        assert!(result.hits.is_empty());
        assert!(matches!(&result.errors[..], [SearchError::NoPartitions { .. }]));
    }

    #[tokio::test]
    async fn test_fully_unrouted_is_no_partitions() {
        let cluster = cluster(1);
        let request = SearchRequest::default().with_partitions([42, 43]);

        let result = cluster.broker.browse(request).await;

        assert!(matches!(&result.errors[..], [SearchError::NoPartitions { .. }]));
        assert_eq!(cluster.metrics.snapshot().unrouted_partitions, 2);
    }

    #[tokio::test]
    async fn test_partially_unrouted_is_a_silent_gap() {
        let cluster = cluster(1);
        let request = SearchRequest::default().with_partitions([0, 42]);

        let result = cluster.broker.browse(request).await;

        assert_eq!(result.total_docs, DOCS_PER_PARTITION);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_dispatch() {
        let cluster = cluster(1);

        let rejected = cluster
            .broker
            .try_browse(SearchRequest::default().with_window(0, 0))
            .await;
        assert_eq!(rejected.unwrap_err(), RequestError::EmptyWindow);

        let degraded = cluster
            .broker
            .browse(SearchRequest::default().with_window(usize::MAX, 2))
            .await;
        assert!(matches!(&degraded.errors[..], [SearchError::Gather { .. }]));
        assert_eq!(cluster.metrics.snapshot().requests, 0);
    }

    // ============================================================
    // CLUSTER INFO
    // ============================================================

    #[tokio::test]
    async fn test_cluster_info_counts_replicas_once() {
        let cluster = cluster(2);

        let stats = cluster.info.cluster_info().await;

        assert_eq!(stats.nodes.len(), NODES as usize);
        assert_eq!(stats.partitions, PARTITIONS as usize);
        assert_eq!(stats.total_docs, PARTITIONS as u64 * DOCS_PER_PARTITION);
        assert_eq!(stats.routing_version, cluster.view.version);
        assert!(stats.unreachable.is_empty());
    }

    #[tokio::test]
    async fn test_cluster_info_lists_unreachable_nodes() {
        let cluster = cluster(1);
        cluster.local.unregister(&node_id(1));

        let stats = cluster.info.cluster_info().await;

        assert_eq!(stats.nodes.len(), 2);
        assert_eq!(stats.unreachable, vec![node_id(1)]);
    }

    // ============================================================
    // SCORED PARTITIONS
    // ============================================================

    /// Memory index where searching one partition blocks for a while.
    struct StragglerEngine {
        inner: Arc<MemoryIndex>,
        slow: Option<(PartitionId, Duration)>,
    }

    impl IndexEngine for StragglerEngine {
        type Snapshot = PartitionSnapshot;

        fn acquire(&self, partition: PartitionId) -> Result<Arc<PartitionSnapshot>, IndexError> {
            self.inner.acquire(partition)
        }

        fn release(&self, partition: PartitionId, snapshot: Arc<PartitionSnapshot>) {
            self.inner.release(partition, snapshot)
        }

        fn segments(&self, snapshot: &PartitionSnapshot) -> Vec<SegmentMeta> {
            self.inner.segments(snapshot)
        }

        fn search(
            &self,
            request: &SearchRequest,
            snapshot: &PartitionSnapshot,
            segments: &[SegmentMeta],
        ) -> Result<PartialResult, IndexError> {
            if let Some((partition, delay)) = self.slow
                && snapshot.partition() == partition
            {
                std::thread::sleep(delay);
            }
            self.inner.search(request, snapshot, segments)
        }

        fn partition_stats(&self) -> Vec<PartitionStats> {
            self.inner.partition_stats()
        }
    }

    /// One node serving partitions 1..=4; partition k holds 10 documents
    /// scored [(k-1)*10, k*10).
    fn scored_broker(
        slow: Option<(PartitionId, Duration)>,
        timeout: Duration,
    ) -> (Arc<Broker>, Arc<SearchMetrics>, Arc<MemoryIndex>) {
        let index = MemoryIndex::with_segment_capacity(4);
        for k in 1..=4u32 {
            let docs = (0..10u64)
                .map(|i| Document {
                    uid: k as u64 * 100 + i,
                    score: ((k - 1) * 10) as f64 + i as f64,
                    timestamp: 0,
                    fields: BTreeMap::new(),
                })
                .collect();
            index.add_documents(k, docs);
        }

        let local: Arc<LocalTransport<StragglerEngine>> = LocalTransport::new(Duration::from_secs(5));
        local.register(PartitionExecutor::new(
            NodeId::from("scored"),
            Arc::new(StragglerEngine {
                inner: index.clone(),
                slow,
            }),
            Arc::new(KeepAll),
            8,
            SearchMetrics::new(),
        ));

        let addr = "127.0.0.1:9300".parse().unwrap();
        let view = MembershipView::new(1, vec![NodeInfo::new("scored", addr, vec![1, 2, 3, 4])]);
        let metrics = SearchMetrics::new();
        let broker = Broker::new(
            PartitionRouter::from_view(&view, 16),
            local as Arc<dyn NodeTransport>,
            Arc::new(DefaultCustomizer::default()),
            BrokerConfig {
                timeout,
                ..Default::default()
            },
            metrics.clone(),
        );
        (broker, metrics, index)
    }

    fn scores(result: &SearchResult) -> Vec<f64> {
        result.hits.iter().map(|h| h.score).collect()
    }

    #[tokio::test]
    async fn test_scored_partitions_top_five() {
        // ARRANGE
        let (broker, metrics, index) = scored_broker(None, Duration::from_secs(2));

        // ACT
        let result = broker.browse(SearchRequest::default().with_window(0, 5)).await;

        // ASSERT
        assert_eq!(scores(&result), vec![39.0, 38.0, 37.0, 36.0, 35.0]);
        assert_eq!(result.total_docs, 40);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(index.total_open_snapshots(), 0);

        // ASSERT: one dispatch and one merge recorded for one request
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dispatch.count, 1);
        assert_eq!(snapshot.merge.count, 1);
    }

    #[tokio::test]
    async fn test_straggling_partition_keeps_rest_of_node() {
        // ARRANGE: partition 3 takes twice the broker timeout
        let (broker, metrics, _index) = scored_broker(
            Some((3, Duration::from_millis(500))),
            Duration::from_millis(250),
        );

        for _ in 0..3 {
            // ACT
            let result = broker.browse(SearchRequest::default().with_window(0, 5)).await;

            // ASSERT: the node answers in time without partition 3
            assert_eq!(scores(&result), vec![39.0, 38.0, 37.0, 36.0, 35.0]);
            assert_eq!(result.total_docs, 30);
            assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
            assert!(matches!(
                result.errors[0],
                SearchError::ExecutionTimeout {
                    origin: TimeoutSource::Partition(3),
                    ..
                }
            ));
        }
        assert_eq!(metrics.snapshot().node_timeouts, 0);
    }

    #[test]
    fn test_node_budget_leaves_room_to_answer() {
        let config = BrokerConfig::default();

        assert_eq!(
            config.node_budget(Duration::from_millis(2000)),
            Duration::from_millis(2000) - DEFAULT_NODE_BUDGET_MARGIN
        );
        // Short deadlines keep at least half for the node.
        assert_eq!(config.node_budget(Duration::from_millis(100)), Duration::from_millis(50));
        assert_eq!(config.node_budget(Duration::ZERO), Duration::ZERO);
    }

    // ============================================================
    // SCATTER ENGINE
    // ============================================================

    fn node(n: u32) -> NodeInfo {
        NodeInfo::new(node_id(n), format!("127.0.0.1:{}", 9200 + n).parse().unwrap(), vec![n])
    }

    fn echo_call() -> CallFn<u64, Vec<u64>> {
        Arc::new(|_node: NodeInfo, value: u64| {
            Box::pin(async move {
                if value == 0 {
                    anyhow::bail!("zero is not allowed");
                }
                Ok(vec![value])
            }) as BoxFuture<anyhow::Result<Vec<u64>>>
        })
    }

    #[tokio::test]
    async fn test_scatter_merges_answers_and_reports_failures() {
        let scatter = ScatterGather::new(
            Arc::new(tokio::sync::Semaphore::new(2)),
            |parts: Vec<Vec<u64>>| parts.concat(),
            Vec::new,
        );
        let targets = vec![(node(1), 3), (node(2), 0), (node(3), 5)];

        let gathered = scatter
            .run(targets, echo_call(), Instant::now() + Duration::from_secs(1))
            .await;

        assert_eq!(gathered.result, vec![3, 5]);
        assert_eq!(gathered.responded, 2);
        assert_eq!(gathered.failures.len(), 1);
        assert_eq!(gathered.failures[0].0.id, node_id(2));
        assert!(matches!(gathered.failures[0].1, NodeFailure::Failed { .. }));
    }

    #[tokio::test]
    async fn test_scatter_merge_panic_yields_empty_result() {
        let scatter = ScatterGather::new(
            Arc::new(tokio::sync::Semaphore::new(2)),
            |_: Vec<Vec<u64>>| -> Vec<u64> { panic!("shape mismatch") },
            || vec![u64::MAX],
        );

        let gathered = scatter
            .run(vec![(node(1), 1)], echo_call(), Instant::now() + Duration::from_secs(1))
            .await;

        assert_eq!(gathered.result, vec![u64::MAX]);
        assert_eq!(gathered.merge_failure.as_deref(), Some("shape mismatch"));
    }

    #[tokio::test]
    async fn test_scatter_without_answers_uses_empty() {
        let scatter: ScatterGather<u64, Vec<u64>> = ScatterGather::new(
            Arc::new(tokio::sync::Semaphore::new(1)),
            |parts: Vec<Vec<u64>>| parts.concat(),
            || vec![7],
        );

        let gathered = scatter
            .run(vec![(node(1), 0)], echo_call(), Instant::now() + Duration::from_secs(1))
            .await;

        assert_eq!(gathered.result, vec![7]);
        assert_eq!(gathered.responded, 0);
    }

    #[tokio::test]
    async fn test_scatter_reports_merge_time() {
        let scatter = ScatterGather::new(
            Arc::new(tokio::sync::Semaphore::new(2)),
            |parts: Vec<Vec<u64>>| {
                std::thread::sleep(Duration::from_millis(30));
                parts.concat()
            },
            Vec::new,
        );

        let gathered = scatter
            .run(vec![(node(1), 1), (node(2), 2)], echo_call(), Instant::now() + Duration::from_secs(1))
            .await;

        assert_eq!(gathered.result.len(), 2);
        assert!(gathered.merge_elapsed >= Duration::from_millis(30));
    }
}
