use axum::{
    Router,
    extract::Extension,
    routing::{get, post, put},
};
use clap::Parser;
use partitioned_search::broker::broker::Broker;
use partitioned_search::broker::customize::DefaultCustomizer;
use partitioned_search::broker::handlers::{
    ENDPOINT_CLUSTER_INFO, ENDPOINT_SEARCH, handle_cluster_info, handle_search,
};
use partitioned_search::broker::info::ClusterInfoBroker;
use partitioned_search::broker::transport::{HttpTransport, NodeTransport};
use partitioned_search::config::{Cli, NodeConfig};
use partitioned_search::executor::executor::PartitionExecutor;
use partitioned_search::executor::handlers::{DefaultBudget, handle_execute, handle_node_stats};
use partitioned_search::executor::protocol::{ENDPOINT_EXECUTE, ENDPOINT_NODE_STATS};
use partitioned_search::index::handlers::{ENDPOINT_INDEX_PARTITION, handle_index_documents};
use partitioned_search::index::memory::MemoryIndex;
use partitioned_search::membership::feed::{MembershipFeed, spawn_router_updater};
use partitioned_search::membership::handlers::*;
use partitioned_search::metrics::{ENDPOINT_METRICS, SearchMetrics, handle_metrics};
use partitioned_search::routing::router::PartitionRouter;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = NodeConfig::from_cli(&cli)?;
    let node_id = config.node_id();

    tracing::info!("Starting node {} on {}", node_id, config.node.bind);
    tracing::info!("Serving partitions {:?}", config.node.partitions);

    // 1. Local index and executor:
    let metrics = SearchMetrics::new();
    let index = MemoryIndex::with_segment_capacity(config.executor.segment_capacity);
    for &partition in &config.node.partitions {
        index.create_partition(partition);
    }
    let executor = PartitionExecutor::new(
        node_id.clone(),
        index.clone(),
        config.pruner(),
        config.executor.workers,
        metrics.clone(),
    );

    // 2. Membership and routing:
    let feed = MembershipFeed::new(config.initial_view());
    let router = PartitionRouter::new(config.routing.virtual_nodes);
    let _router_updater = spawn_router_updater(feed.clone(), router.clone());
    tracing::info!(
        "Initial view has {} nodes covering {} partitions",
        feed.current().len(),
        router.partitions().len()
    );

    // 3. Brokers:
    let broker_config = config.broker_config();
    let transport: Arc<dyn NodeTransport> = Arc::new(HttpTransport::new(
        broker_config.timeout + Duration::from_millis(100),
    )?);
    let broker = Broker::new(
        router.clone(),
        transport.clone(),
        Arc::new(DefaultCustomizer {
            facet_floor: config.broker.facet_floor,
        }),
        broker_config.clone(),
        metrics.clone(),
    );
    let cluster_info = ClusterInfoBroker::new(
        router.clone(),
        transport,
        broker_config.dispatch_concurrency,
        broker_config.timeout,
    );

    // 4. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_SEARCH, post(handle_search))
        .route(ENDPOINT_CLUSTER_INFO, get(handle_cluster_info))
        .route(ENDPOINT_EXECUTE, post(handle_execute))
        .route(ENDPOINT_NODE_STATS, get(handle_node_stats))
        .route(ENDPOINT_INDEX_PARTITION, post(handle_index_documents))
        .route(ENDPOINT_MEMBERSHIP, get(handle_get_membership))
        .route(ENDPOINT_MEMBERSHIP_PUBLISH, put(handle_publish_membership))
        .route(ENDPOINT_MEMBERSHIP_JOIN, post(handle_join))
        .route(ENDPOINT_MEMBERSHIP_LEAVE, post(handle_leave))
        .route(ENDPOINT_METRICS, get(handle_metrics))
        .layer(Extension(broker))
        .layer(Extension(cluster_info))
        .layer(Extension(executor))
        .layer(Extension(DefaultBudget(config.partition_budget())))
        .layer(Extension(index))
        .layer(Extension(feed))
        .layer(Extension(metrics));

    // 5. Start HTTP server:
    tracing::info!("HTTP server listening on {}", config.node.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(config.node.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
