//! Node configuration.
//!
//! A TOML file provides every setting; command-line flags override the few
//! that differ between nodes of one cluster. Missing sections fall back to
//! their defaults, so an empty file is a valid single-node setup.
//!
//! ```toml
//! [node]
//! id = "node-a"
//! bind = "127.0.0.1:7700"
//! partitions = [0, 1, 2]
//!
//! [broker]
//! timeout_ms = 2000
//!
//! [[members]]
//! id = "node-b"
//! addr = "127.0.0.1:7701"
//! partitions = [3, 4, 5]
//! ```

use crate::broker::broker::{BrokerConfig, DEFAULT_NODE_BUDGET_MARGIN};
use crate::index::pruning::{KeepAll, RetentionPruner, SegmentPruner};
use crate::membership::types::{MembershipView, NodeId, NodeInfo};
use crate::routing::router::DEFAULT_VIRTUAL_NODES;
use crate::search::types::{MAX_WINDOW, PartitionId};

use anyhow::{Context, Result, ensure};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Partitioned search node: serves local partitions and brokers cluster-wide queries.
#[derive(Parser, Debug)]
#[command(name = "search-node", version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Node identifier (random when neither flag nor file sets one)
    #[arg(long)]
    pub node_id: Option<String>,

    /// HTTP listen address
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Partitions served by this node, comma separated
    #[arg(short, long, value_delimiter = ',')]
    pub partitions: Option<Vec<PartitionId>>,

    /// Default tracing filter; RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub broker: BrokerSection,
    pub executor: ExecutorSection,
    pub routing: RoutingSection,
    pub members: Vec<MemberConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeSection {
    pub id: Option<String>,
    pub bind: SocketAddr,
    pub partitions: Vec<PartitionId>,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: None,
            bind: SocketAddr::from(([127, 0, 0, 1], 7700)),
            partitions: vec![0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    pub timeout_ms: u64,
    pub dispatch_concurrency: usize,
    /// Minimum facet size requested from each node.
    pub facet_floor: usize,
    pub max_window: usize,
    /// Kept back from the node budget so nodes answer before the deadline.
    pub node_budget_margin_ms: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            dispatch_concurrency: 64,
            facet_floor: crate::broker::customize::DEFAULT_FACET_FLOOR,
            max_window: MAX_WINDOW,
            node_budget_margin_ms: DEFAULT_NODE_BUDGET_MARGIN.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorSection {
    pub workers: usize,
    /// Upper bound on the time a node spends on one request.
    pub partition_budget_ms: u64,
    /// Segments with no document newer than this are skipped. Unset keeps all.
    pub retention_secs: Option<u64>,
    pub segment_capacity: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            partition_budget_ms: 1500,
            retention_secs: None,
            segment_capacity: crate::index::memory::DEFAULT_SEGMENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingSection {
    pub virtual_nodes: u32,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
        }
    }
}

/// Another node known at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberConfig {
    pub id: String,
    pub addr: SocketAddr,
    #[serde(default)]
    pub partitions: Vec<PartitionId>,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// File (if any), then flag overrides, then validation. Always leaves a
    /// concrete node id in place.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(id) = &cli.node_id {
            config.node.id = Some(id.clone());
        }
        if let Some(bind) = cli.bind {
            config.node.bind = bind;
        }
        if let Some(partitions) = &cli.partitions {
            config.node.partitions = partitions.clone();
        }
        if config.node.id.is_none() {
            config.node.id = Some(NodeId::new().0);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.broker.timeout_ms > 0, "broker.timeout_ms must be positive");
        ensure!(self.broker.max_window > 0, "broker.max_window must be positive");
        ensure!(self.executor.workers > 0, "executor.workers must be positive");
        ensure!(
            self.executor.partition_budget_ms > 0,
            "executor.partition_budget_ms must be positive"
        );
        ensure!(self.routing.virtual_nodes > 0, "routing.virtual_nodes must be positive");
        for member in &self.members {
            ensure!(!member.id.is_empty(), "member at {} has an empty id", member.addr);
        }
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        self.node
            .id
            .as_deref()
            .map(NodeId::from)
            .unwrap_or_default()
    }

    pub fn local_node(&self) -> NodeInfo {
        NodeInfo::new(self.node_id(), self.node.bind, self.node.partitions.clone())
    }

    /// Configured members plus this node. The local entry wins over a member
    /// with the same id.
    pub fn initial_view(&self) -> MembershipView {
        let local = self.local_node();
        let local_id = local.id.clone();
        let members = self
            .members
            .iter()
            .filter(|m| NodeId::from(m.id.as_str()) != local_id)
            .map(|m| NodeInfo::new(m.id.as_str(), m.addr, m.partitions.clone()))
            .chain(std::iter::once(local));
        MembershipView::new(1, members)
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            timeout: Duration::from_millis(self.broker.timeout_ms),
            dispatch_concurrency: self.broker.dispatch_concurrency,
            max_window: self.broker.max_window,
            node_budget_margin: Duration::from_millis(self.broker.node_budget_margin_ms),
        }
    }

    pub fn partition_budget(&self) -> Duration {
        Duration::from_millis(self.executor.partition_budget_ms)
    }

    pub fn pruner(&self) -> Arc<dyn SegmentPruner> {
        match self.executor.retention_secs {
            Some(secs) => Arc::new(RetentionPruner::new(Duration::from_secs(secs))),
            None => Arc::new(KeepAll),
        }
    }
}
