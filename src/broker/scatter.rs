//! Generic scatter/gather skeleton.
//!
//! A [`ScatterGather`] knows nothing about search. It sends one request per
//! target node, collects whatever answers before the deadline and folds the
//! answers with an injected `merge` function. Callers decide how failures are
//! reported in their own result type.

use crate::membership::types::NodeInfo;

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Performs one node call.
pub type CallFn<Req, Res> = Arc<dyn Fn(NodeInfo, Req) -> BoxFuture<anyhow::Result<Res>> + Send + Sync>;

pub type MergeFn<Res> = Box<dyn Fn(Vec<Res>) -> Res + Send + Sync>;

pub type EmptyFn<Res> = Box<dyn Fn() -> Res + Send + Sync>;

/// Why one node contributed nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeFailure {
    /// No answer before the deadline.
    Timeout { waited: Duration },
    /// The call itself failed.
    Failed { message: String },
}

pub struct Gathered<Res> {
    pub result: Res,
    /// Nodes that answered in time.
    pub responded: usize,
    /// Failed targets, in dispatch order.
    pub failures: Vec<(NodeInfo, NodeFailure)>,
    /// Set when `merge` panicked; `result` is then the empty result.
    pub merge_failure: Option<String>,
    /// Time spent inside `merge`. Zero when nothing answered.
    pub merge_elapsed: Duration,
}

pub struct ScatterGather<Req, Res> {
    permits: Arc<Semaphore>,
    merge: MergeFn<Res>,
    empty: EmptyFn<Res>,
    _request: std::marker::PhantomData<fn(Req)>,
}

impl<Req, Res> ScatterGather<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// `permits` bounds concurrent outgoing calls and is usually shared by
    /// every request a broker handles.
    pub fn new(
        permits: Arc<Semaphore>,
        merge: impl Fn(Vec<Res>) -> Res + Send + Sync + 'static,
        empty: impl Fn() -> Res + Send + Sync + 'static,
    ) -> Self {
        Self {
            permits,
            merge: Box::new(merge),
            empty: Box::new(empty),
            _request: std::marker::PhantomData,
        }
    }

    /// Dispatches every target concurrently and gathers until `deadline`.
    ///
    /// Late calls are not cancelled; their answers are dropped.
    pub async fn run(
        &self,
        targets: Vec<(NodeInfo, Req)>,
        call: CallFn<Req, Res>,
        deadline: Instant,
    ) -> Gathered<Res> {
        let started = Instant::now();
        let handles: Vec<(NodeInfo, tokio::task::JoinHandle<anyhow::Result<Res>>)> = targets
            .into_iter()
            .map(|(node, request)| {
                let permits = self.permits.clone();
                let call = call.clone();
                let target = node.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| anyhow::anyhow!("dispatcher is shutting down"))?;
                    call(target, request).await
                });
                (node, handle)
            })
            .collect();

        let mut responses = Vec::with_capacity(handles.len());
        let mut failures = Vec::new();

        for (node, handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(Ok(response))) => responses.push(response),
                Ok(Ok(Err(e))) => {
                    tracing::warn!("Node {} ({}) failed: {:#}", node.id, node.addr, e);
                    failures.push((
                        node,
                        NodeFailure::Failed {
                            message: format!("{:#}", e),
                        },
                    ));
                }
                Ok(Err(join_error)) => {
                    tracing::warn!("Call to node {} aborted: {}", node.id, join_error);
                    failures.push((
                        node,
                        NodeFailure::Failed {
                            message: format!("call aborted: {}", join_error),
                        },
                    ));
                }
                Err(_) => {
                    tracing::warn!("Node {} did not answer in time", node.id);
                    failures.push((
                        node,
                        NodeFailure::Timeout {
                            waited: started.elapsed(),
                        },
                    ));
                }
            }
        }

        let responded = responses.len();
        if responded == 0 {
            return Gathered {
                result: (self.empty)(),
                responded,
                failures,
                merge_failure: None,
                merge_elapsed: Duration::ZERO,
            };
        }

        let merge_start = Instant::now();
        let merged = catch_unwind(AssertUnwindSafe(|| (self.merge)(responses)));
        let merge_elapsed = merge_start.elapsed();
        match merged {
            Ok(result) => Gathered {
                result,
                responded,
                failures,
                merge_failure: None,
                merge_elapsed,
            },
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Merging {} responses panicked: {}", responded, message);
                Gathered {
                    result: (self.empty)(),
                    responded,
                    failures,
                    merge_failure: Some(message),
                    merge_elapsed,
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "merge panicked".to_string()
    }
}

