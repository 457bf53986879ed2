//! Stage contracts and the per-variant fan-out helper shared by every
//! `per-variant-parallel` stage.

pub mod caption;
pub mod creative_expert;
pub mod image_assessment;
pub mod image_eval;
pub mod image_generation;
pub mod prompt_assembly;
pub mod strategy;
pub mod style_adaptation;
pub mod style_guide;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::context::PipelineContext;
use crate::error::{Error, Result};

/// One stage in the registry. `execute` is the only method the Executor
/// calls; it receives a mutable borrow of the context so sequential stages
/// can read and write it directly, honoring single-writer discipline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()>;
}

/// Runs `task` once per variant index `0..n`, all started together and
/// awaited with an all-settled policy: one failure does not cancel siblings.
/// Results are returned in input order, not completion order, which is what
/// lets callers assign directly into a pre-sized `Vec` and keep the
/// index-alignment invariant.
pub async fn run_per_variant<F, Fut, T>(n: usize, task: F) -> Vec<Result<T>>
where
    F: Fn(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>> + Send,
    T: Send,
{
    let futures = (0..n).map(&task);
    join_all(futures).await
}

/// Like [`run_per_variant`], but each task first acquires a permit from
/// `worker_pool` before running, bounding the number of concurrently
/// in-flight provider calls to the configured worker pool size regardless of
/// how many variants were requested. Used by the per-variant stages that
/// actually call a provider.
pub async fn run_per_variant_bounded<F, Fut, T>(
    worker_pool: &Semaphore,
    n: usize,
    task: F,
) -> Vec<Result<T>>
where
    F: Fn(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>> + Send,
    T: Send,
{
    let futures = (0..n).map(|i| async move {
        let _permit = worker_pool
            .acquire()
            .await
            .map_err(|_| Error::contract_violation("executor", "worker pool semaphore closed"))?;
        task(i).await
    });
    join_all(futures).await
}
