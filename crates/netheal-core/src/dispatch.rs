//! Parallel dispatcher
//!
//! Every fan-out (devices in a recon round, commands for per-command
//! insights, devices in a remediation plan, telemetry probes) gets its own
//! bounded pool:
//! - pool size is `min(item count, cap)`
//! - every item yields exactly one entry, in input order
//! - a panicking item becomes a `TaskFailure` for that item only

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// Why an item produced no value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task cancelled")]
    Cancelled,
}

impl From<JoinError> for TaskFailure {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            let payload = err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Self::Panicked(message)
        } else {
            Self::Cancelled
        }
    }
}

/// Pool size for `items` under `cap`; `None` means no cap
#[must_use]
pub fn pool_size(items: usize, cap: Option<usize>) -> usize {
    cap.map_or(items, |c| items.min(c)).max(1)
}

/// Run `work` over `items` concurrently
///
/// Results come back in input order with their keys.
pub async fn fan_out<K, I, R, F, Fut>(
    items: Vec<(K, I)>,
    max_concurrency: Option<usize>,
    work: F,
) -> Vec<(K, Result<R, TaskFailure>)>
where
    K: Send + 'static,
    I: Send + 'static,
    R: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let permits = Arc::new(Semaphore::new(pool_size(total, max_concurrency)));
    let work = Arc::new(work);

    let mut keys = Vec::with_capacity(total);
    let mut set = JoinSet::new();
    for (index, (key, item)) in items.into_iter().enumerate() {
        keys.push(key);
        let permits = Arc::clone(&permits);
        let work = Arc::clone(&work);
        set.spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            // Inner task so a panic is caught per item
            let outcome = tokio::spawn(async move { work(item).await })
                .await
                .map_err(TaskFailure::from);
            (index, outcome)
        });
    }

    let mut slots: Vec<Option<Result<R, TaskFailure>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = Some(outcome),
            Err(err) => tracing::error!(error = %err, "dispatcher task failed"),
        }
    }

    keys.into_iter()
        .zip(slots)
        .map(|(key, slot)| (key, slot.unwrap_or(Err(TaskFailure::Cancelled))))
        .collect()
}
