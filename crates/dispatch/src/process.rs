//! One step of a worker: pop a key, sync it, settle it.

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use metrics::histogram;
use sluice_core::WorkKey;
use sluice_queue::RateLimitingQueue;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::ReconcileMetrics;

/// Reconciles one key. Errors are retried with backoff.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn sync(&self, key: &WorkKey) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> SyncHandler for F
where
    F: Fn(WorkKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn sync(&self, key: &WorkKey) -> anyhow::Result<()> {
        (self)(key.clone()).await
    }
}

/// Releases the processing mark however the attempt ends, panics included.
struct DoneGuard<'a> {
    queue: &'a RateLimitingQueue,
    key: &'a str,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(self.key);
    }
}

/// Process one key from `queue`. Returns `false` once the queue is shut down.
///
/// Keys that do not name a namespaced object are discarded for good, since
/// queueing them again would loop forever. Handler failures are recorded on
/// `metrics` and the key is re-added with backoff; successes clear the
/// backoff history.
pub async fn process_next_work_item<H>(
    queue: &RateLimitingQueue,
    controller: &str,
    handler: &H,
    metrics: Option<&dyn ReconcileMetrics>,
) -> bool
where
    H: SyncHandler + ?Sized,
{
    let Some(raw) = queue.get().await else { return false };
    let _done = DoneGuard { queue, key: &raw };

    let key = match WorkKey::parse_namespaced(&raw) {
        Ok(key) => key,
        Err(e) => {
            warn!(controller, key = %raw, error = %e, "discarding malformed work item");
            queue.forget(&raw);
            return true;
        }
    };

    let span = info_span!(
        "reconcile",
        controller,
        namespace = key.namespace().unwrap_or_default(),
        name = key.name()
    );
    let started = Instant::now();
    let result = async {
        debug!("started syncing");
        handler.sync(&key).await
    }
    .instrument(span)
    .await;
    let elapsed = started.elapsed();
    histogram!("controller_reconcile_duration_seconds", elapsed.as_secs_f64(), "controller" => controller.to_string());

    match result {
        Ok(()) => {
            info!(controller, key = %key, time_ms = elapsed.as_millis() as u64, "reconciliation completed");
            queue.forget(&raw);
        }
        Err(e) => {
            error!(controller, key = %key, error = ?e, "sync handler error");
            if let Some(m) = metrics {
                m.record_error(controller, &key);
            }
            queue.add_rate_limited(&raw);
        }
    }
    true
}
