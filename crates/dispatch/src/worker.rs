//! Worker pool draining a queue until it shuts down.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use sluice_queue::RateLimitingQueue;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::{process_next_work_item, ReconcileMetrics, SyncHandler};

const RESTART_DELAY: Duration = Duration::from_secs(1);

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Process keys until the queue shuts down. A panicking handler is logged and
/// the loop resumes after a short pause; its key was already released.
pub async fn run_worker<H>(
    queue: RateLimitingQueue,
    controller: String,
    handler: Arc<H>,
    metrics: Option<Arc<dyn ReconcileMetrics>>,
) where
    H: SyncHandler + ?Sized,
{
    loop {
        let drained = AssertUnwindSafe(async {
            while process_next_work_item(&queue, &controller, handler.as_ref(), metrics.as_deref()).await {}
        })
        .catch_unwind()
        .await;
        match drained {
            Ok(()) => break,
            Err(panic) => {
                error!(controller = %controller, panic = panic_message(panic.as_ref()), "worker panicked; restarting");
                if queue.is_shutting_down() {
                    break;
                }
                tokio::time::sleep(RESTART_DELAY).await;
            }
        }
    }
    debug!(controller = %controller, "worker stopped");
}

/// Start `count` workers on the current runtime.
pub fn spawn_workers<H>(
    count: usize,
    queue: &RateLimitingQueue,
    controller: &str,
    handler: Arc<H>,
    metrics: Option<Arc<dyn ReconcileMetrics>>,
) -> Vec<JoinHandle<()>>
where
    H: SyncHandler + ?Sized + 'static,
{
    (0..count.max(1))
        .map(|_| {
            tokio::spawn(run_worker(
                queue.clone(),
                controller.to_string(),
                Arc::clone(&handler),
                metrics.clone(),
            ))
        })
        .collect()
}
