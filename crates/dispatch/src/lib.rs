//! Sluice dispatch: turns cache notifications into queued work keys and drives
//! sync handlers from the queue.
//!
//! Data flow: cache event → [`enqueue_parent_object`] (children only) →
//! [`enqueue`] and friends → [`RateLimitingQueue`] → [`process_next_work_item`]
//! → [`SyncHandler`].
//!
//! [`RateLimitingQueue`]: sluice_queue::RateLimitingQueue

#![forbid(unsafe_code)]

pub mod enqueue;
pub mod lister;
pub mod metrics;
pub mod process;
pub mod resolve;
pub mod worker;

pub use enqueue::{enqueue, enqueue_after, enqueue_rate_limited};
pub use lister::{Lister, ListerError, MemoryLister};
pub use metrics::{PrometheusMetrics, ReconcileMetrics};
pub use process::{process_next_work_item, SyncHandler};
pub use resolve::enqueue_parent_object;
pub use worker::{run_worker, spawn_workers};
