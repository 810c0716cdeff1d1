//! Push an object's key into a queue, now, later, or after backoff.
//!
//! All three share one policy: a value without a usable key is reported to the
//! error sink exactly once and nothing is enqueued.

use std::time::Duration;

use sluice_core::{ErrorSink, KeyFunc, WorkKey};
use sluice_queue::RateLimitingQueue;

fn key_or_report<T: KeyFunc + ?Sized>(obj: &T, errors: &ErrorSink) -> Option<WorkKey> {
    match obj.work_key() {
        Ok(key) => Some(key),
        Err(e) => {
            errors.report(e.into());
            None
        }
    }
}

pub fn enqueue<T: KeyFunc + ?Sized>(obj: &T, queue: &RateLimitingQueue, errors: &ErrorSink) {
    if let Some(key) = key_or_report(obj, errors) {
        queue.add(&key.to_string());
    }
}

pub fn enqueue_after<T: KeyFunc + ?Sized>(obj: &T, delay: Duration, queue: &RateLimitingQueue, errors: &ErrorSink) {
    if let Some(key) = key_or_report(obj, errors) {
        queue.add_after(&key.to_string(), delay);
    }
}

pub fn enqueue_rate_limited<T: KeyFunc + ?Sized>(obj: &T, queue: &RateLimitingQueue, errors: &ErrorSink) {
    if let Some(key) = key_or_report(obj, errors) {
        queue.add_rate_limited(&key.to_string());
    }
}
