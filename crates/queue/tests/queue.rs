#![forbid(unsafe_code)]

use std::time::Duration;

use sluice_queue::{ItemExponentialFailureRateLimiter, RateLimiterConfig, RateLimitingQueue};

fn queue() -> RateLimitingQueue {
    RateLimitingQueue::with_config("Rollouts", &RateLimiterConfig::default())
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test]
async fn add_dedups_waiting_keys_and_keeps_fifo() {
    let q = queue();
    q.add("ns/a");
    q.add("ns/b");
    q.add("ns/a");
    assert_eq!(q.len(), 2);
    assert_eq!(q.get().await.as_deref(), Some("ns/a"));
    assert_eq!(q.get().await.as_deref(), Some("ns/b"));
    assert!(q.is_empty());
}

#[tokio::test]
async fn readd_during_processing_waits_for_done() {
    let q = queue();
    q.add("ns/a");
    let key = q.get().await.unwrap();

    // same key again while a worker holds it: coalesced, not handed out
    q.add("ns/a");
    q.add("ns/a");
    assert_eq!(q.len(), 0);

    q.done(&key);
    assert_eq!(q.len(), 1);
    assert_eq!(q.get().await.as_deref(), Some("ns/a"));
    q.done("ns/a");
    assert_eq!(q.len(), 0);
}

#[tokio::test]
async fn get_waits_for_add() {
    let q = queue();
    let waiter = tokio::spawn({
        let q = q.clone();
        async move { q.get().await }
    });
    sleep_ms(20).await;
    q.add("ns/late");
    assert_eq!(waiter.await.unwrap().as_deref(), Some("ns/late"));
}

#[tokio::test]
async fn shutdown_wakes_waiters_and_rejects_adds() {
    let q = queue();
    let waiter = tokio::spawn({
        let q = q.clone();
        async move { q.get().await }
    });
    sleep_ms(10).await;
    q.shutdown();
    q.shutdown();
    assert_eq!(waiter.await.unwrap(), None);

    q.add("ns/a");
    q.add_after("ns/b", Duration::from_millis(1));
    q.add_rate_limited("ns/c");
    sleep_ms(50).await;
    assert_eq!(q.len(), 0);
    assert_eq!(q.get().await, None);
}

#[tokio::test]
async fn shutdown_stops_handing_out_queued_keys() {
    let q = queue();
    q.add("ns/a");
    let key = q.get().await.unwrap();
    q.add("ns/a");
    q.add("ns/b");
    q.shutdown();
    assert_eq!(q.get().await, None);
    // releasing a dirty key after shutdown does not grow the queue
    let before = q.len();
    q.done(&key);
    assert_eq!(q.len(), before);
}

#[tokio::test]
async fn add_after_delays_insertion() {
    let q = queue();
    q.add_after("ns/a", Duration::from_millis(20));
    assert_eq!(q.len(), 0);
    sleep_ms(80).await;
    assert_eq!(q.len(), 1);
}

#[tokio::test]
async fn add_after_zero_is_immediate() {
    let q = queue();
    q.add_after("ns/a", Duration::ZERO);
    assert_eq!(q.len(), 1);
}

#[tokio::test]
async fn add_after_keeps_earliest_deadline() {
    let q = queue();
    q.add_after("ns/a", Duration::from_millis(300));
    q.add_after("ns/a", Duration::from_millis(10));
    sleep_ms(60).await;
    assert_eq!(q.len(), 1);
    let key = q.get().await.unwrap();
    q.done(&key);
    // the superseded 300ms entry must not bring the key back
    sleep_ms(400).await;
    assert_eq!(q.len(), 0);
}

#[tokio::test]
async fn add_after_coalesces_with_add() {
    let q = queue();
    q.add_after("ns/a", Duration::from_millis(10));
    q.add("ns/a");
    assert_eq!(q.len(), 1);
    sleep_ms(50).await;
    assert_eq!(q.len(), 1);
}

#[tokio::test]
async fn rate_limited_adds_back_off_until_forget() {
    let q = RateLimitingQueue::new(
        "Experiments",
        ItemExponentialFailureRateLimiter::new(Duration::from_millis(20), Duration::from_secs(1)),
    );
    q.add_rate_limited("ns/a");
    assert_eq!(q.len(), 0);
    assert_eq!(q.num_requeues("ns/a"), 1);
    sleep_ms(80).await;
    assert_eq!(q.len(), 1);

    let key = q.get().await.unwrap();
    q.done(&key);
    q.add_rate_limited(&key);
    assert_eq!(q.num_requeues(&key), 2);
    // second failure waits 40ms
    sleep_ms(10).await;
    assert_eq!(q.len(), 0);
    sleep_ms(90).await;
    assert_eq!(q.len(), 1);

    q.forget(&key);
    assert_eq!(q.num_requeues(&key), 0);
}

#[tokio::test]
async fn bounded_queue_drops_new_keys_when_full() {
    let q = RateLimitingQueue::bounded(
        "Rollouts",
        2,
        ItemExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1)),
    );
    q.add("ns/a");
    q.add("ns/b");
    q.add("ns/c");
    q.add("ns/a");
    assert_eq!(q.len(), 2);
    assert_eq!(q.dropped(), 1);
}
