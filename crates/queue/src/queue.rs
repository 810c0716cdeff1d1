//! Deduplicating work queue with delayed and rate-limited adds.
//!
//! A key is in at most one of three places: waiting in `queue`, held by a
//! worker (`processing`), or both marked `dirty` and `processing` when it was
//! re-added while a worker held it. In that last case it goes back into
//! `queue` on `done`, so a key is never handed to two workers at once.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::limiter::{default_controller_rate_limiter, RateLimiter, RateLimiterConfig};

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: FxHashSet<String>,
    processing: FxHashSet<String>,
    queued_at: FxHashMap<String, Instant>,
    started_at: FxHashMap<String, Instant>,
    dropped: u64,
    shutting_down: bool,
}

struct Delayed {
    key: String,
    ready_at: Instant,
}

struct Inner {
    name: String,
    cap: usize,
    state: Mutex<State>,
    ready: Notify,
    limiter: Box<dyn RateLimiter>,
    delay_tx: Mutex<Option<mpsc::UnboundedSender<Delayed>>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn depth(&self, st: &State) {
        gauge!("workqueue_depth", st.queue.len() as f64, "name" => self.name.clone());
    }

    fn add(&self, key: &str) {
        let mut st = self.lock();
        if st.shutting_down || st.dirty.contains(key) {
            return;
        }
        if !st.processing.contains(key) && st.queue.len() >= self.cap {
            st.dropped += 1;
            counter!("workqueue_dropped_total", 1u64, "name" => self.name.clone());
            warn!(queue = %self.name, key, cap = self.cap, "work queue full; dropping key");
            return;
        }
        counter!("workqueue_adds_total", 1u64, "name" => self.name.clone());
        st.dirty.insert(key.to_string());
        if st.processing.contains(key) {
            // picked up again by done()
            return;
        }
        st.queued_at.insert(key.to_string(), Instant::now());
        st.queue.push_back(key.to_string());
        self.depth(&st);
        drop(st);
        self.ready.notify_one();
    }
}

/// Work queue of `namespace/name` keys shared by producers and workers.
///
/// Cloning yields another handle to the same queue. Construction spawns the
/// timer task behind [`add_after`](Self::add_after), so it must happen inside a
/// Tokio runtime. The task stops on [`shutdown`](Self::shutdown) or once every
/// handle is dropped.
#[derive(Clone)]
pub struct RateLimitingQueue {
    inner: Arc<Inner>,
}

impl RateLimitingQueue {
    pub fn new(name: impl Into<String>, limiter: impl RateLimiter + 'static) -> Self {
        Self::build(name.into(), usize::MAX, Box::new(limiter))
    }

    /// Queue using [`default_controller_rate_limiter`].
    pub fn with_config(name: impl Into<String>, cfg: &RateLimiterConfig) -> Self {
        Self::new(name, default_controller_rate_limiter(cfg))
    }

    /// Queue that drops new keys while `cap` keys are already waiting.
    pub fn bounded(name: impl Into<String>, cap: usize, limiter: impl RateLimiter + 'static) -> Self {
        Self::build(name.into(), cap.max(1), Box::new(limiter))
    }

    fn build(name: String, cap: usize, limiter: Box<dyn RateLimiter>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            name,
            cap,
            state: Mutex::new(State::default()),
            ready: Notify::new(),
            limiter,
            delay_tx: Mutex::new(Some(tx)),
        });
        tokio::spawn(waiting_loop(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Keys ready to be handed out (excludes delayed and in-flight keys).
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Enqueue now. A key already waiting keeps its position; a key being
    /// processed is queued again once its worker calls [`done`](Self::done).
    pub fn add(&self, key: &str) {
        self.inner.add(key);
    }

    /// Enqueue once `delay` has passed. Pending delays for the same key collapse
    /// to the earliest deadline.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let tx = self.inner.delay_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(Delayed { key: key.to_string(), ready_at: Instant::now() + delay });
        }
    }

    /// Enqueue after the limiter's backoff for `key`.
    pub fn add_rate_limited(&self, key: &str) {
        counter!("workqueue_retries_total", 1u64, "name" => self.inner.name.clone());
        let delay = self.inner.limiter.when(key);
        debug!(queue = %self.inner.name, key, delay_ms = delay.as_millis() as u64, "rate limited re-add");
        self.add_after(key, delay);
    }

    /// Clear the limiter's history for `key`.
    pub fn forget(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Wait for the next key; `None` once the queue is shut down.
    ///
    /// The returned key counts as processing until [`done`](Self::done).
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.ready.notified();
            tokio::pin!(notified);
            // register before looking at the state so a shutdown in between is not missed
            notified.as_mut().enable();
            {
                let mut st = self.inner.lock();
                if st.shutting_down {
                    return None;
                }
                if let Some(key) = st.queue.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    if let Some(at) = st.queued_at.remove(&key) {
                        histogram!("workqueue_queue_duration_seconds", at.elapsed().as_secs_f64(), "name" => self.inner.name.clone());
                    }
                    st.started_at.insert(key.clone(), Instant::now());
                    self.inner.depth(&st);
                    if !st.queue.is_empty() {
                        self.inner.ready.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Release a key obtained from [`get`](Self::get).
    pub fn done(&self, key: &str) {
        let mut st = self.inner.lock();
        st.processing.remove(key);
        if let Some(at) = st.started_at.remove(key) {
            histogram!("workqueue_work_duration_seconds", at.elapsed().as_secs_f64(), "name" => self.inner.name.clone());
        }
        if st.shutting_down || !st.dirty.contains(key) {
            return;
        }
        st.queued_at.insert(key.to_string(), Instant::now());
        st.queue.push_back(key.to_string());
        self.inner.depth(&st);
        drop(st);
        self.inner.ready.notify_one();
    }

    /// Stop handing out and accepting keys. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut st = self.inner.lock();
            if st.shutting_down {
                return;
            }
            st.shutting_down = true;
        }
        self.inner.delay_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.inner.ready.notify_waiters();
        info!(queue = %self.inner.name, "work queue shut down");
    }
}

impl fmt::Debug for RateLimitingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.lock();
        f.debug_struct("RateLimitingQueue")
            .field("name", &self.inner.name)
            .field("len", &st.queue.len())
            .field("processing", &st.processing.len())
            .field("shutting_down", &st.shutting_down)
            .finish()
    }
}

/// Holds delayed keys until their deadline, then adds them to the queue.
async fn waiting_loop(queue: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Delayed>) {
    let mut heap: BinaryHeap<Reverse<(Instant, u64, String)>> = BinaryHeap::new();
    // earliest deadline per key; heap entries that disagree are stale
    let mut pending: FxHashMap<String, Instant> = FxHashMap::default();
    let mut seq = 0u64;
    loop {
        let now = Instant::now();
        while heap.peek().is_some_and(|Reverse((at, _, _))| *at <= now) {
            let Some(Reverse((at, _, key))) = heap.pop() else { break };
            if pending.get(&key) != Some(&at) {
                continue;
            }
            pending.remove(&key);
            match queue.upgrade() {
                Some(q) => q.add(&key),
                None => return,
            }
        }
        let next = heap.peek().map(|Reverse((at, _, _))| *at);
        tokio::select! {
            maybe = rx.recv() => {
                match maybe {
                    Some(d) => {
                        let earlier = pending.get(&d.key).map_or(true, |at| d.ready_at < *at);
                        if earlier {
                            seq += 1;
                            pending.insert(d.key.clone(), d.ready_at);
                            heap.push(Reverse((d.ready_at, seq, d.key)));
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(next.unwrap_or(now)), if next.is_some() => {}
        }
    }
    debug!(pending = pending.len(), "delaying loop stopped");
}
