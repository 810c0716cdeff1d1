//! Sluice kubehub: discovery checks and watcher wiring into the dispatch layer.

#![forbid(unsafe_code)]

use std::fmt::Debug;

use anyhow::{anyhow, Result};
use futures::StreamExt;
use kube::{
    api::Api,
    discovery::Discovery,
    runtime::{
        reflector::{self, store::Writer},
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client, Resource,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use sluice_core::{ErrorSink, Ingress, KeyFunc};
use sluice_dispatch::enqueue;
use sluice_queue::RateLimitingQueue;
use tracing::{debug, info, warn};

/// Fail unless the cluster serves `K` at the version this build speaks.
pub async fn ensure_served<K>(client: Client) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    let (group, version, kind) = (K::group(&()), K::version(&()), K::kind(&()));
    let discovery = Discovery::new(client).filter(&[group.as_ref()]).run().await?;
    for g in discovery.groups() {
        if g.name() != group.as_ref() {
            continue;
        }
        if g.versioned_resources(version.as_ref()).iter().any(|(ar, _)| ar.kind == kind.as_ref()) {
            debug!(group = %group, version = %version, kind = %kind, "resource served");
            return Ok(());
        }
    }
    Err(anyhow!("{}/{}/{} is not served by the cluster; is the CRD installed?", group, version, kind))
}

/// List+watch a parent kind into `writer` and enqueue every object it reports.
///
/// Deletes are enqueued too, so the sync handler observes the object gone from
/// the store. That includes parents deleted while the watch was down, which
/// only show up as missing from the relist. Returns when the watch stream ends.
pub async fn watch_parents<P>(api: Api<P>, writer: Writer<P>, queue: RateLimitingQueue, errors: ErrorSink) -> Result<()>
where
    P: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default()).default_backoff());
    futures::pin_mut!(stream);
    let mut tracker = RelistTracker::default();
    info!(kind = %P::kind(&()), queue = %queue.name(), "parent watcher started");
    while let Some(ev) = stream.next().await {
        match ev {
            Ok(ev) => enqueue_parent_event(&mut tracker, ev, &queue, &errors),
            Err(e) => warn!(error = %e, kind = %P::kind(&()), "watch error; backing off"),
        }
    }
    warn!(kind = %P::kind(&()), known = tracker.len(), "parent watcher stream ended");
    Ok(())
}

/// Enqueue the key of every object `ev` touches, including tombstoned ones.
pub fn enqueue_parent_event<P: Resource + Clone>(
    tracker: &mut RelistTracker<P>,
    ev: Event<P>,
    queue: &RateLimitingQueue,
    errors: &ErrorSink,
) {
    for ingress in tracker.observe(ev) {
        enqueue(&ingress, queue, errors);
    }
}

/// List+watch a child kind and hand every change to `on_event`.
///
/// After a watch restart, children that were known before but are missing
/// from the relist are delivered as tombstones carrying their last known state.
pub async fn watch_children<K, F>(api: Api<K>, mut on_event: F) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
    F: FnMut(&Ingress<K>),
{
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    let mut tracker = RelistTracker::default();
    info!(kind = %K::kind(&()), "child watcher started");
    while let Some(ev) = stream.next().await {
        match ev {
            Ok(ev) => {
                for ingress in tracker.observe(ev) {
                    on_event(&ingress);
                }
            }
            Err(e) => warn!(error = %e, kind = %K::kind(&()), "watch error; backing off"),
        }
    }
    warn!(kind = %K::kind(&()), known = tracker.len(), "child watcher stream ended");
    Ok(())
}

/// Last known state of every watched object, used to notice deletes missed
/// across a watch restart.
pub struct RelistTracker<K> {
    known: FxHashMap<String, K>,
}

impl<K> Default for RelistTracker<K> {
    fn default() -> Self {
        Self { known: FxHashMap::default() }
    }
}

impl<K: Resource + Clone> RelistTracker<K> {
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Translate one watch event into the values to dispatch, tombstones first.
    pub fn observe(&mut self, ev: Event<K>) -> Vec<Ingress<K>> {
        match ev {
            Event::Applied(o) => {
                if let Ok(key) = o.work_key() {
                    self.known.insert(key.to_string(), o.clone());
                }
                vec![Ingress::Object(o)]
            }
            Event::Deleted(o) => {
                if let Ok(key) = o.work_key() {
                    self.known.remove(&key.to_string());
                }
                vec![Ingress::Object(o)]
            }
            Event::Restarted(list) => {
                let mut relisted: FxHashMap<String, K> = FxHashMap::default();
                for o in &list {
                    if let Ok(key) = o.work_key() {
                        relisted.insert(key.to_string(), o.clone());
                    }
                }
                let listed: FxHashSet<&String> = relisted.keys().collect();
                let mut gone: Vec<(String, K)> = self
                    .known
                    .drain()
                    .filter(|(key, _)| !listed.contains(key))
                    .collect();
                gone.sort_by(|a, b| a.0.cmp(&b.0));
                if !gone.is_empty() {
                    debug!(count = gone.len(), "objects deleted while not watching");
                }
                self.known = relisted;

                let mut out: Vec<Ingress<K>> = gone.into_iter().map(|(key, o)| Ingress::tombstone(key, Some(o))).collect();
                out.extend(list.into_iter().map(Ingress::Object));
                out
            }
        }
    }
}
