//! Values delivered by the cluster cache.
//!
//! The cache fans every change out to every controller through one channel, so
//! the dispatch layer has to cope with objects it cannot decode. `Ingress` makes
//! those cases explicit instead of relying on runtime type tests.

/// One notification from the cluster cache.
#[derive(Debug, Clone)]
pub enum Ingress<K> {
    /// A live (or just deleted) object.
    Object(K),
    /// Last known state of an object whose delete was observed after a resync gap.
    Tombstone(Tombstone<K>),
    /// Anything else. The string describes what was received, for error reports.
    Foreign(String),
}

/// Placeholder for an object deleted while the watch was not observing it.
#[derive(Debug, Clone)]
pub struct Tombstone<K> {
    /// Key of the deleted object, as known to the cache.
    pub key: String,
    /// Last known state; `None` when the cache could not decode it.
    pub obj: Option<K>,
}

impl<K> Ingress<K> {
    pub fn foreign(what: impl Into<String>) -> Self {
        Ingress::Foreign(what.into())
    }

    pub fn tombstone(key: impl Into<String>, obj: Option<K>) -> Self {
        Ingress::Tombstone(Tombstone { key: key.into(), obj })
    }

    /// The domain object carried by this value, unwrapping tombstones.
    pub fn object(&self) -> Option<&K> {
        match self {
            Ingress::Object(o) => Some(o),
            Ingress::Tombstone(t) => t.obj.as_ref(),
            Ingress::Foreign(_) => None,
        }
    }
}

impl<K> From<K> for Ingress<K> {
    fn from(obj: K) -> Self {
        Ingress::Object(obj)
    }
}
