//! Typed, read-only lookups of parent objects.

use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

use kube::runtime::reflector::{ObjectRef, Store};
use kube::Resource;
use rustc_hash::FxHashMap;
use sluice_core::KeyFunc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListerError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("lister unavailable: {0}")]
    Unavailable(String),
}

/// Keyed lookup of one resource kind.
pub trait Lister<P> {
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<P>, ListerError>;
}

impl<P> Lister<P> for Store<P>
where
    P: Resource + Clone + 'static,
    P::DynamicType: Default + Eq + Hash + Clone,
{
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<P>, ListerError> {
        let mut obj_ref = ObjectRef::<P>::new(name);
        if let Some(ns) = namespace {
            obj_ref = obj_ref.within(ns);
        }
        Store::get(self, &obj_ref).ok_or_else(|| ListerError::NotFound(obj_ref.to_string()))
    }
}

type Slot = (Option<String>, String);

/// Lister over a plain map, for wiring without a reflector and for tests.
pub struct MemoryLister<P> {
    items: RwLock<FxHashMap<Slot, Arc<P>>>,
}

impl<P> Default for MemoryLister<P> {
    fn default() -> Self {
        Self { items: RwLock::new(FxHashMap::default()) }
    }
}

impl<P: Resource> MemoryLister<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `obj` under its namespace/name, replacing any previous version.
    /// Objects without a name are ignored.
    pub fn insert(&self, obj: P) -> Option<Arc<P>> {
        let key = obj.work_key().ok()?;
        let slot = (key.namespace().map(str::to_string), key.name().to_string());
        self.items.write().unwrap_or_else(PoisonError::into_inner).insert(slot, Arc::new(obj))
    }

    pub fn remove(&self, namespace: Option<&str>, name: &str) -> Option<Arc<P>> {
        let slot = (namespace.map(str::to_string), name.to_string());
        self.items.write().unwrap_or_else(PoisonError::into_inner).remove(&slot)
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P> Lister<P> for MemoryLister<P> {
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<P>, ListerError> {
        let slot = (namespace.filter(|ns| !ns.is_empty()).map(str::to_string), name.to_string());
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&slot)
            .cloned()
            .ok_or_else(|| match namespace {
                Some(ns) => ListerError::NotFound(format!("{ns}/{name}")),
                None => ListerError::NotFound(name.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use sluice_core::crd::{Rollout, RolloutSpec};

    fn rollout(ns: &str, name: &str) -> Rollout {
        let mut r = Rollout::new(name, RolloutSpec::default());
        r.metadata = ObjectMeta { name: Some(name.into()), namespace: Some(ns.into()), ..Default::default() };
        r
    }

    #[test]
    fn memory_lister_roundtrip() {
        let l = MemoryLister::new();
        assert!(l.insert(rollout("default", "ro")).is_none());
        assert!(l.insert(rollout("default", "ro")).is_some(), "second insert replaces");
        assert_eq!(l.len(), 1);

        let found = l.get(Some("default"), "ro").unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("ro"));
        assert_eq!(l.get(Some("other"), "ro").unwrap_err(), ListerError::NotFound("other/ro".into()));

        assert!(l.remove(Some("default"), "ro").is_some());
        assert!(l.is_empty());
    }

    #[test]
    fn reflector_store_lookup() {
        let (reader, mut writer) = kube::runtime::reflector::store::<Rollout>();
        writer.apply_watcher_event(&kube::runtime::watcher::Event::Applied(rollout("default", "ro")));
        assert!(Lister::get(&reader, Some("default"), "ro").is_ok());
        assert!(matches!(Lister::get(&reader, Some("default"), "missing"), Err(ListerError::NotFound(_))));
    }
}
