use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kube::runtime::reflector::Store;
use kube::Resource;
use sluice_core::WorkKey;
use sluice_dispatch::{Lister, ListerError, SyncHandler};
use tracing::info;

/// Sync handler that reports what the cache holds for each key.
pub struct ObserveHandler<P: Resource<DynamicType = ()> + Clone + 'static> {
    store: Store<P>,
}

impl<P: Resource<DynamicType = ()> + Clone + 'static> ObserveHandler<P> {
    pub fn new(store: Store<P>) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

#[async_trait]
impl<P> SyncHandler for ObserveHandler<P>
where
    P: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn sync(&self, key: &WorkKey) -> Result<()> {
        match Lister::<P>::get(&self.store, key.namespace(), key.name()) {
            Ok(obj) => {
                let meta = obj.meta();
                info!(
                    kind = %P::kind(&()),
                    key = %key,
                    generation = ?meta.generation,
                    resource_version = ?meta.resource_version,
                    deleting = meta.deletion_timestamp.is_some(),
                    "observed"
                );
            }
            Err(ListerError::NotFound(_)) => info!(kind = %P::kind(&()), key = %key, "gone from cache"),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
