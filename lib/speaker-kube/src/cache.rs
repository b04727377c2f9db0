//! Resource caches backed by kube reflector stores

use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource;
use kube_runtime::reflector::{ObjectRef, Store};
use speaker_core::{ResourceCache, Result, SpeakerError};

/// [`ResourceCache`] reading from a reflector [`Store`]
#[derive(Clone)]
pub struct ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
}

impl<K> ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn new(store: Store<K>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<K> ResourceCache<K> for ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn list(&self) -> Result<Vec<Arc<K>>> {
        Ok(self.store.state())
    }

    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<K>> {
        let mut key = ObjectRef::new(name);
        if let Some(ns) = namespace {
            key = key.within(ns);
        }
        self.store
            .get(&key)
            .ok_or_else(|| SpeakerError::not_found(K::kind(&()), name))
    }

    async fn wait_for_sync(&self) -> Result<()> {
        self.store
            .wait_until_ready()
            .await
            .map_err(|e| SpeakerError::CacheSync(format!("{}: {}", K::kind(&()), e)))
    }
}
