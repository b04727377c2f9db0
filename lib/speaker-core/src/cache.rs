//! Read-through resource caches and the change events they emit

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tokio::sync::watch;

use crate::{Result, SpeakerError};

/// In-memory view of one resource kind, kept up to date by a watch.
#[async_trait]
pub trait ResourceCache<K>: Send + Sync {
    /// Every cached object
    fn list(&self) -> Result<Vec<Arc<K>>>;

    /// Look up one object; a missing object is [`SpeakerError::NotFound`]
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<K>>;

    /// Resolve once the initial list has been loaded
    async fn wait_for_sync(&self) -> Result<()>;
}

/// A change observed by a watch
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

type ObjectKey = (String, String);

fn object_key<K: Resource>(obj: &K) -> ObjectKey {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Cache backed by a map, filled by hand. Used by tests and for resource
/// kinds the current mode does not watch.
pub struct MemoryCache<K> {
    objects: RwLock<BTreeMap<ObjectKey, Arc<K>>>,
    list_error: RwLock<Option<String>>,
    synced: watch::Sender<bool>,
}

impl<K> MemoryCache<K>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    /// An empty, already synced cache
    pub fn new() -> Self {
        let (synced, _) = watch::channel(true);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            list_error: RwLock::new(None),
            synced,
        }
    }

    /// An empty cache that blocks [`ResourceCache::wait_for_sync`] until
    /// [`MemoryCache::mark_synced`] is called
    pub fn unsynced() -> Self {
        let cache = Self::new();
        cache.synced.send_replace(false);
        cache
    }

    pub fn from_objects(objects: impl IntoIterator<Item = K>) -> Self {
        let cache = Self::new();
        for obj in objects {
            cache.insert(obj);
        }
        cache
    }

    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    /// Insert or replace an object, returning the previous version
    pub fn insert(&self, obj: K) -> Option<Arc<K>> {
        let key = object_key(&obj);
        self.objects
            .write()
            .ok()
            .and_then(|mut objects| objects.insert(key, Arc::new(obj)))
    }

    pub fn remove(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let key = (namespace.unwrap_or_default().to_string(), name.to_string());
        self.objects
            .write()
            .ok()
            .and_then(|mut objects| objects.remove(&key))
    }

    /// Make `list` fail with `reason` until cleared with `None`
    pub fn fail_list(&self, reason: Option<&str>) {
        if let Ok(mut err) = self.list_error.write() {
            *err = reason.map(str::to_string);
        }
    }
}

impl<K> Default for MemoryCache<K>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K> ResourceCache<K> for MemoryCache<K>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    fn list(&self) -> Result<Vec<Arc<K>>> {
        let kind = K::kind(&()).to_string();
        if let Some(reason) = self.list_error.read().ok().and_then(|e| e.clone()) {
            return Err(SpeakerError::List { kind, reason });
        }
        let objects = self.objects.read().map_err(|_| SpeakerError::List {
            kind,
            reason: "cache lock poisoned".to_string(),
        })?;
        Ok(objects.values().cloned().collect())
    }

    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<K>> {
        let key = (namespace.unwrap_or_default().to_string(), name.to_string());
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(&key).cloned())
            .ok_or_else(|| SpeakerError::not_found(K::kind(&()), name))
    }

    async fn wait_for_sync(&self) -> Result<()> {
        let mut rx = self.synced.subscribe();
        rx.wait_for(|synced| *synced)
            .await
            .map(|_| ())
            .map_err(|_| SpeakerError::CacheSync(K::kind(&()).to_string()))
    }
}
