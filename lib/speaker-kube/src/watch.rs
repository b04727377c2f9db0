//! Watches feeding reflector stores and, optionally, change events

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::watcher::{self, Event};
use kube_runtime::{reflector, WatchStreamExt};
use serde::de::DeserializeOwned;
use speaker_core::ResourceEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ReflectorCache;

type ObjectKey = (String, String);

fn object_key<K: Resource>(obj: &K) -> ObjectKey {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Turns raw watcher events into add/update/delete notifications.
///
/// The watcher only reports "applied" and "deleted", and a relist after a
/// watch gap silently drops objects deleted in between. The classifier keeps
/// the last version of every object so it can tell adds from updates and
/// synthesize deletes for objects missing from a relist.
pub struct EventClassifier<K> {
    known: HashMap<ObjectKey, Arc<K>>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl<K> Default for EventClassifier<K> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisted: None,
        }
    }
}

impl<K: Resource> EventClassifier<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, event: Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                let key = object_key(&obj);
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(key.clone());
                }
                vec![self.apply(key, obj)]
            }
            Event::Apply(obj) => {
                let key = object_key(&obj);
                vec![self.apply(key, obj)]
            }
            Event::Delete(obj) => {
                self.known.remove(&object_key(&obj));
                vec![ResourceEvent::Deleted(Arc::new(obj))]
            }
            Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<ObjectKey> = self
                    .known
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(ResourceEvent::Deleted)
                    .collect()
            }
        }
    }

    fn apply(&mut self, key: ObjectKey, obj: K) -> ResourceEvent<K> {
        let new = Arc::new(obj);
        match self.known.insert(key, new.clone()) {
            Some(old) => ResourceEvent::Updated { old, new },
            None => ResourceEvent::Added(new),
        }
    }

    /// Number of objects currently tracked
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// Start watching `api`, keeping a reflector store up to date until `token`
/// is cancelled. When `events` is given, every change is also classified and
/// sent there. The channel is unbounded: the reflector only becomes ready
/// once the whole initial list has been read, and a send waiting on a slow
/// consumer would hold that up.
pub fn watch_resource<K>(
    api: Api<K>,
    config: watcher::Config,
    events: Option<mpsc::UnboundedSender<ResourceEvent<K>>>,
    token: CancellationToken,
) -> (ReflectorCache<K>, JoinHandle<()>)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let stream = watcher::watcher(api, config).default_backoff().reflect(writer);
    let kind = K::kind(&()).to_string();

    let handle = tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        let mut classifier = EventClassifier::new();
        info!(kind = %kind, "Watch started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        let Some(tx) = events.as_ref() else { continue };
                        for change in classifier.classify(event) {
                            if tx.send(change).is_err() {
                                debug!(kind = %kind, "Event receiver dropped");
                            }
                        }
                    }
                    Some(Err(e)) => warn!(kind = %kind, "Watch error, retrying: {}", e),
                    None => break,
                },
            }
        }
        info!(kind = %kind, "Watch stopped");
    });

    (ReflectorCache::new(reader), handle)
}
