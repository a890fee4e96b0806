// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Watch-driven local caches with add/update/delete callbacks.
//!
//! One [`WatchCache`] per resource type mirrors the cluster state into a map
//! keyed by work key and invokes the registered handler on every observed
//! change. Handlers may fire before the cache reflects the triggering event
//! elsewhere; reconcilers treat a missing object as already deleted.

use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Work key of an object: `namespace/name`, or `name` for cluster-scoped
/// resources.
pub fn object_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(namespace) => format!("{}/{}", namespace, obj.name_any()),
        None => obj.name_any(),
    }
}

/// Per-resource-type callbacks invoked synchronously from the watch loop.
pub trait WatchHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

/// Read-through cache of one resource type, kept current by [`WatchCache::run`].
pub struct WatchCache<K> {
    store: RwLock<HashMap<String, Arc<K>>>,
    synced: AtomicBool,
    synced_notify: Notify,
}

impl<K> WatchCache<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
            synced_notify: Notify::new(),
        })
    }

    /// Fetch an object by work key from the local cache.
    pub fn get(&self, key: &str) -> Option<Arc<K>> {
        self.store.read().unwrap().get(key).cloned()
    }

    /// True once the initial listing has been fully absorbed.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Suspend until the initial listing has been fully absorbed.
    pub async fn wait_until_synced(&self) {
        loop {
            if self.has_synced() {
                return;
            }
            let notified = self.synced_notify.notified();
            if self.has_synced() {
                return;
            }
            notified.await;
        }
    }

    /// Drive the watch stream forever, maintaining the cache and dispatching
    /// events to the handler.
    pub async fn run<H>(self: Arc<Self>, api: Api<K>, handler: Arc<H>)
    where
        H: WatchHandler<K>,
    {
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.absorb(event, handler.as_ref()),
                Err(e) => warn!("watch stream error: {}", e),
            }
        }
    }

    fn absorb<H: WatchHandler<K>>(&self, event: watcher::Event<K>, handler: &H) {
        match event {
            watcher::Event::Init => {}
            watcher::Event::InitApply(obj) | watcher::Event::Apply(obj) => {
                let key = object_key(&obj);
                let new = Arc::new(obj);
                let old = self
                    .store
                    .write()
                    .unwrap()
                    .insert(key, Arc::clone(&new));
                match old {
                    Some(old) => handler.on_update(&old, &new),
                    None => handler.on_add(&new),
                }
            }
            watcher::Event::InitDone => {
                if !self.synced.swap(true, Ordering::SeqCst) {
                    debug!("cache synced");
                }
                self.synced_notify.notify_waiters();
            }
            watcher::Event::Delete(obj) => {
                let key = object_key(&obj);
                self.store.write().unwrap().remove(&key);
                handler.on_delete(&obj);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, obj: K) {
        let key = object_key(&obj);
        self.store.write().unwrap().insert(key, Arc::new(obj));
    }
}
