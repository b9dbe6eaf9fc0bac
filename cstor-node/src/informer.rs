//! Watch-backed cache for one resource kind.
//!
//! The informer turns the raw watch stream into typed [`Event`]s, keeps a
//! local copy of every object, and replays the whole cache as
//! `Update(obj, obj)` on every resync tick.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::crd::{object_key, CStorResource};

/// A change observed on one object.
#[derive(Debug, Clone)]
pub enum Event<K> {
    Add(K),
    Update { old: K, new: K },
    Delete(K),
}

/// Receives events as the cache applies them. Must not block.
pub trait EventHandler<K>: Send + Sync {
    fn on_event(&self, event: Event<K>);
}

/// Local, eventually consistent view of one kind.
pub struct Cache<K> {
    items: RwLock<HashMap<String, K>>,
    synced: AtomicBool,
}

impl<K: CStorResource> Cache<K> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    /// Fold one watch event into the cache and return what changed.
    pub fn apply(&self, event: watcher::Event<K>) -> Vec<Event<K>> {
        let mut items = self.items.write().unwrap_or_else(|p| p.into_inner());
        match event {
            watcher::Event::Applied(obj) => {
                let key = object_key(&obj);
                match items.insert(key, obj.clone()) {
                    Some(old) => vec![Event::Update { old, new: obj }],
                    None => vec![Event::Add(obj)],
                }
            }
            watcher::Event::Deleted(obj) => {
                items.remove(&object_key(&obj));
                vec![Event::Delete(obj)]
            }
            watcher::Event::Restarted(list) => {
                let mut events = Vec::with_capacity(list.len());
                let mut seen = HashSet::with_capacity(list.len());
                for obj in list {
                    let key = object_key(&obj);
                    seen.insert(key.clone());
                    match items.insert(key, obj.clone()) {
                        Some(old) => events.push(Event::Update { old, new: obj }),
                        None => events.push(Event::Add(obj)),
                    }
                }
                let stale: Vec<String> = items.keys().filter(|k| !seen.contains(*k)).cloned().collect();
                for key in stale {
                    if let Some(obj) = items.remove(&key) {
                        events.push(Event::Delete(obj));
                    }
                }
                self.synced.store(true, Ordering::SeqCst);
                events
            }
        }
    }

    /// Replay every cached object as an unchanged update.
    pub fn resync_events(&self) -> Vec<Event<K>> {
        self.list()
            .into_iter()
            .map(|obj| Event::Update {
                old: obj.clone(),
                new: obj,
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<K> {
        self.items
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    pub fn list(&self) -> Vec<K> {
        self.items
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

impl<K: CStorResource> Default for Cache<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a [`Cache`] from the API server watch stream.
pub struct Informer<K> {
    name: String,
    api: Api<K>,
    cache: Arc<Cache<K>>,
    handler: Arc<dyn EventHandler<K>>,
    resync: Duration,
}

impl<K: CStorResource> Informer<K> {
    pub fn new(
        name: impl Into<String>,
        api: Api<K>,
        cache: Arc<Cache<K>>,
        handler: Arc<dyn EventHandler<K>>,
        resync: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            api,
            cache,
            handler,
            resync,
        }
    }

    pub fn cache(&self) -> Arc<Cache<K>> {
        self.cache.clone()
    }

    /// Watch until `stop` fires.
    #[instrument(skip_all, fields(informer = %self.name))]
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut stream = watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        let mut resync = interval_at(Instant::now() + self.resync, self.resync);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(resync_secs = self.resync.as_secs(), "Informer started");

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        for ev in self.cache.apply(event) {
                            self.handler.on_event(ev);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "Watch stream error"),
                    None => {
                        warn!("Watch stream ended");
                        break;
                    }
                },
                _ = resync.tick() => {
                    if self.cache.is_synced() {
                        let events = self.cache.resync_events();
                        debug!(count = events.len(), "Periodic resync");
                        for ev in events {
                            self.handler.on_event(ev);
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Informer stopped");
    }
}
