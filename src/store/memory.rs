//! In-process [`SharedStore`] backed by a single JSON document.
//!
//! One mutex linearizes every mutation, which gives the per-path ordering
//! guarantee for free. Watchers are notified synchronously from the
//! mutating call by diffing the document before and after.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;

use super::{StoreEvent, TransactionUpdate, WatchKind, WatchStream};
use crate::error::StoreError;
use crate::store::SharedStore;

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    root: Value,
    watchers: Vec<Watcher>,
    disconnect_removals: Vec<String>,
}

struct Watcher {
    path: String,
    kind: WatchKind,
    tx: UnboundedSender<StoreEvent>,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn value_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments(path) {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Writes (or with `None`, deletes) the node at `path`, creating
/// intermediate objects on the way down and pruning objects emptied on the
/// way out.
fn write_at(root: &mut Value, path: &str, value: Option<Value>) {
    fn recurse(node: &mut Value, parts: &[&str], value: Option<Value>) {
        let Some((head, rest)) = parts.split_first() else {
            return;
        };
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let map = node.as_object_mut().expect("just coerced to object");
        if rest.is_empty() {
            match value {
                Some(v) => {
                    map.insert((*head).to_string(), v);
                }
                None => {
                    map.remove(*head);
                }
            }
            return;
        }
        let child = map
            .entry((*head).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        recurse(child, rest, value);
        if child.as_object().is_some_and(|m| m.is_empty()) {
            map.remove(*head);
        }
    }

    let parts: Vec<&str> = segments(path).collect();
    if parts.is_empty() {
        *root = value.unwrap_or_else(|| Value::Object(Map::new()));
        return;
    }
    recurse(root, &parts, value);
}

fn children_of(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

impl Inner {
    fn notify(&mut self, before: &Value) {
        let after = self.root.clone();
        self.watchers.retain(|watcher| {
            let old = value_at(before, &watcher.path);
            let new = value_at(&after, &watcher.path);
            match watcher.kind {
                WatchKind::Value => {
                    if old == new {
                        return !watcher.tx.is_closed();
                    }
                    watcher.tx.send(StoreEvent::Value(new.cloned())).is_ok()
                }
                WatchKind::Children => {
                    let old_children = children_of(old);
                    let new_children = children_of(new);
                    let mut ok = true;
                    for (key, value) in &new_children {
                        let event = match old_children.get(key) {
                            None => StoreEvent::ChildAdded {
                                key: key.clone(),
                                value: value.clone(),
                            },
                            Some(previous) if previous != value => StoreEvent::ChildChanged {
                                key: key.clone(),
                                value: value.clone(),
                            },
                            Some(_) => continue,
                        };
                        ok &= watcher.tx.send(event).is_ok();
                    }
                    for key in old_children.keys() {
                        if !new_children.contains_key(key) {
                            ok &= watcher
                                .tx
                                .send(StoreEvent::ChildRemoved { key: key.clone() })
                                .is_ok();
                        }
                    }
                    ok
                }
            }
        });
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut root = Value::Object(Map::new());
        write_at(&mut root, super::CONNECTED_PATH, Some(Value::Bool(true)));
        Self {
            inner: Arc::new(Mutex::new(Inner {
                root,
                watchers: Vec::new(),
                disconnect_removals: Vec::new(),
            })),
        }
    }

    /// Builds a store whose connected signal starts out false. Tests use it
    /// to exercise the bounded startup wait.
    pub fn disconnected() -> Self {
        let store = Self::new();
        store.write(super::CONNECTED_PATH, Some(Value::Bool(false)));
        store
    }

    pub fn set_connected(&self, connected: bool) {
        self.write(super::CONNECTED_PATH, Some(Value::Bool(connected)));
    }

    /// Runs every registered disconnect removal, as the server would after
    /// an unclean drop, and clears the registrations.
    pub fn fire_disconnect_hooks(&self) {
        let paths = {
            let mut inner = self.inner.lock().unwrap();
            std::mem::take(&mut inner.disconnect_removals)
        };
        for path in paths {
            self.write(&path, None);
        }
    }

    /// Like [`fire_disconnect_hooks`](Self::fire_disconnect_hooks) but only
    /// for registrations under `prefix`, when one simulated client among
    /// several drops.
    pub fn fire_disconnect_hooks_under(&self, prefix: &str) {
        let paths = {
            let mut inner = self.inner.lock().unwrap();
            let (matching, rest): (Vec<String>, Vec<String>) = inner
                .disconnect_removals
                .drain(..)
                .partition(|path| path.starts_with(prefix));
            inner.disconnect_removals = rest;
            matching
        };
        for path in paths {
            self.write(&path, None);
        }
    }

    /// Snapshot of the whole document, for assertions.
    pub fn dump(&self) -> Value {
        self.inner.lock().unwrap().root.clone()
    }

    fn write(&self, path: &str, value: Option<Value>) {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.root.clone();
        write_at(&mut inner.root, path, value);
        inner.notify(&before);
    }

    fn read(&self, path: &str) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        value_at(&inner.root, path).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read(path))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.write(path, Some(value));
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        let Value::Object(fields) = fields else {
            // a non-object merge degenerates to a plain set
            self.write(path, Some(fields));
            return Ok(());
        };
        let mut inner = self.inner.lock().unwrap();
        let before = inner.root.clone();
        let mut merged = children_of(value_at(&inner.root, path));
        for (key, value) in fields {
            if value.is_null() {
                merged.remove(&key);
            } else {
                merged.insert(key, value);
            }
        }
        write_at(&mut inner.root, path, Some(Value::Object(merged)));
        inner.notify(&before);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.write(path, None);
        Ok(())
    }

    async fn transaction(
        &self,
        path: &str,
        mut update: TransactionUpdate,
    ) -> Result<(), StoreError> {
        // the document lock linearizes transactions, so the first attempt
        // always commits
        let mut inner = self.inner.lock().unwrap();
        let before = inner.root.clone();
        let next = update(value_at(&inner.root, path));
        write_at(&mut inner.root, path, next);
        inner.notify(&before);
        Ok(())
    }

    fn watch(&self, path: &str, kind: WatchKind) -> WatchStream {
        let (tx, stream) = WatchStream::channel();
        let mut inner = self.inner.lock().unwrap();
        let current = value_at(&inner.root, path);
        match kind {
            WatchKind::Value => {
                let _ = tx.send(StoreEvent::Value(current.cloned()));
            }
            WatchKind::Children => {
                for (key, value) in children_of(current) {
                    let _ = tx.send(StoreEvent::ChildAdded { key, value });
                }
            }
        }
        inner.watchers.push(Watcher {
            path: path.to_string(),
            kind,
            tx,
        });
        stream
    }

    async fn on_disconnect_remove(&self, path: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnect_removals.push(path.to_string());
        Ok(())
    }

    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn value_watch_sees_initial_state_and_changes() {
        let store = MemoryStore::new();
        store.set("rooms/AB/timer", json!({"x": 1})).await.unwrap();

        let mut watch = store.watch("rooms/AB/timer", WatchKind::Value);
        assert_eq!(
            watch.try_next(),
            Some(StoreEvent::Value(Some(json!({"x": 1}))))
        );

        store.set("rooms/AB/timer", json!({"x": 2})).await.unwrap();
        assert_eq!(
            watch.try_next(),
            Some(StoreEvent::Value(Some(json!({"x": 2}))))
        );

        store.remove("rooms/AB/timer").await.unwrap();
        assert_eq!(watch.try_next(), Some(StoreEvent::Value(None)));
    }

    #[tokio::test]
    async fn child_watch_diffs_adds_changes_and_removals() {
        let store = MemoryStore::new();
        store
            .set("rooms/AB/participants/p1", json!({"nickname": "Sam"}))
            .await
            .unwrap();

        let mut watch = store.watch("rooms/AB/participants", WatchKind::Children);
        assert_eq!(
            watch.try_next(),
            Some(StoreEvent::ChildAdded {
                key: "p1".into(),
                value: json!({"nickname": "Sam"})
            })
        );

        store
            .set("rooms/AB/participants/p2", json!({"nickname": "Kit"}))
            .await
            .unwrap();
        assert_eq!(
            watch.try_next(),
            Some(StoreEvent::ChildAdded {
                key: "p2".into(),
                value: json!({"nickname": "Kit"})
            })
        );

        store
            .update("rooms/AB/participants/p1", json!({"nickname": "Sammy"}))
            .await
            .unwrap();
        assert_eq!(
            watch.try_next(),
            Some(StoreEvent::ChildChanged {
                key: "p1".into(),
                value: json!({"nickname": "Sammy"})
            })
        );

        store.remove("rooms/AB/participants/p2").await.unwrap();
        assert_eq!(
            watch.try_next(),
            Some(StoreEvent::ChildRemoved { key: "p2".into() })
        );
    }

    #[tokio::test]
    async fn update_merges_fields_and_null_deletes() {
        let store = MemoryStore::new();
        store
            .set("users/u1", json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        store
            .update("users/u1", json!({"b": null, "c": 3}))
            .await
            .unwrap();
        assert_eq!(
            store.get("users/u1").await.unwrap(),
            Some(json!({"a": 1, "c": 3}))
        );
    }

    #[tokio::test]
    async fn transactions_increment_without_lost_updates() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    crate::store::increment(&store, "users/u1/stats/totalWorkSeconds", 1)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(
            store.get("users/u1/stats/totalWorkSeconds").await.unwrap(),
            Some(json!(200))
        );
    }

    #[tokio::test]
    async fn disconnect_hooks_remove_registered_paths() {
        let store = MemoryStore::new();
        store
            .set("rooms/AB/participants/p1", json!({"nickname": "Sam"}))
            .await
            .unwrap();
        store
            .on_disconnect_remove("rooms/AB/participants/p1")
            .await
            .unwrap();

        store.fire_disconnect_hooks();
        assert_eq!(store.get("rooms/AB/participants/p1").await.unwrap(), None);
        // registrations are one-shot
        store
            .set("rooms/AB/participants/p1", json!({"nickname": "Sam"}))
            .await
            .unwrap();
        store.fire_disconnect_hooks();
        assert!(store.get("rooms/AB/participants/p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropping_a_watch_stream_unsubscribes() {
        let store = MemoryStore::new();
        let watch = store.watch("rooms/AB", WatchKind::Value);
        drop(watch);
        store.set("rooms/AB", json!({"x": 1})).await.unwrap();
        assert_eq!(store.inner.lock().unwrap().watchers.len(), 0);
    }

    #[tokio::test]
    async fn connected_flag_is_a_normal_path() {
        let store = MemoryStore::disconnected();
        let mut watch = store.watch(crate::store::CONNECTED_PATH, WatchKind::Value);
        assert_eq!(watch.try_next(), Some(StoreEvent::Value(Some(json!(false)))));
        store.set_connected(true);
        assert_eq!(watch.try_next(), Some(StoreEvent::Value(Some(json!(true)))));
    }
}
