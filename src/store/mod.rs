//! The shared replicated store the room state machine runs against.
//!
//! The store is a hierarchical key-value document addressed by
//! slash-separated paths. It is a consumed capability: the crate only
//! depends on the [`SharedStore`] trait, and ships [`memory::MemoryStore`]
//! as the in-process implementation used by demos and tests.

pub mod coerce;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::StoreError;

/// Well-known path that reports the client's connection to the store.
pub const CONNECTED_PATH: &str = ".info/connected";

/// Granularity of a [`SharedStore::watch`] subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// Whole-value replacement notifications for the path itself.
    Value,
    /// Incremental add/change/remove notifications for direct children.
    Children,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Value(Option<Value>),
    ChildAdded { key: String, value: Value },
    ChildChanged { key: String, value: Value },
    ChildRemoved { key: String },
}

/// A cancellable stream of change events for one watched path. Dropping the
/// stream unsubscribes; the store prunes the registration on its next send.
pub struct WatchStream {
    rx: UnboundedReceiver<StoreEvent>,
}

impl WatchStream {
    pub fn channel() -> (UnboundedSender<StoreEvent>, WatchStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, WatchStream { rx })
    }

    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<StoreEvent> {
        self.rx.try_recv().ok()
    }
}

/// Read-modify-write step for [`SharedStore::transaction`]. Returning `None`
/// deletes the node.
pub type TransactionUpdate = Box<dyn FnMut(Option<&Value>) -> Option<Value> + Send>;

/// Interface to the replicated document. Per-path notification order matches
/// commit order; no ordering holds across different paths.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// One-shot point read.
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Unconditional whole-value write.
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Partial-field merge. `fields` must be an object; fields set to JSON
    /// null are removed.
    async fn update(&self, path: &str, fields: Value) -> Result<(), StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Atomic read-modify-write with retry-on-conflict semantics.
    async fn transaction(&self, path: &str, update: TransactionUpdate) -> Result<(), StoreError>;

    /// Subscribes to changes under `path`. Current state is delivered on
    /// subscribe: the current value for [`WatchKind::Value`], one
    /// `ChildAdded` per existing child for [`WatchKind::Children`].
    fn watch(&self, path: &str, kind: WatchKind) -> WatchStream;

    /// Registers a server-side removal that fires if this client disconnects
    /// uncleanly.
    async fn on_disconnect_remove(&self, path: &str) -> Result<(), StoreError>;

    /// Server-synced wall-clock milliseconds. Used for every stored
    /// `*At`/`lastUpdate` field so ordering never trusts client clocks;
    /// duration arithmetic within a client stays on monotonic time.
    fn now_ms(&self) -> i64;
}

/// Atomic integer increment built on [`SharedStore::transaction`].
pub async fn increment(store: &dyn SharedStore, path: &str, delta: i64) -> Result<(), StoreError> {
    store
        .transaction(
            path,
            Box::new(move |current| Some(Value::from(coerce::i64_or(current, 0) + delta))),
        )
        .await
}
