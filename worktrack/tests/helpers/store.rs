use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;
use worktrack_lib::{KeyValueStore, MemoryStore, StoreError};

/// Memory store whose next write can be held open by the test
#[derive(Default)]
pub struct GatedStore {
    items: MemoryStore,
    set_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    set_calls: AtomicUsize,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the next `set_item` call until the returned sender fires
    pub fn gate_next_set(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.set_gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.items.snapshot()
    }
}

#[async_trait]
impl KeyValueStore for GatedStore {
    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.set_gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.items.set_item(key, value).await
    }

    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.items.get_item(key).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.items.remove_item(key).await
    }
}
