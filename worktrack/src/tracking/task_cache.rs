//! Task list cache
//!
//! Serves the task list from memory, rehydrated from the store at startup when
//! the persisted copy is younger than the TTL. Search is synchronous and never
//! leaves the process.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::gateway::{GatewayError, TaskGateway};
use super::models::{CacheEnvelope, Task};
use super::store::{keys, KeyValueStore, StoreExt};

/// Freshness window of the persisted task list (5 minutes)
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// What the UI layer reads
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskListState {
    pub tasks: Vec<Task>,
    /// Always `filter_tasks(&tasks, &search_query)`
    pub filtered_tasks: Vec<Task>,
    pub search_query: String,
    /// Capture time of the list currently held; only a successful network
    /// fetch moves it forward
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub is_loading: bool,
    pub is_refreshing: bool,
    pub error: Option<String>,
}

/// Case-insensitive substring match on title and description.
///
/// An empty query returns every task, in order.
pub fn filter_tasks(tasks: &[Task], query: &str) -> Vec<Task> {
    let needle = query.to_lowercase();
    tasks
        .iter()
        .filter(|task| task.matches_lowercase(&needle))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    /// Automatic load; only shows a spinner when there is nothing to show
    Background,
    /// User pulled to refresh
    Manual,
}

#[derive(Debug, Default)]
struct CacheState {
    view: TaskListState,
    /// Generation of the newest fetch issued. Only its outcome clears the
    /// spinners or sets the error.
    latest_generation: u64,
    /// Generation of the list currently held. A success older than this is
    /// dropped; any newer success replaces the list.
    applied_generation: u64,
}

struct Inner {
    gateway: Arc<dyn TaskGateway>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    state: StdMutex<CacheState>,
    state_tx: watch::Sender<TaskListState>,
    /// Keeps each list/timestamp pair together on disk
    persist_lock: Mutex<()>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    fn publish(&self, state: &CacheState) {
        self.state_tx.send_replace(state.view.clone());
    }

    async fn load_envelope(&self) -> Option<CacheEnvelope<Vec<Task>>> {
        let tasks = match self.store.get_json::<Vec<Task>>(keys::TASK_LIST_CACHE).await {
            Ok(Some(tasks)) => tasks,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "unreadable task list cache");
                return None;
            }
        };

        let captured_at = match self
            .store
            .get_json::<i64>(keys::TASK_LIST_CACHE_TIMESTAMP)
            .await
        {
            Ok(Some(ms)) => Utc.timestamp_millis_opt(ms).single()?,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "unreadable task list cache timestamp");
                return None;
            }
        };

        Some(CacheEnvelope::new(tasks, captured_at))
    }

    /// Persist the list fetched by `generation`, unless a newer one has been
    /// applied since
    async fn persist_envelope(&self, generation: u64, envelope: &CacheEnvelope<Vec<Task>>) {
        let _ordered = self.persist_lock.lock().await;
        let applied = lock(&self.state).applied_generation;
        if applied != generation {
            debug!(generation, applied, "skipping persist of superseded task list");
            return;
        }

        if let Err(e) = self
            .store
            .set_json(keys::TASK_LIST_CACHE, &envelope.payload)
            .await
        {
            warn!(key = keys::TASK_LIST_CACHE, error = %e, "failed to persist task list");
            return;
        }

        if let Err(e) = self
            .store
            .set_json(
                keys::TASK_LIST_CACHE_TIMESTAMP,
                &envelope.captured_at.timestamp_millis(),
            )
            .await
        {
            warn!(
                key = keys::TASK_LIST_CACHE_TIMESTAMP,
                error = %e,
                "failed to persist task list timestamp"
            );
        }
    }
}

/// Handle to the task list cache. Clones share the same state.
#[derive(Clone)]
pub struct TaskCache {
    inner: Arc<Inner>,
}

impl TaskCache {
    pub fn new(
        gateway: Arc<dyn TaskGateway>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_ttl(gateway, store, clock, CACHE_TTL)
    }

    pub fn with_ttl(
        gateway: Arc<dyn TaskGateway>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(TaskListState::default());
        Self {
            inner: Arc::new(Inner {
                gateway,
                store,
                clock,
                ttl,
                state: StdMutex::new(CacheState::default()),
                state_tx,
                persist_lock: Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> TaskListState {
        lock(&self.inner.state).view.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskListState> {
        self.inner.state_tx.subscribe()
    }

    /// Adopt the persisted list if it is still fresh, otherwise fetch
    pub async fn bootstrap(&self) -> Result<(), GatewayError> {
        let now = self.inner.clock.now();
        match self.inner.load_envelope().await {
            Some(envelope) if envelope.is_fresh(now, self.inner.ttl) => {
                let mut state = lock(&self.inner.state);
                info!(
                    tasks = envelope.payload.len(),
                    captured_at = %envelope.captured_at,
                    "serving task list from cache"
                );
                state.view.filtered_tasks =
                    filter_tasks(&envelope.payload, &state.view.search_query);
                state.view.tasks = envelope.payload;
                state.view.last_fetch_time = Some(envelope.captured_at);
                self.inner.publish(&state);
                Ok(())
            }
            Some(envelope) => {
                debug!(captured_at = %envelope.captured_at, "task list cache is stale");
                self.fetch().await
            }
            None => self.fetch().await,
        }
    }

    /// Fetch the task list. A failure keeps whatever list is already held.
    pub async fn fetch(&self) -> Result<(), GatewayError> {
        self.run_fetch(FetchKind::Background).await
    }

    /// User-triggered reload; raises `is_refreshing` for its duration
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        self.run_fetch(FetchKind::Manual).await
    }

    /// Set the query and recompute the filtered projection
    pub fn search(&self, query: &str) -> Vec<Task> {
        let mut state = lock(&self.inner.state);
        state.view.search_query = query.to_string();
        state.view.filtered_tasks = filter_tasks(&state.view.tasks, query);
        self.inner.publish(&state);
        state.view.filtered_tasks.clone()
    }

    pub fn find(&self, task_id: &str) -> Option<Task> {
        lock(&self.inner.state)
            .view
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
    }

    async fn run_fetch(&self, kind: FetchKind) -> Result<(), GatewayError> {
        let generation = {
            let mut state = lock(&self.inner.state);
            state.latest_generation += 1;
            // Existing data stays on screen during a background reload
            if state.view.tasks.is_empty() {
                state.view.is_loading = true;
            }
            if kind == FetchKind::Manual {
                state.view.is_refreshing = true;
            }
            self.inner.publish(&state);
            state.latest_generation
        };
        debug!(generation, ?kind, "fetching task list");

        let result = self.inner.gateway.get_tasks().await;
        let now = self.inner.clock.now();

        match result {
            Ok(tasks) => {
                {
                    let mut state = lock(&self.inner.state);
                    if generation <= state.applied_generation {
                        debug!(
                            generation,
                            applied = state.applied_generation,
                            "discarding superseded task list response"
                        );
                        return Ok(());
                    }
                    state.applied_generation = generation;
                    state.view.filtered_tasks = filter_tasks(&tasks, &state.view.search_query);
                    state.view.tasks = tasks.clone();
                    state.view.last_fetch_time = Some(now);
                    if generation == state.latest_generation {
                        state.view.error = None;
                        state.view.is_loading = false;
                        state.view.is_refreshing = false;
                    } else if !state.view.tasks.is_empty() {
                        // A newer request is still out; the list is on screen now
                        state.view.is_loading = false;
                    }
                    self.inner.publish(&state);
                }
                info!(generation, tasks = tasks.len(), "task list fetched");

                self.inner
                    .persist_envelope(generation, &CacheEnvelope::new(tasks, now))
                    .await;
                Ok(())
            }
            Err(err) => {
                let mut state = lock(&self.inner.state);
                if generation == state.latest_generation {
                    // Whatever list is held stays; only the error and flags change
                    warn!(generation, kind = err.kind(), error = %err, "task list fetch failed");
                    state.view.error = Some(err.to_string());
                    state.view.is_loading = false;
                    state.view.is_refreshing = false;
                    self.inner.publish(&state);
                } else {
                    debug!(generation, error = %err, "superseded task list request failed");
                }
                Err(err)
            }
        }
    }
}
