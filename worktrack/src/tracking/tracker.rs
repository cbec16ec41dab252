//! Session tracker: single-active-session discipline for the mobile client
//!
//! - At most one session is held locally at any time
//! - Elapsed time is recomputed from the absolute start timestamp on every tick
//! - The open session is persisted as a snapshot and rehydrated by `restore()`
//!   without contacting the server
//!
//! State lives behind a std mutex that is never held across an `.await`.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::clock::{elapsed_seconds, Clock};
use super::gateway::{GatewayError, TaskGateway};
use super::models::{Task, TrackingSession};
use super::store::{keys, KeyValueStore, StoreError, StoreExt};

/// How often the elapsed counter is recomputed
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingError {
    #[error("No active tracking to stop")]
    NoActiveTracking,
    #[error("A tracking session is already active")]
    AlreadyTracking,
    #[error("A stop request is already in flight")]
    StopInFlight,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// The session currently held by the tracker
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTracking {
    pub session: TrackingSession,
    /// Absolute start the elapsed counter is derived from
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub description: String,
}

/// Exactly one of these holds at any instant
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Loading,
    Active(ActiveTracking),
    /// `retained` is the session kept alive after a failed stop, so a retry
    /// can still target it. A failed start retains nothing.
    Error {
        message: String,
        retained: Option<ActiveTracking>,
    },
}

impl SessionState {
    /// The session held in this state, if any
    pub fn tracking(&self) -> Option<&ActiveTracking> {
        match self {
            SessionState::Active(tracking) => Some(tracking),
            SessionState::Error {
                retained: Some(tracking),
                ..
            } => Some(tracking),
            _ => None,
        }
    }

    fn tracking_mut(&mut self) -> Option<&mut ActiveTracking> {
        match self {
            SessionState::Active(tracking) => Some(tracking),
            SessionState::Error {
                retained: Some(tracking),
                ..
            } => Some(tracking),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Loading => "loading",
            SessionState::Active(_) => "active",
            SessionState::Error { .. } => "error",
        }
    }
}

/// Inputs to the state machine
#[derive(Debug)]
enum Transition {
    StartRequested,
    Started(ActiveTracking),
    StartFailed(String),
    Stopped,
    StopFailed(String),
    Restored(Option<ActiveTracking>),
}

/// Exhaustive transition function. Combinations the public operations guard
/// against leave the state untouched.
fn next_state(current: SessionState, transition: Transition) -> SessionState {
    use SessionState as S;
    use Transition as T;

    match (current, transition) {
        (_, T::Restored(Some(tracking))) => S::Active(tracking),
        (_, T::Restored(None)) => S::Idle,

        (S::Idle, T::StartRequested) | (S::Error { retained: None, .. }, T::StartRequested) => {
            S::Loading
        }
        (S::Loading, T::Started(tracking)) => S::Active(tracking),
        (S::Loading, T::StartFailed(message)) => S::Error {
            message,
            retained: None,
        },

        (S::Active(_), T::Stopped)
        | (
            S::Error {
                retained: Some(_), ..
            },
            T::Stopped,
        ) => S::Idle,
        (S::Active(tracking), T::StopFailed(message))
        | (
            S::Error {
                retained: Some(tracking),
                ..
            },
            T::StopFailed(message),
        ) => S::Error {
            message,
            retained: Some(tracking),
        },

        (current, transition) => {
            warn!(
                state = current.label(),
                ?transition,
                "ignoring transition not valid in current state"
            );
            current
        }
    }
}

/// What the UI layer reads
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionView {
    pub active_session: Option<TrackingSession>,
    pub elapsed_seconds: u64,
    pub is_tracking: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub description: String,
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        let tracking = state.tracking();
        Self {
            active_session: tracking.map(|t| t.session.clone()),
            elapsed_seconds: tracking.map(|t| t.elapsed_seconds).unwrap_or(0),
            is_tracking: tracking.is_some(),
            is_loading: matches!(state, SessionState::Loading),
            error: match state {
                SessionState::Error { message, .. } => Some(message.clone()),
                _ => None,
            },
            description: tracking.map(|t| t.description.clone()).unwrap_or_default(),
        }
    }
}

/// Persisted form of the held session, read back by `restore()`
#[derive(Debug, Clone)]
struct Snapshot {
    session: TrackingSession,
    description: String,
    started_at: DateTime<Utc>,
}

// ============================================================================
// Tick
// ============================================================================

/// Owned handle to the recurring elapsed-time task.
///
/// Dropping the handle aborts the task, so replacing or clearing the slot
/// that holds it is all it takes to disarm.
struct TickHandle {
    task: JoinHandle<()>,
}

impl TickHandle {
    fn spawn(inner: Weak<Inner>, period: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(tracker) = inner.upgrade() else {
                    break;
                };
                tracker.refresh_elapsed();
            }
        });

        Self { task }
    }

    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Tracker
// ============================================================================

struct Inner {
    gateway: Arc<dyn TaskGateway>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    state: StdMutex<SessionState>,
    tick: StdMutex<Option<TickHandle>>,
    stop_in_flight: AtomicBool,
    /// Orders every snapshot write and clear. Writes only land while their
    /// session is still held.
    persist_lock: Mutex<()>,
    view_tx: watch::Sender<SessionView>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    fn transition(&self, transition: Transition) {
        let mut state = lock(&self.state);
        self.apply(&mut state, transition);
    }

    fn apply(&self, state: &mut SessionState, transition: Transition) {
        let current = std::mem::replace(state, SessionState::Idle);
        let from = current.label();
        *state = next_state(current, transition);
        debug!(from, to = state.label(), "session state transition");
        self.view_tx.send_replace(SessionView::from(&*state));
    }

    fn refresh_elapsed(&self) {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        if let Some(tracking) = state.tracking_mut() {
            tracking.elapsed_seconds = elapsed_seconds(tracking.started_at, now);
            self.view_tx.send_replace(SessionView::from(&*state));
        }
    }

    /// Arm the tick, releasing any existing one first
    fn arm_tick(self: &Arc<Self>) {
        let mut slot = lock(&self.tick);
        drop(slot.take());
        *slot = Some(TickHandle::spawn(Arc::downgrade(self), self.tick_interval));
    }

    fn disarm_tick(&self) {
        drop(lock(&self.tick).take());
    }

    fn holds_session(&self, session_id: &str) -> bool {
        lock(&self.state)
            .tracking()
            .map(|t| t.session.id == session_id)
            .unwrap_or(false)
    }

    async fn persist_snapshot(&self, snapshot: &Snapshot) {
        let _ordered = self.persist_lock.lock().await;
        if !self.holds_session(&snapshot.session.id) {
            debug!(session_id = %snapshot.session.id, "session released before snapshot write");
            return;
        }

        let started_at_ms = snapshot.started_at.timestamp_millis();
        let writes = [
            (
                keys::ACTIVE_SESSION,
                self.store
                    .set_json(keys::ACTIVE_SESSION, &snapshot.session)
                    .await,
            ),
            (
                keys::ACTIVE_SESSION_DESCRIPTION,
                self.store
                    .set_json(keys::ACTIVE_SESSION_DESCRIPTION, &snapshot.description)
                    .await,
            ),
            (
                keys::ACTIVE_SESSION_START_TIME,
                self.store
                    .set_json(keys::ACTIVE_SESSION_START_TIME, &started_at_ms)
                    .await,
            ),
        ];

        for (key, result) in writes {
            if let Err(e) = result {
                warn!(key, error = %e, "failed to persist session snapshot entry");
            }
        }
    }

    async fn clear_snapshot(&self, _ordered: &AsyncMutexGuard<'_, ()>) {
        for key in [
            keys::ACTIVE_SESSION,
            keys::ACTIVE_SESSION_DESCRIPTION,
            keys::ACTIVE_SESSION_START_TIME,
        ] {
            if let Err(e) = self.store.remove_item(key).await {
                warn!(key, error = %e, "failed to clear session snapshot entry");
            }
        }
    }

    /// Read the snapshot back. Missing description/start entries fall back to
    /// the values carried by the session itself.
    async fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let Some(session) = self
            .store
            .get_json::<TrackingSession>(keys::ACTIVE_SESSION)
            .await?
        else {
            return Ok(None);
        };

        let description = match self
            .store
            .get_json::<String>(keys::ACTIVE_SESSION_DESCRIPTION)
            .await
        {
            Ok(Some(text)) => text,
            Ok(None) => session.description.clone().unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "unreadable snapshot description, using session's");
                session.description.clone().unwrap_or_default()
            }
        };

        let started_at = match self
            .store
            .get_json::<i64>(keys::ACTIVE_SESSION_START_TIME)
            .await
        {
            Ok(Some(ms)) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .unwrap_or(session.start_time),
            Ok(None) => session.start_time,
            Err(e) => {
                warn!(error = %e, "unreadable snapshot start time, using session's");
                session.start_time
            }
        };

        Ok(Some(Snapshot {
            session,
            description,
            started_at,
        }))
    }
}

/// Persist the description currently held for `session_id`.
///
/// Writes are serialized and always carry the latest text, so an older write
/// finishing late cannot overwrite a newer edit.
async fn write_description(inner: Arc<Inner>, session_id: String) {
    let _ordered = inner.persist_lock.lock().await;
    let current = lock(&inner.state)
        .tracking()
        .filter(|t| t.session.id == session_id)
        .map(|t| t.description.clone());
    let Some(current) = current else {
        return;
    };
    if let Err(e) = inner
        .store
        .set_json(keys::ACTIVE_SESSION_DESCRIPTION, &current)
        .await
    {
        warn!(session_id = %session_id, error = %e, "failed to persist session description");
    }
}

/// Resets the stop guard on every exit path
struct StopGuard<'a>(&'a AtomicBool);

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to the tracker. Clones share the same state; the tick is released
/// when the last handle is dropped.
#[derive(Clone)]
pub struct SessionTracker {
    inner: Arc<Inner>,
}

impl SessionTracker {
    pub fn new(
        gateway: Arc<dyn TaskGateway>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_tick_interval(gateway, store, clock, TICK_INTERVAL)
    }

    pub fn with_tick_interval(
        gateway: Arc<dyn TaskGateway>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
    ) -> Self {
        let (view_tx, _) = watch::channel(SessionView::default());
        Self {
            inner: Arc::new(Inner {
                gateway,
                store,
                clock,
                tick_interval,
                state: StdMutex::new(SessionState::Idle),
                tick: StdMutex::new(None),
                stop_in_flight: AtomicBool::new(false),
                persist_lock: Mutex::new(()),
                view_tx,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner.state).clone()
    }

    pub fn view(&self) -> SessionView {
        SessionView::from(&*lock(&self.inner.state))
    }

    /// Receiver republished on every transition and tick
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.inner.view_tx.subscribe()
    }

    /// Whether a tick task is currently armed
    pub fn is_ticking(&self) -> bool {
        lock(&self.inner.tick)
            .as_ref()
            .map(TickHandle::is_running)
            .unwrap_or(false)
    }

    /// Recompute elapsed time from the absolute start timestamp
    pub fn refresh_elapsed(&self) {
        self.inner.refresh_elapsed();
    }

    /// Start tracking `task`. Valid from Idle, or from an Error that holds no
    /// session.
    pub async fn start(
        &self,
        task: &Task,
        description: Option<&str>,
    ) -> Result<TrackingSession, TrackingError> {
        {
            let mut state = lock(&self.inner.state);
            match &*state {
                SessionState::Idle
                | SessionState::Error {
                    retained: None, ..
                } => {}
                _ => return Err(TrackingError::AlreadyTracking),
            }
            // Checked and moved to Loading under one lock, so two racing
            // starts cannot both reach the gateway
            self.inner.apply(&mut state, Transition::StartRequested);
        }
        info!(task_id = %task.id, "starting tracking");

        match self
            .inner
            .gateway
            .start_tracking(&task.id, description)
            .await
        {
            Ok(session) => {
                let started_at = self.inner.clock.now();
                let description = description
                    .map(str::to_string)
                    .or_else(|| session.description.clone())
                    .unwrap_or_default();

                let tracking = ActiveTracking {
                    session: session.clone(),
                    started_at,
                    elapsed_seconds: 0,
                    description: description.clone(),
                };

                self.inner.transition(Transition::Started(tracking));
                self.inner.arm_tick();
                info!(session_id = %session.id, task_id = %task.id, "tracking started");

                self.inner
                    .persist_snapshot(&Snapshot {
                        session: session.clone(),
                        description,
                        started_at,
                    })
                    .await;

                Ok(session)
            }
            Err(err) => {
                warn!(task_id = %task.id, kind = err.kind(), error = %err, "start tracking failed");
                self.inner
                    .transition(Transition::StartFailed(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Stop the held session.
    ///
    /// On failure the session, its snapshot and the tick are all kept; calling
    /// `stop()` again re-issues the request for the same session id.
    pub async fn stop(&self) -> Result<TrackingSession, TrackingError> {
        let session_id = lock(&self.inner.state)
            .tracking()
            .map(|t| t.session.id.clone())
            .ok_or(TrackingError::NoActiveTracking)?;

        if self.inner.stop_in_flight.swap(true, Ordering::SeqCst) {
            return Err(TrackingError::StopInFlight);
        }
        let _guard = StopGuard(&self.inner.stop_in_flight);

        info!(session_id = %session_id, "stopping tracking");

        match self.inner.gateway.stop_tracking(&session_id).await {
            Ok(closed) => {
                // Cleared and released under one hold, so a pending snapshot
                // write either lands first or sees the session gone
                let ordered = self.inner.persist_lock.lock().await;
                self.inner.clear_snapshot(&ordered).await;
                self.inner.disarm_tick();
                self.inner.transition(Transition::Stopped);
                drop(ordered);
                info!(session_id = %session_id, "tracking stopped");
                Ok(closed)
            }
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    kind = err.kind(),
                    error = %err,
                    "stop tracking failed, keeping session for retry"
                );
                self.inner
                    .transition(Transition::StopFailed(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Edit the held session's description locally and persist it in the
    /// background. Returns false (and persists nothing) when no session is held.
    pub fn update_description(&self, text: impl Into<String>) -> bool {
        let Some(session_id) = self.apply_description(text.into()) else {
            return false;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, description not persisted");
            return true;
        };
        runtime.spawn(write_description(Arc::clone(&self.inner), session_id));
        true
    }

    /// Same as [`update_description`](Self::update_description) but waits for
    /// the store write, for callers that exit right after.
    pub async fn save_description(&self, text: impl Into<String>) -> bool {
        let Some(session_id) = self.apply_description(text.into()) else {
            return false;
        };
        write_description(Arc::clone(&self.inner), session_id).await;
        true
    }

    fn apply_description(&self, text: String) -> Option<String> {
        let mut state = lock(&self.inner.state);
        let Some(tracking) = state.tracking_mut() else {
            debug!("no session held, description edit ignored");
            return None;
        };
        tracking.description = text;
        let session_id = tracking.session.id.clone();
        self.inner
            .view_tx
            .send_replace(SessionView::from(&*state));
        Some(session_id)
    }

    /// Rehydrate the held session from the persisted snapshot.
    ///
    /// An open snapshot goes straight to Active with elapsed time derived from
    /// the original start; anything else lands in Idle. A snapshot whose
    /// session already has an end time is removed.
    pub async fn restore(&self) -> SessionView {
        match self.inner.load_snapshot().await {
            Ok(Some(snapshot)) if snapshot.session.is_open() => {
                let elapsed = elapsed_seconds(snapshot.started_at, self.inner.clock.now());
                info!(
                    session_id = %snapshot.session.id,
                    elapsed_seconds = elapsed,
                    "restored open tracking session"
                );
                self.inner
                    .transition(Transition::Restored(Some(ActiveTracking {
                        session: snapshot.session,
                        started_at: snapshot.started_at,
                        elapsed_seconds: elapsed,
                        description: snapshot.description,
                    })));
                self.inner.arm_tick();
            }
            Ok(Some(snapshot)) => {
                info!(session_id = %snapshot.session.id, "discarding snapshot of closed session");
                self.inner.disarm_tick();
                self.inner.transition(Transition::Restored(None));
                let ordered = self.inner.persist_lock.lock().await;
                self.inner.clear_snapshot(&ordered).await;
            }
            Ok(None) => {
                self.inner.disarm_tick();
                self.inner.transition(Transition::Restored(None));
            }
            Err(StoreError::Serde(e)) => {
                warn!(error = %e, "corrupt session snapshot, discarding");
                self.inner.disarm_tick();
                self.inner.transition(Transition::Restored(None));
                let ordered = self.inner.persist_lock.lock().await;
                self.inner.clear_snapshot(&ordered).await;
            }
            Err(e) => {
                warn!(error = %e, "session snapshot unavailable, starting idle");
                self.inner.disarm_tick();
                self.inner.transition(Transition::Restored(None));
            }
        }

        self.view()
    }

    /// Release the tick without touching state or the snapshot
    pub fn shutdown(&self) {
        self.inner.disarm_tick();
    }
}
