use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;
use worktrack_lib::{GatewayError, Task, TaskGateway, TrackingSession};

use super::{closed_session, open_session};

type Scripted<T> = Mutex<VecDeque<Result<T, GatewayError>>>;

/// Gateway whose responses are queued up front by the test.
///
/// When a queue runs dry the call succeeds with a default: an empty task
/// list, an open session `s1`, or the requested session closed. A gate makes
/// the next call of that kind wait until its sender fires (or is dropped).
#[derive(Default)]
pub struct ScriptedGateway {
    tasks: Scripted<Vec<Task>>,
    starts: Scripted<TrackingSession>,
    stops: Scripted<TrackingSession>,
    task_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    stop_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    get_tasks_calls: AtomicUsize,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    stopped_ids: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_tasks(&self, result: Result<Vec<Task>, GatewayError>) {
        self.tasks.lock().unwrap().push_back(result);
    }

    pub fn push_start(&self, result: Result<TrackingSession, GatewayError>) {
        self.starts.lock().unwrap().push_back(result);
    }

    pub fn push_stop(&self, result: Result<TrackingSession, GatewayError>) {
        self.stops.lock().unwrap().push_back(result);
    }

    /// Hold the next `get_tasks` call until the returned sender fires
    pub fn gate_next_get_tasks(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.task_gates.lock().unwrap().push_back(rx);
        tx
    }

    /// Hold the next `stop_tracking` call until the returned sender fires
    pub fn gate_next_stop(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.stop_gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn get_tasks_calls(&self) -> usize {
        self.get_tasks_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Session ids passed to `stop_tracking`, in call order
    pub fn stopped_ids(&self) -> Vec<String> {
        self.stopped_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskGateway for ScriptedGateway {
    async fn get_tasks(&self) -> Result<Vec<Task>, GatewayError> {
        self.get_tasks_calls.fetch_add(1, Ordering::SeqCst);
        // Results are bound at call time so a held call keeps its own answer
        let result = self.tasks.lock().unwrap().pop_front();
        let gate = self.task_gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        result.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn start_tracking(
        &self,
        task_id: &str,
        description: Option<&str>,
    ) -> Result<TrackingSession, GatewayError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.starts.lock().unwrap().pop_front();
        result.unwrap_or_else(|| {
            let mut session = open_session("s1", task_id, Utc::now());
            session.description = description.map(str::to_string);
            Ok(session)
        })
    }

    async fn stop_tracking(&self, session_id: &str) -> Result<TrackingSession, GatewayError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped_ids
            .lock()
            .unwrap()
            .push(session_id.to_string());
        let result = self.stops.lock().unwrap().pop_front();
        let gate = self.stop_gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        result.unwrap_or_else(|| Ok(closed_session(session_id, "t1", Utc::now())))
    }
}
