// Shared fixtures for the integration tests. Not every test binary uses every
// helper.
#![allow(dead_code)]

pub mod gateway;
pub mod polling;
pub mod store;

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use worktrack_lib::{ManualClock, MemoryStore, Task, TrackingSession};

/// 2026-03-02T09:00:00Z
pub const T0_MS: i64 = 1_772_442_000_000;

pub fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

pub fn clock() -> ManualClock {
    ManualClock::at_millis(T0_MS)
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn task(id: &str, title: &str) -> Task {
    Task::new(id, title)
}

/// Session as the server returns it from a start call
pub fn open_session(id: &str, task_id: &str, start: DateTime<Utc>) -> TrackingSession {
    TrackingSession {
        id: id.to_string(),
        user_id: "u1".to_string(),
        task_id: task_id.to_string(),
        date: start.date_naive(),
        start_time: start,
        end_time: None,
        description: None,
        created_at: start,
    }
}

pub fn closed_session(id: &str, task_id: &str, start: DateTime<Utc>) -> TrackingSession {
    TrackingSession {
        end_time: Some(start + chrono::Duration::minutes(25)),
        ..open_session(id, task_id, start)
    }
}
