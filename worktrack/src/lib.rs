// Time tracking module: session state machine, task list cache and their
// injected collaborators (gateway, store, clock)
pub mod tracking;

// Log subscriber setup for binaries; the library itself only emits events
pub mod logging;

#[cfg(test)]
pub mod test_utils;

pub use tracking::clock::{Clock, ManualClock, SystemClock};
pub use tracking::gateway::{GatewayError, TaskGateway};
pub use tracking::models::{CacheEnvelope, Task, TaskPriority, TaskStatus, TrackingSession};
pub use tracking::store::{FileStore, KeyValueStore, MemoryStore, StoreError, StoreExt};
pub use tracking::task_cache::{filter_tasks, TaskCache, TaskListState, CACHE_TTL};
pub use tracking::tracker::{
    ActiveTracking, SessionState, SessionTracker, SessionView, TrackingError, TICK_INTERVAL,
};
