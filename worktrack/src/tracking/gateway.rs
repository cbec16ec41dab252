//! Remote task gateway contract
//!
//! The tracker and the cache only ever see this trait; the HTTP adapter in
//! `http_gateway` is one implementation, the scripted gateways in tests are
//! others.

use async_trait::async_trait;

use super::models::{Task, TrackingSession};

/// Failure reported by the remote side, carrying a human-readable message.
///
/// `Display` renders only the message so it can be surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Server unreachable (connect failure, timeout, dropped connection)
    #[error("{0}")]
    Network(String),
    /// Remote failure status
    #[error("{message}")]
    Server { status: u16, message: String },
    /// The request was rejected as malformed or conflicting
    #[error("{0}")]
    Validation(String),
    /// Credentials rejected
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Unknown(String),
}

impl GatewayError {
    /// Short machine-readable kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Network(_) => "network",
            GatewayError::Server { .. } => "server",
            GatewayError::Validation(_) => "validation",
            GatewayError::Auth(_) => "auth",
            GatewayError::Unknown(_) => "unknown",
        }
    }
}

/// Network operations consumed by the tracker and the cache
#[async_trait]
pub trait TaskGateway: Send + Sync {
    /// Fetch the full task list for the signed-in user
    async fn get_tasks(&self) -> Result<Vec<Task>, GatewayError>;

    /// Open a tracking session on `task_id`
    async fn start_tracking(
        &self,
        task_id: &str,
        description: Option<&str>,
    ) -> Result<TrackingSession, GatewayError>;

    /// Close a session; the returned session has its end time set
    async fn stop_tracking(&self, session_id: &str) -> Result<TrackingSession, GatewayError>;
}
