//! Process backend contract
//!
//! The remote-shell transport lives in a privileged backend. This core only
//! sees four request/response calls and a pushed event stream. Session ids
//! are assigned by the backend at spawn time and are opaque here.
//!
//! Events are ordered within a session; nothing is guaranteed across
//! sessions, which is why all per-session state is keyed by session id.

use async_trait::async_trait;

use crate::host::SpawnSpec;

/// Backend call errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Unavailable session: {0}")]
    UnknownSession(String),

    #[error("Backend call failed: {0}")]
    Rpc(String),
}

/// Pushed by the backend for the whole process lifetime, tagged by session.
#[derive(Debug, Clone)]
pub enum PtyEvent {
    /// Output chunk from the remote process
    Output { session_id: String, data: String },
    /// The remote process exited
    Exit { session_id: String, code: u32 },
}

impl PtyEvent {
    pub fn session_id(&self) -> &str {
        match self {
            PtyEvent::Output { session_id, .. } => session_id,
            PtyEvent::Exit { session_id, .. } => session_id,
        }
    }
}

/// Request/response surface of the process backend. All calls are
/// asynchronous; none block the event loop.
#[async_trait]
pub trait PtyBackend: Send + Sync {
    /// Spawn a process in a pseudo-terminal of the given geometry.
    /// Returns the backend-assigned session id.
    async fn spawn(&self, spec: SpawnSpec, cols: u16, rows: u16) -> Result<String, BackendError>;

    /// Write input to the process's stdin.
    async fn write(&self, session_id: &str, data: &str) -> Result<(), BackendError>;

    /// Resize the pseudo-terminal.
    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), BackendError>;

    /// Kill the process. Exit is still reported via the event stream.
    async fn kill(&self, session_id: &str) -> Result<(), BackendError>;
}
