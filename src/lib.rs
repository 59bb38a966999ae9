//! Termplex - session multiplexing core for a multi-host terminal client
//!
//! Tracks N concurrent remote-shell sessions spawned by a privileged
//! backend, buffers their output under memory pressure, replays the right
//! buffer when the visible session changes, keeps terminal geometry in sync
//! with the remote pseudo-terminal, opportunistically auto-fills saved
//! passwords, and supervises connection attempts.
//!
//! The UI chrome (host list, dialogs, settings), the terminal emulator and
//! the process transport are external collaborators consumed through the
//! narrow contracts in [`backend`], [`terminal`] and [`host`].
//!
//! The core is cooperative and event-loop driven: every backend interaction
//! is asynchronous, timers are the only other source of deferred execution,
//! and all state transitions for a session are serialized by the event pump.

pub mod backend;
pub mod config;
pub mod host;
pub mod mux;
pub mod session;
pub mod terminal;

pub use backend::{BackendError, PtyBackend, PtyEvent};
pub use config::{ConfigError, MuxConfig, RetentionPolicy};
pub use host::{Host, HostDirectory, HostError, SecretError, SecretStore, SpawnSpec};
pub use mux::{ConnectError, SessionMux, SetupError};
pub use session::{
    CloseReason, ConnectingHostStatus, OutputBufferStore, SessionInfo, SessionRegistry,
    SessionStatus,
};
pub use terminal::{Geometry, GeometrySync, SurfaceError, TerminalSurface, UserPrompt};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging for embedding applications. Honors `RUST_LOG`,
/// defaulting to `info`.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
