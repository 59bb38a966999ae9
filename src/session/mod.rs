//! Session management
//!
//! The lifecycle core: per-session records with a forward-only status
//! machine, the registry that owns them, the chunked output buffer store,
//! and the interactive prompt heuristics.

pub mod buffer;
pub mod prompt;
pub mod registry;
pub mod state;
pub mod types;

pub use buffer::{BufferLimits, OutputBufferStore};
pub use prompt::{AutoAuth, PromptTail};
pub use registry::{ExitDisposition, OutputOutcome, RegistryError, SessionRegistry};
pub use state::{CloseReason, SessionStatus, TransitionError};
pub use types::{ConnectStage, ConnectingHostStatus, Session, SessionInfo};
