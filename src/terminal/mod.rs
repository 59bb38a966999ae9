//! Terminal surface contract
//!
//! The emulator is an opaque sink shared by all sessions: it accepts text,
//! can be reset and focused, and reports how many character cells its pixel
//! size currently fits. Escape-sequence interpretation and rendering happen
//! on the other side of this boundary.

pub mod fit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use fit::GeometrySync;

/// Pseudo-terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    /// Conventional fallback when the surface cannot be measured yet.
    pub const FALLBACK: Geometry = Geometry { cols: 80, rows: 24 };
}

/// Surface errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SurfaceError {
    /// The renderer is not mounted (startup, teardown). Expected under
    /// concurrent dispose; callers log at debug and move on.
    #[error("Surface unavailable")]
    Unavailable,

    #[error("Surface error: {0}")]
    Renderer(String),
}

/// The single shared terminal renderer. Only one session is visible at a
/// time; writers must re-check the active session immediately before each
/// write (the check-then-write gap can span an asynchronous flush).
#[async_trait]
pub trait TerminalSurface: Send + Sync {
    /// Write text to the renderer; resolves once the data is flushed.
    async fn write(&self, text: &str) -> Result<(), SurfaceError>;

    /// Clear the renderer (used when switching the visible session).
    fn reset(&self);

    /// Restore input focus to the renderer.
    fn focus(&self);

    /// Drop any active selection before replaying a buffer.
    fn clear_selection(&self);

    /// Compute how many columns/rows the current pixel size accommodates.
    fn measure_fit(&self) -> Result<Geometry, SurfaceError>;
}

/// Blocking user confirmation, answered by the UI layer. Used by the
/// connect-timeout flow; "blocking" means the asking task awaits the answer,
/// the event loop stays live.
#[async_trait]
pub trait UserPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}
