//! Session record and UI-facing payloads
//!
//! All per-session auxiliary state (prompt tail, staged secret, connect
//! timer, last-sent geometry, close reason) lives in named fields of the one
//! `Session` record owned by the registry, so teardown cannot forget a map.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use super::prompt::{AutoAuth, PromptTail};
use super::state::{advance, CloseReason, SessionStatus, TransitionError};
use crate::host::Host;
use crate::terminal::Geometry;

/// One remote-shell process instance and its client-side state.
pub struct Session {
    /// Backend-assigned id, unique for the process lifetime
    pub id: String,
    /// Originating host (lookup only; the host record may be renamed or
    /// deleted while the session lives)
    pub host_id: String,
    /// Display label captured at connect time
    pub host_alias: String,
    pub started_at: DateTime<Utc>,
    /// Set exactly once, on the terminal transition
    pub ended_at: Option<DateTime<Utc>>,
    status: SessionStatus,
    /// Set only on the transition into `Exited`
    pub exit_code: Option<u32>,

    // -- auxiliary state, released on the terminal transition --
    /// Trailing output window for prompt scanning
    pub prompt_tail: PromptTail,
    /// One-shot credential injection
    pub auth: AutoAuth,
    /// Recorded close classification, consulted once on exit
    pub close_reason: Option<CloseReason>,
    /// Cancel handle for the connect-timeout timer
    pub connect_timer: Option<oneshot::Sender<()>>,
    /// Last geometry successfully sent to the backend for this session
    pub last_sent_geometry: Option<Geometry>,
}

impl Session {
    pub fn new(id: String, host: &Host, tail_chars: usize) -> Self {
        Self {
            id,
            host_id: host.id.clone(),
            host_alias: host.label(),
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Starting,
            exit_code: None,
            prompt_tail: PromptTail::new(tail_chars),
            auth: AutoAuth::inert(),
            close_reason: None,
            connect_timer: None,
            last_sent_geometry: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// First output observed: `starting → running`.
    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        self.status = advance(self.status, SessionStatus::Running)?;
        Ok(())
    }

    /// Exit observed: terminal transition, bookkeeping set exactly once.
    pub fn mark_exited(&mut self, code: u32) -> Result<(), TransitionError> {
        self.status = advance(self.status, SessionStatus::Exited)?;
        self.exit_code = Some(code);
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Cancel the connect timer if armed. Idempotent: cancelling a fired or
    /// already-cleared timer is a no-op.
    pub fn cancel_connect_timer(&mut self) {
        if let Some(cancel) = self.connect_timer.take() {
            let _ = cancel.send(());
        }
    }

    /// Release all auxiliary state. Called on the terminal transition
    /// whatever the close reason.
    pub fn release_aux(&mut self) {
        self.cancel_connect_timer();
        self.auth.discard();
        self.prompt_tail.clear();
        self.last_sent_geometry = None;
    }
}

/// Serialized session view for the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub host_id: String,
    pub host_alias: String,
    pub status: SessionStatus,
    pub exit_code: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            host_id: session.host_id.clone(),
            host_alias: session.host_alias.clone(),
            status: session.status(),
            exit_code: session.exit_code,
            started_at: session.started_at,
            ended_at: session.ended_at,
        }
    }
}

/// Stage of an in-flight connection attempt, for the host list spinner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectStage {
    /// Spawn RPC in flight
    Spawning,
    /// Spawned, waiting for first output
    Waiting,
}

/// Aggregated connecting state per host. A host can have several attempts
/// in flight at once (double-click); `count` tracks them and the entry is
/// removed, never left at zero, when the last attempt settles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectingHostStatus {
    pub stage: ConnectStage,
    pub started_at: DateTime<Utc>,
    pub count: u32,
}
