//! Session registry
//!
//! Authoritative map of session id → lifecycle record, plus the per-host
//! aggregation of in-flight connection attempts. Every other component
//! consults this registry; only the event multiplexer and the connection
//! supervisor write into it. Transitions are serialized by the event loop;
//! the maps are shared for lookup, not for parallel mutation.

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::state::{CloseReason, SessionStatus};
use super::types::{ConnectStage, ConnectingHostStatus, Session, SessionInfo};
use crate::config::RetentionPolicy;
use crate::host::Host;
use crate::terminal::Geometry;

/// Registry error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Duplicate session id: {0}")]
    DuplicateSession(String),

    #[error("State transition error: {0}")]
    StateTransition(String),
}

/// What the registry decided to do with an exited session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Record deleted; the tab disappears and the buffer goes with it
    Removed,
    /// Record kept with `status = exited` for diagnosis
    Retained,
}

/// Result of applying an output event to the registry.
pub struct OutputOutcome {
    /// This was the session's first-ever output
    pub first_output: bool,
    /// Credential write to perform, if the auto-auth heuristic fired
    pub auth_reply: Option<Zeroizing<String>>,
}

pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    connecting: DashMap<String, ConnectingHostStatus>,
    retention: RetentionPolicy,
}

impl SessionRegistry {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            connecting: DashMap::new(),
            retention,
        }
    }

    // ---- connection attempt aggregation ----

    /// A connect attempt for this host entered the spawn stage. Several
    /// attempts may be in flight at once; the entry keeps the earliest
    /// start time.
    pub fn begin_connecting(&self, host: &Host) {
        let mut entry = self
            .connecting
            .entry(host.id.clone())
            .or_insert_with(|| ConnectingHostStatus {
                stage: ConnectStage::Spawning,
                started_at: Utc::now(),
                count: 0,
            });
        entry.count += 1;
        entry.stage = ConnectStage::Spawning;
        debug!(
            "Host {} connecting, {} attempt(s) in flight",
            host.id, entry.count
        );
    }

    /// The spawn RPC resolved; the attempt now waits for first output.
    pub fn mark_waiting(&self, host_id: &str) {
        if let Some(mut entry) = self.connecting.get_mut(host_id) {
            entry.stage = ConnectStage::Waiting;
        }
    }

    /// One attempt settled (first output, exit, or setup failure).
    /// The entry is removed when the count reaches zero, never kept at zero.
    pub fn settle_connecting(&self, host_id: &str) {
        let remove = match self.connecting.get_mut(host_id) {
            Some(mut entry) => {
                if entry.count == 0 {
                    warn!("Connecting count for host {} already 0", host_id);
                    true
                } else {
                    entry.count -= 1;
                    entry.count == 0
                }
            }
            None => {
                debug!("settle_connecting for unknown host {}", host_id);
                false
            }
        };
        if remove {
            self.connecting.remove(host_id);
        }
    }

    /// Connecting state for a host, if any attempt is in flight.
    pub fn connecting_status(&self, host_id: &str) -> Option<ConnectingHostStatus> {
        self.connecting.get(host_id).map(|e| e.value().clone())
    }

    // ---- session lifecycle ----

    /// Insert a freshly spawned session. The registry never holds two live
    /// entries with the same backend id. Transitions are serialized by the
    /// event loop, so the check-then-insert is not racy.
    pub fn insert(&self, session: Session) -> Result<(), RegistryError> {
        let id = session.id.clone();
        if self.sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateSession(id));
        }
        info!("Session {} registered for host {}", id, session.host_id);
        self.sessions.insert(id, session);
        Ok(())
    }

    /// Arm the connect-timeout cancel handle for a session.
    pub fn set_connect_timer(&self, session_id: &str, cancel: oneshot::Sender<()>) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.connect_timer = Some(cancel);
        }
    }

    /// Stage a saved secret for auto-auth on this session.
    pub fn stage_secret(&self, session_id: &str, secret: String) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.auth = super::prompt::AutoAuth::staged(secret);
        }
    }

    /// Apply an output event: prompt-tail append, first-output transition
    /// (with timer cancel and connecting decrement), auto-auth scan.
    /// Returns `None` for sessions the registry does not know (late events
    /// after removal).
    pub fn note_output(&self, session_id: &str, data: &str) -> Option<OutputOutcome> {
        let (first_output, auth_reply, host_id) = {
            let mut session = self.sessions.get_mut(session_id)?;

            if session.status().is_terminal() {
                debug!("Output for exited session {}, ignoring", session_id);
                return None;
            }

            session.prompt_tail.push(data);

            let first_output = session.status() == SessionStatus::Starting;
            if first_output {
                if let Err(e) = session.mark_running() {
                    warn!("Session {}: {}", session_id, e);
                }
                session.cancel_connect_timer();
            }

            let auth_reply = {
                let tail = session.prompt_tail.as_str().to_string();
                session.auth.try_fire(&tail)
            };

            (first_output, auth_reply, session.host_id.clone())
        };

        if first_output {
            self.settle_connecting(&host_id);
            info!("Session {} running (first output)", session_id);
        }

        Some(OutputOutcome {
            first_output,
            auth_reply,
        })
    }

    /// Record why a session is being closed. First write wins; the reason
    /// is consulted exactly once when the exit event arrives.
    pub fn set_close_reason(&self, session_id: &str, reason: CloseReason) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            if session.close_reason.is_none() {
                session.close_reason = Some(reason);
            } else {
                debug!(
                    "Close reason for session {} already recorded, keeping it",
                    session_id
                );
            }
        }
    }

    /// Apply an exit event: consult-and-clear the close reason, decide
    /// retention, release auxiliary state, decrement the connecting counter
    /// when the attempt never produced output.
    pub fn on_exit(&self, session_id: &str, exit_code: u32) -> Option<ExitDisposition> {
        let (retain, was_starting, host_id) = {
            let mut session = self.sessions.get_mut(session_id)?;

            let was_starting = session.status() == SessionStatus::Starting;
            let reason = session.close_reason.take().unwrap_or(CloseReason::Unknown);
            let retain = self.retention.should_retain(reason, exit_code);

            if let Err(e) = session.mark_exited(exit_code) {
                warn!("Session {}: {}", session_id, e);
                return None;
            }
            session.release_aux();

            info!(
                "Session {} exited (code {}, reason {:?}, retain {})",
                session_id, exit_code, reason, retain
            );
            (retain, was_starting, session.host_id.clone())
        };

        if was_starting {
            self.settle_connecting(&host_id);
        }

        if retain {
            Some(ExitDisposition::Retained)
        } else {
            self.sessions.remove(session_id);
            Some(ExitDisposition::Removed)
        }
    }

    // ---- geometry bookkeeping ----

    /// Whether the given geometry differs from the last pair successfully
    /// sent for this session.
    pub fn geometry_changed(&self, session_id: &str, geometry: Geometry) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.last_sent_geometry != Some(geometry))
            .unwrap_or(false)
    }

    pub fn record_sent_geometry(&self, session_id: &str, geometry: Geometry) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_sent_geometry = Some(geometry);
        }
    }

    /// Forget the last sent geometry so the next attempt is not skipped.
    pub fn clear_sent_geometry(&self, session_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_sent_geometry = None;
        }
    }

    // ---- queries ----

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn is_starting(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.status() == SessionStatus::Starting)
            .unwrap_or(false)
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions.get(session_id).map(|s| s.status())
    }

    pub fn host_alias(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).map(|s| s.host_alias.clone())
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions
            .get(session_id)
            .map(|s| SessionInfo::from(&*s))
    }

    /// All sessions, oldest first (tab order).
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|s| SessionInfo::from(&*s))
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str) -> Host {
        Host {
            id: id.into(),
            alias: String::new(),
            hostname: "db.example.com".into(),
            user: "admin".into(),
            port: 22,
            identity_file: None,
            proxy_jump: None,
            env_vars: None,
            has_saved_secret: false,
            live_insight: false,
            static_insight: false,
        }
    }

    fn session(id: &str, host_id: &str) -> Session {
        Session::new(id.into(), &host(host_id), 800)
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::default()
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let reg = registry();
        reg.insert(session("1", "h1")).unwrap();
        assert!(matches!(
            reg.insert(session("1", "h1")),
            Err(RegistryError::DuplicateSession(_))
        ));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn test_double_click_connecting_count() {
        let reg = registry();
        let h = host("h1");

        reg.begin_connecting(&h);
        reg.begin_connecting(&h);
        assert_eq!(reg.connecting_status("h1").unwrap().count, 2);

        reg.settle_connecting("h1");
        assert_eq!(reg.connecting_status("h1").unwrap().count, 1);

        // last settle removes the entry instead of leaving it at zero
        reg.settle_connecting("h1");
        assert!(reg.connecting_status("h1").is_none());
    }

    #[test]
    fn test_first_output_transitions_and_settles() {
        let reg = registry();
        let h = host("h1");
        reg.begin_connecting(&h);
        reg.insert(session("1", "h1")).unwrap();
        reg.mark_waiting("h1");

        let outcome = reg.note_output("1", "motd\n").unwrap();
        assert!(outcome.first_output);
        assert_eq!(reg.status("1"), Some(SessionStatus::Running));
        assert!(reg.connecting_status("h1").is_none());

        // second output is not "first" and does not touch the counter
        let outcome = reg.note_output("1", "$ ").unwrap();
        assert!(!outcome.first_output);
    }

    #[test]
    fn test_first_output_cancels_timer() {
        let reg = registry();
        reg.insert(session("1", "h1")).unwrap();
        let (tx, mut rx) = oneshot::channel();
        reg.set_connect_timer("1", tx);

        reg.note_output("1", "banner").unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_auto_auth_fires_through_note_output() {
        let reg = registry();
        reg.insert(session("1", "h1")).unwrap();
        reg.stage_secret("1", "hunter2".into());

        let outcome = reg.note_output("1", "admin@db's password: ").unwrap();
        assert_eq!(outcome.auth_reply.unwrap().as_str(), "hunter2\n");

        // re-prompt: not retried
        let outcome = reg.note_output("1", "\nadmin@db's password: ").unwrap();
        assert!(outcome.auth_reply.is_none());
    }

    #[test]
    fn test_exit_user_close_removes() {
        let reg = registry();
        reg.insert(session("1", "h1")).unwrap();
        reg.note_output("1", "x").unwrap();

        reg.set_close_reason("1", CloseReason::User);
        assert_eq!(reg.on_exit("1", 0), Some(ExitDisposition::Removed));
        assert!(!reg.contains("1"));
    }

    #[test]
    fn test_exit_clean_zero_removes() {
        let reg = registry();
        reg.insert(session("1", "h1")).unwrap();
        reg.note_output("1", "x").unwrap();

        // no close reason recorded, exit 0: ordinary logout
        assert_eq!(reg.on_exit("1", 0), Some(ExitDisposition::Removed));
        assert!(!reg.contains("1"));
    }

    #[test]
    fn test_exit_unknown_nonzero_retains() {
        let reg = registry();
        reg.insert(session("1", "h1")).unwrap();
        reg.note_output("1", "x").unwrap();

        assert_eq!(reg.on_exit("1", 17), Some(ExitDisposition::Retained));
        let info = reg.get("1").unwrap();
        assert_eq!(info.status, SessionStatus::Exited);
        assert_eq!(info.exit_code, Some(17));
        assert!(info.ended_at.is_some());
    }

    #[test]
    fn test_exit_timeout_retains_even_zero() {
        let reg = registry();
        reg.insert(session("1", "h1")).unwrap();

        reg.set_close_reason("1", CloseReason::Timeout);
        assert_eq!(reg.on_exit("1", 0), Some(ExitDisposition::Retained));
        assert!(reg.contains("1"));
    }

    #[test]
    fn test_retention_policy_configurable() {
        let reg = SessionRegistry::new(RetentionPolicy {
            keep_on_timeout: false,
            keep_unknown_failures: false,
        });
        reg.insert(session("1", "h1")).unwrap();
        reg.set_close_reason("1", CloseReason::Timeout);
        assert_eq!(reg.on_exit("1", 0), Some(ExitDisposition::Removed));

        reg.insert(session("2", "h1")).unwrap();
        assert_eq!(reg.on_exit("2", 17), Some(ExitDisposition::Removed));
    }

    #[test]
    fn test_close_reason_first_write_wins() {
        let reg = registry();
        reg.insert(session("1", "h1")).unwrap();

        reg.set_close_reason("1", CloseReason::Timeout);
        reg.set_close_reason("1", CloseReason::User);
        // timeout stands: the tab is retained
        assert_eq!(reg.on_exit("1", 0), Some(ExitDisposition::Retained));
    }

    #[test]
    fn test_exit_before_output_settles_connecting() {
        let reg = registry();
        let h = host("h1");
        reg.begin_connecting(&h);
        reg.insert(session("1", "h1")).unwrap();

        // auth failure: dies without ever producing output
        assert_eq!(reg.on_exit("1", 255), Some(ExitDisposition::Retained));
        assert!(reg.connecting_status("h1").is_none());
    }

    #[test]
    fn test_exit_after_output_does_not_double_settle() {
        let reg = registry();
        let h = host("h1");
        reg.begin_connecting(&h);
        reg.begin_connecting(&h);
        reg.insert(session("1", "h1")).unwrap();
        reg.insert(session("2", "h1")).unwrap();

        // session 1 produced output: decrements once
        reg.note_output("1", "x").unwrap();
        assert_eq!(reg.connecting_status("h1").unwrap().count, 1);

        // its later exit must not decrement again
        reg.on_exit("1", 0).unwrap();
        assert_eq!(reg.connecting_status("h1").unwrap().count, 1);
    }

    #[test]
    fn test_late_events_for_unknown_session() {
        let reg = registry();
        assert!(reg.note_output("ghost", "x").is_none());
        assert!(reg.on_exit("ghost", 0).is_none());
    }

    #[test]
    fn test_geometry_cache_roundtrip() {
        let reg = registry();
        reg.insert(session("1", "h1")).unwrap();
        let geo = Geometry { cols: 120, rows: 40 };

        assert!(reg.geometry_changed("1", geo));
        reg.record_sent_geometry("1", geo);
        assert!(!reg.geometry_changed("1", geo));
        assert!(reg.geometry_changed("1", Geometry { cols: 80, rows: 24 }));

        reg.clear_sent_geometry("1");
        assert!(reg.geometry_changed("1", geo));
    }

    #[test]
    fn test_list_sorted_by_start() {
        let reg = registry();
        reg.insert(session("a", "h1")).unwrap();
        reg.insert(session("b", "h2")).unwrap();
        let list = reg.list();
        assert_eq!(list.len(), 2);
        assert!(list[0].started_at <= list[1].started_at);
    }
}
