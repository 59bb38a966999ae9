//! Fit-and-resize coordination
//!
//! Resize-triggering signals arrive in bursts (drag-resize observer ticks,
//! window resize, sidebar toggle, the post-mount settle loop). They are
//! coalesced into a single debounced action: measure the emulator's fit
//! geometry, then issue at most one resize RPC, suppressed when the pair
//! equals the last one successfully sent for that session. Some renderers
//! briefly report stale geometry right after a relayout; the suppression
//! plus the settle loop keep that from reaching the backend as jitter.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::backend::PtyBackend;
use crate::session::SessionRegistry;
use crate::terminal::TerminalSurface;

pub struct GeometrySync {
    backend: Arc<dyn PtyBackend>,
    surface: Arc<dyn TerminalSurface>,
    registry: Arc<SessionRegistry>,
    /// Cancel handle of the pending debounced action; a newer schedule
    /// supersedes the older one.
    pending: Mutex<Option<oneshot::Sender<()>>>,
}

impl GeometrySync {
    pub fn new(
        backend: Arc<dyn PtyBackend>,
        surface: Arc<dyn TerminalSurface>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            backend,
            surface,
            registry,
            pending: Mutex::new(None),
        }
    }

    /// Coalesce a resize signal for the given session. Any pending earlier
    /// schedule is cancelled; cancellation of an already-fired timer is a
    /// no-op.
    pub fn schedule(self: &Arc<Self>, session_id: &str, delay: Duration) {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        if let Some(prev) = self.pending.lock().replace(cancel_tx) {
            let _ = prev.send(());
        }

        let sync = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_rx => {
                    debug!("Resize for session {} superseded", session_id);
                    return;
                }
            }
            sync.sync_once(&session_id).await;
        });
    }

    /// Post-activation settle loop: re-measure a few times to catch
    /// renderers that report stale geometry right after a mount. Each tick
    /// goes through the same suppression, so a stable geometry costs no
    /// extra RPCs.
    pub fn settle(self: &Arc<Self>, session_id: &str, ticks: u32, interval: Duration) {
        let sync = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            for _ in 0..ticks {
                tokio::time::sleep(interval).await;
                sync.sync_once(&session_id).await;
            }
        });
    }

    /// Measure once and push the geometry if it differs from the last pair
    /// sent for this session.
    pub async fn sync_once(&self, session_id: &str) {
        let geometry = match self.surface.measure_fit() {
            Ok(g) => g,
            Err(e) => {
                // expected while the renderer is mounting or being disposed
                debug!("Fit measurement unavailable: {}", e);
                return;
            }
        };

        if !self.registry.geometry_changed(session_id, geometry) {
            debug!(
                "Session {} geometry unchanged ({}x{}), resize suppressed",
                session_id, geometry.cols, geometry.rows
            );
            return;
        }

        match self
            .backend
            .resize(session_id, geometry.cols, geometry.rows)
            .await
        {
            Ok(()) => {
                self.registry.record_sent_geometry(session_id, geometry);
                debug!(
                    "Session {} resized to {}x{}",
                    session_id, geometry.cols, geometry.rows
                );
            }
            Err(e) => {
                // do not surface: a transient resize failure must not
                // interrupt a live session. Forget the cache so the next
                // attempt is not spuriously skipped.
                warn!("Resize RPC failed for session {}: {}", session_id, e);
                self.registry.clear_sent_geometry(session_id);
            }
        }
    }
}
