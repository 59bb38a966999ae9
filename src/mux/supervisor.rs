//! Connection supervision
//!
//! Two guards against a hung connect: a per-stage timeout on every RPC made
//! during setup (a hung backend call fails fast with an error naming the
//! stage), and a single per-attempt timer that, once expired without any
//! output, asks the user whether to give up. Confirming records the
//! `Timeout` close reason and kills the process; the exit event then keeps
//! the tab visible for diagnosis.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::backend::PtyBackend;
use crate::session::{CloseReason, SessionRegistry};
use crate::terminal::UserPrompt;

/// Setup failures, labelled by the stage that failed so the alert can name
/// it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SetupError {
    #[error("{stage} timed out after {secs}s")]
    StageTimeout { stage: &'static str, secs: u64 },

    #[error("{stage} failed: {message}")]
    StageFailed { stage: &'static str, message: String },
}

/// Run one connect-time call under its stage timeout.
pub async fn guarded<T, E, F>(stage: &'static str, limit: Duration, fut: F) -> Result<T, SetupError>
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(SetupError::StageFailed {
            stage,
            message: e.to_string(),
        }),
        Err(_) => Err(SetupError::StageTimeout {
            stage,
            secs: limit.as_secs(),
        }),
    }
}

/// Arm the connect-timeout timer for a freshly spawned session. Returns the
/// cancel handle, stored in the session record and fired on first output.
///
/// The timer re-checks the session at expiry: cancellation is best-effort
/// and output may have raced the deadline.
pub fn arm_connect_timer(
    backend: Arc<dyn PtyBackend>,
    registry: Arc<SessionRegistry>,
    prompt: Arc<dyn UserPrompt>,
    session_id: String,
    timeout: Duration,
) -> oneshot::Sender<()> {
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {}
            _ = cancel_rx => {
                debug!("Connect timer for session {} cancelled", session_id);
                return;
            }
        }

        if !registry.is_starting(&session_id) {
            debug!(
                "Connect timer for session {} fired after liveness, ignoring",
                session_id
            );
            return;
        }

        let label = registry
            .host_alias(&session_id)
            .unwrap_or_else(|| session_id.clone());
        let message = format!(
            "Still connecting to {} after {}s. Cancel the attempt?",
            label,
            timeout.as_secs()
        );

        if !prompt.confirm(&message).await {
            info!("User chose to keep waiting on session {}", session_id);
            return;
        }

        // the user may have answered after output finally arrived
        if !registry.is_starting(&session_id) {
            debug!("Session {} became live during confirmation", session_id);
            return;
        }

        registry.set_close_reason(&session_id, CloseReason::Timeout);
        if let Err(e) = backend.kill(&session_id).await {
            warn!("Kill after connect timeout failed for {}: {}", session_id, e);
        }
    });

    cancel_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::host::{Host, SpawnSpec};
    use crate::session::{ExitDisposition, Session};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct KillRecorder {
        killed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PtyBackend for KillRecorder {
        async fn spawn(
            &self,
            _spec: SpawnSpec,
            _cols: u16,
            _rows: u16,
        ) -> Result<String, BackendError> {
            Ok("1".into())
        }

        async fn write(&self, _session_id: &str, _data: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn resize(&self, _session_id: &str, _cols: u16, _rows: u16) -> Result<(), BackendError> {
            Ok(())
        }

        async fn kill(&self, session_id: &str) -> Result<(), BackendError> {
            self.killed.lock().push(session_id.to_string());
            Ok(())
        }
    }

    struct FixedAnswer {
        answer: AtomicBool,
        asked: AtomicBool,
    }

    #[async_trait]
    impl UserPrompt for FixedAnswer {
        async fn confirm(&self, _message: &str) -> bool {
            self.asked.store(true, Ordering::SeqCst);
            self.answer.load(Ordering::SeqCst)
        }
    }

    fn test_host() -> Host {
        Host {
            id: "h1".into(),
            alias: "prod".into(),
            hostname: "db".into(),
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

    fn setup(answer: bool) -> (Arc<KillRecorder>, Arc<SessionRegistry>, Arc<FixedAnswer>) {
        let backend = Arc::new(KillRecorder {
            killed: Mutex::new(Vec::new()),
        });
        let registry = Arc::new(SessionRegistry::default());
        registry
            .insert(Session::new("1".into(), &test_host(), 800))
            .unwrap();
        let prompt = Arc::new(FixedAnswer {
            answer: AtomicBool::new(answer),
            asked: AtomicBool::new(false),
        });
        (backend, registry, prompt)
    }

    #[tokio::test]
    async fn test_guarded_passes_success() {
        let result: Result<u32, SetupError> = guarded(
            "spawn remote shell",
            Duration::from_secs(1),
            async { Ok::<_, BackendError>(7) },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_guarded_labels_failure() {
        let result: Result<u32, SetupError> = guarded(
            "persist host state",
            Duration::from_secs(1),
            async { Err::<u32, _>(BackendError::Rpc("disk full".into())) },
        )
        .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("persist host state"));
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_labels_timeout() {
        let result: Result<u32, SetupError> = guarded(
            "spawn remote shell",
            Duration::from_secs(5),
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, BackendError>(0)
            },
        )
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, SetupError::StageTimeout { stage, .. } if stage == "spawn remote shell"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_confirmed_records_timeout_and_kills() {
        let (backend, registry, prompt) = setup(true);

        let cancel = arm_connect_timer(
            backend.clone() as Arc<dyn PtyBackend>,
            registry.clone(),
            prompt.clone() as Arc<dyn UserPrompt>,
            "1".into(),
            Duration::from_secs(15),
        );
        registry.set_connect_timer("1", cancel);

        tokio::time::sleep(Duration::from_secs(16)).await;

        assert!(prompt.asked.load(Ordering::SeqCst));
        assert_eq!(backend.killed.lock().as_slice(), &["1".to_string()]);
        // the recorded reason keeps the tab on exit
        assert_eq!(registry.on_exit("1", 1), Some(ExitDisposition::Retained));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_declined_keeps_waiting() {
        let (backend, registry, prompt) = setup(false);

        let _cancel = arm_connect_timer(
            backend.clone() as Arc<dyn PtyBackend>,
            registry.clone(),
            prompt.clone() as Arc<dyn UserPrompt>,
            "1".into(),
            Duration::from_secs(15),
        );

        tokio::time::sleep(Duration::from_secs(16)).await;

        assert!(prompt.asked.load(Ordering::SeqCst));
        assert!(backend.killed.lock().is_empty());
        assert!(registry.is_starting("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_cancelled_by_first_output() {
        let (backend, registry, prompt) = setup(true);

        let cancel = arm_connect_timer(
            backend.clone() as Arc<dyn PtyBackend>,
            registry.clone(),
            prompt.clone() as Arc<dyn UserPrompt>,
            "1".into(),
            Duration::from_secs(15),
        );
        registry.set_connect_timer("1", cancel);

        tokio::time::sleep(Duration::from_secs(5)).await;
        registry.note_output("1", "login banner").unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!prompt.asked.load(Ordering::SeqCst));
        assert!(backend.killed.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fired_after_liveness_is_noop() {
        let (backend, registry, prompt) = setup(true);

        // cancel handle held but never wired up (lost race): the fire path
        // must still notice the session is live
        let _cancel = arm_connect_timer(
            backend.clone() as Arc<dyn PtyBackend>,
            registry.clone(),
            prompt.clone() as Arc<dyn UserPrompt>,
            "1".into(),
            Duration::from_secs(15),
        );

        registry.note_output("1", "banner").unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(!prompt.asked.load(Ordering::SeqCst));
        assert!(backend.killed.lock().is_empty());
    }
}
