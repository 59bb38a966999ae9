//! Session multiplexer
//!
//! Ties the core together: the connect flow (secret staging, spawn, timer
//! arming), the event pump that demultiplexes the backend's output/exit
//! streams, and the switch-over that replays a session's buffer into the
//! shared renderer.
//!
//! The pump is the single writer applying events to the registry, so all
//! state transitions for a session are serialized; events for different
//! sessions may interleave arbitrarily, which is why everything is keyed by
//! session id.

pub mod supervisor;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{PtyBackend, PtyEvent};
use crate::config::MuxConfig;
use crate::host::{Host, HostDirectory, SecretStore};
use crate::session::{
    CloseReason, ExitDisposition, OutputBufferStore, RegistryError, Session, SessionRegistry,
};
use crate::terminal::{Geometry, GeometrySync, TerminalSurface, UserPrompt};

pub use supervisor::{arm_connect_timer, guarded, SetupError};

/// Connect flow errors. Setup failures carry the stage label for the alert.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    #[error("Host not found: {0}")]
    UnknownHost(String),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The multiplexing core. One instance per client process; all sessions
/// share it, and only one session is rendered at a time.
pub struct SessionMux {
    backend: Arc<dyn PtyBackend>,
    surface: Arc<dyn TerminalSurface>,
    hosts: Arc<dyn HostDirectory>,
    secrets: Arc<dyn SecretStore>,
    prompt: Arc<dyn UserPrompt>,
    registry: Arc<SessionRegistry>,
    buffers: Arc<OutputBufferStore>,
    geometry: Arc<GeometrySync>,
    /// The session currently rendered by the shared surface
    active: Mutex<Option<String>>,
    config: MuxConfig,
}

impl SessionMux {
    pub fn new(
        backend: Arc<dyn PtyBackend>,
        surface: Arc<dyn TerminalSurface>,
        hosts: Arc<dyn HostDirectory>,
        secrets: Arc<dyn SecretStore>,
        prompt: Arc<dyn UserPrompt>,
        config: MuxConfig,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(config.retention.clone()));
        let buffers = Arc::new(OutputBufferStore::new(config.buffer_limits()));
        let geometry = Arc::new(GeometrySync::new(
            Arc::clone(&backend),
            Arc::clone(&surface),
            Arc::clone(&registry),
        ));
        Arc::new(Self {
            backend,
            surface,
            hosts,
            secrets,
            prompt,
            registry,
            buffers,
            geometry,
            active: Mutex::new(None),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn buffers(&self) -> &Arc<OutputBufferStore> {
        &self.buffers
    }

    pub fn geometry(&self) -> &Arc<GeometrySync> {
        &self.geometry
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn active_session(&self) -> Option<String> {
        self.active.lock().clone()
    }

    fn is_active(&self, session_id: &str) -> bool {
        self.active.lock().as_deref() == Some(session_id)
    }

    // ---- connect flow ----

    /// Open a new session to a saved host. Resolves the host, bumps its
    /// recency, stages a saved secret if one exists, spawns the remote
    /// shell and arms the connect timer. Every backend call runs under its
    /// stage timeout; on failure the connecting counter is rolled back and
    /// the stage-labelled error is returned for the alert.
    pub async fn connect(self: &Arc<Self>, host_id: &str) -> Result<String, ConnectError> {
        let limit = self.config.rpc_timeout();

        let host = guarded("resolve host", limit, self.hosts.get(host_id))
            .await?
            .ok_or_else(|| ConnectError::UnknownHost(host_id.to_string()))?;

        self.registry.begin_connecting(&host);
        match self.connect_attempt(&host).await {
            Ok(session_id) => Ok(session_id),
            Err(e) => {
                warn!("Connect to {} failed: {}", host.label(), e);
                self.registry.settle_connecting(&host.id);
                Err(e)
            }
        }
    }

    async fn connect_attempt(self: &Arc<Self>, host: &Host) -> Result<String, ConnectError> {
        let limit = self.config.rpc_timeout();

        guarded("persist host state", limit, self.hosts.touch(&host.id)).await?;

        // a secret-store hiccup must never block the connect flow
        let secret = match tokio::time::timeout(limit, self.secrets.get(&host.id)).await {
            Ok(Ok(secret)) => secret,
            Ok(Err(e)) => {
                warn!("Secret lookup for host {} failed: {}", host.id, e);
                None
            }
            Err(_) => {
                warn!("Secret lookup for host {} timed out", host.id);
                None
            }
        };

        let geometry = self.surface.measure_fit().unwrap_or(Geometry::FALLBACK);
        let spec = host.spawn_spec();
        let session_id = guarded(
            "spawn remote shell",
            limit,
            self.backend.spawn(spec, geometry.cols, geometry.rows),
        )
        .await?;

        self.registry.mark_waiting(&host.id);

        let session = Session::new(session_id.clone(), host, self.config.prompt_tail_chars);
        self.registry.insert(session)?;
        if let Some(secret) = secret {
            self.registry.stage_secret(&session_id, secret);
        }

        let cancel = arm_connect_timer(
            Arc::clone(&self.backend),
            Arc::clone(&self.registry),
            Arc::clone(&self.prompt),
            session_id.clone(),
            self.config.connect_timeout(),
        );
        self.registry.set_connect_timer(&session_id, cancel);

        info!("Session {} spawned for host {}", session_id, host.id);
        Ok(session_id)
    }

    // ---- event pump ----

    /// Drive the core from the backend's event stream. Subscribed once for
    /// the process lifetime, not per session.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<PtyEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PtyEvent::Output { session_id, data } => {
                    self.handle_output(&session_id, &data).await;
                }
                PtyEvent::Exit { session_id, code } => {
                    self.handle_exit(&session_id, code).await;
                }
            }
        }
        debug!("Backend event stream closed");
    }

    pub fn spawn_pump(self: &Arc<Self>, events: mpsc::Receiver<PtyEvent>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(events))
    }

    async fn handle_output(&self, session_id: &str, data: &str) {
        let outcome = match self.registry.note_output(session_id, data) {
            Some(outcome) => outcome,
            None => {
                debug!("Output for unknown session {}, dropped", session_id);
                return;
            }
        };

        if let Some(reply) = outcome.auth_reply {
            info!("Auto-filling saved password for session {}", session_id);
            if let Err(e) = self.backend.write(session_id, &reply).await {
                warn!("Credential write for session {} failed: {}", session_id, e);
            }
        }

        self.buffers.append(session_id, data);

        // forward to the shared renderer only while this session is the
        // active one, re-checked immediately before the write
        if self.is_active(session_id) {
            if let Err(e) = self.surface.write(data).await {
                debug!("Renderer write for session {} failed: {}", session_id, e);
            }
        }
    }

    async fn handle_exit(&self, session_id: &str, code: u32) {
        match self.registry.on_exit(session_id, code) {
            Some(ExitDisposition::Removed) => {
                self.buffers.delete(session_id);
                let mut active = self.active.lock();
                if active.as_deref() == Some(session_id) {
                    *active = None;
                }
            }
            Some(ExitDisposition::Retained) => {
                // tab stays visible with the exit code; buffer kept for
                // diagnosis
            }
            None => debug!("Exit for unknown session {}, dropped", session_id),
        }
    }

    // ---- switch-over ----

    /// Make a session the visible one: reset the shared renderer, replay
    /// the session's flattened buffer, resynchronize geometry, restore
    /// focus. The active slot is re-checked immediately before the replay
    /// write since the flush is asynchronous.
    pub async fn activate(self: &Arc<Self>, session_id: &str) -> Result<(), RegistryError> {
        if !self.registry.contains(session_id) {
            return Err(RegistryError::SessionNotFound(session_id.to_string()));
        }

        *self.active.lock() = Some(session_id.to_string());
        self.surface.clear_selection();
        self.surface.reset();

        if let Some(text) = self.buffers.read(session_id) {
            if self.is_active(session_id) {
                if let Err(e) = self.surface.write(&text).await {
                    debug!("Buffer replay for session {} failed: {}", session_id, e);
                }
            }
        }

        self.geometry
            .schedule(session_id, self.config.switch_resize_delay());
        self.geometry.settle(
            session_id,
            self.config.settle_ticks,
            self.config.settle_interval(),
        );
        self.surface.focus();
        Ok(())
    }

    // ---- user actions ----

    /// User closed the tab: record the reason, ask the backend to kill.
    /// The exit event does the bookkeeping.
    pub async fn close_session(&self, session_id: &str) {
        self.registry.set_close_reason(session_id, CloseReason::User);
        if let Err(e) = self.backend.kill(session_id).await {
            warn!("Kill for session {} failed: {}", session_id, e);
        }
    }

    /// Forward emulator input to the remote process. Transient failures are
    /// logged, never surfaced as a dialog.
    pub async fn write_input(&self, session_id: &str, data: &str) {
        if let Err(e) = self.backend.write(session_id, data).await {
            warn!("Input write for session {} failed: {}", session_id, e);
        }
    }

    /// A resize-triggering signal fired (container observer, window resize,
    /// sidebar toggle). Debounced for the active session.
    pub fn notify_resize(self: &Arc<Self>) {
        if let Some(session_id) = self.active_session() {
            self.geometry
                .schedule(&session_id, self.config.resize_debounce());
        }
    }
}
