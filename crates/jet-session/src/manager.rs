//! Session Manager
//!
//! Owns the connection state machine and the single worker thread that
//! drives it.
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──▶ Disconnecting ──▶ Disconnected
//!                      │                                               ▲
//!                      └────────────── failure ────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let backend = VirtualBackend::new();
//! let manager = SessionManager::builder(backend, DelayNegotiator::default())
//!     .store(Arc::new(FileStateStore::new("/var/lib/jet")?))
//!     .sink(Arc::new(LogSink))
//!     .start()?;
//!
//! manager.connect("remote vpn.example.com 443\n")?;
//! // progress arrives through the event sink
//! manager.disconnect()?;
//! ```
//!
//! `connect` and `disconnect` only enqueue work and return immediately;
//! `status` reads an in-memory snapshot and never waits on the worker.

use crate::config::{ConfigError, SessionConfig};
use crate::event::{ErrorKind, EventSink, LogSink};
use crate::store::{MemoryStateStore, StateStore};
use crate::tunnel::{InterfaceSettings, Negotiator, TunnelBackend, TunnelError};
use crate::worker::{spawn_worker, Job, SessionWorker};
use crossbeam_channel::{unbounded, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl Phase {
    /// Check if a tunnel handle may be live in this phase
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Connecting | Phase::Connected)
    }

    /// Check if the session is fully connected
    pub fn is_connected(&self) -> bool {
        matches!(self, Phase::Connected)
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Phase::Disconnected => "Disconnected",
            Phase::Connecting => "Connecting...",
            Phase::Connected => "Connected",
            Phase::Disconnecting => "Disconnecting...",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Snapshot returned by [`SessionManager::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub phase: Phase,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Disconnected,
            last_error: None,
        }
    }
}

/// Session errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("VPN permission denied")]
    PermissionDenied,

    #[error("Failed to establish VPN interface: {0}")]
    Establish(String),

    #[error("Failed to establish VPN connection: {0}")]
    Negotiation(String),

    #[error("Connection error: {0}")]
    Internal(String),

    #[error("Session manager stopped")]
    Stopped,
}

impl SessionError {
    /// Map a failure of the establish step
    pub fn establish(e: TunnelError) -> Self {
        match e {
            TunnelError::PermissionDenied => SessionError::PermissionDenied,
            other => SessionError::Establish(other.to_string()),
        }
    }

    /// Map a failure of the negotiate step
    pub fn negotiation(e: TunnelError) -> Self {
        SessionError::Negotiation(e.to_string())
    }

    /// Error class reported to the shell
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Config(_) => ErrorKind::Config,
            SessionError::PermissionDenied => ErrorKind::Permission,
            SessionError::Establish(_) => ErrorKind::Establish,
            SessionError::Negotiation(_) => ErrorKind::Negotiation,
            SessionError::Internal(_) | SessionError::Stopped => ErrorKind::Internal,
        }
    }
}

/// Outcome of an accepted command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Work was queued for the worker
    Queued,
    /// The session is already heading where the command asks; nothing queued
    Ignored,
}

/// Where the queued work will leave the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Up,
    Down,
}

#[derive(Debug)]
struct Intent {
    target: Target,
    seq: u64,
}

/// State shared between callers and the worker.
///
/// Only the worker writes `status`; callers only write `intent`, and the
/// worker touches `intent` solely to roll back a failed connect.
pub(crate) struct Shared {
    status: RwLock<SessionStatus>,
    intent: Mutex<Intent>,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: RwLock::new(SessionStatus::default()),
            intent: Mutex::new(Intent {
                target: Target::Down,
                seq: 0,
            }),
        }
    }

    pub(crate) fn snapshot(&self) -> SessionStatus {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.snapshot().phase
    }

    fn update(&self, f: impl FnOnce(&mut SessionStatus)) {
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        f(&mut *status);
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.update(|s| s.phase = phase);
        debug!("Session phase: {}", phase);
    }

    pub(crate) fn set_connected(&self) {
        self.update(|s| {
            s.phase = Phase::Connected;
            s.last_error = None;
        });
        debug!("Session phase: {}", Phase::Connected);
    }

    pub(crate) fn set_failed(&self, message: String) {
        self.update(|s| {
            s.phase = Phase::Disconnected;
            s.last_error = Some(message);
        });
        debug!("Session phase: {}", Phase::Disconnected);
    }

    pub(crate) fn set_last_error(&self, message: String) {
        self.update(|s| s.last_error = Some(message));
    }

    fn intent(&self) -> MutexGuard<'_, Intent> {
        self.intent.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Roll the intent back to `Down` if nothing was queued after `seq`
    pub(crate) fn settle_intent(&self, seq: u64) {
        let mut intent = self.intent();
        if intent.seq == seq {
            intent.target = Target::Down;
        }
    }
}

/// Builder for [`SessionManager`]
pub struct SessionBuilder {
    backend: Box<dyn TunnelBackend>,
    negotiator: Box<dyn Negotiator>,
    settings: InterfaceSettings,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn EventSink>,
}

impl SessionBuilder {
    /// Interface settings passed to every `establish`
    pub fn settings(mut self, settings: InterfaceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Store for the persisted connected flag
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    /// Receiver of shell events
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validate settings and spawn the worker
    pub fn start(self) -> Result<SessionManager, SessionError> {
        self.settings.validate().map_err(SessionError::establish)?;

        let shared = Arc::new(Shared::new());
        let (jobs, rx) = unbounded();

        let worker = SessionWorker {
            backend: self.backend,
            negotiator: self.negotiator,
            settings: self.settings,
            store: self.store,
            sink: self.sink,
            shared: shared.clone(),
            tunnel: None,
            indicator_visible: false,
        };

        let handle = spawn_worker(worker, rx)
            .map_err(|e| SessionError::Internal(format!("Failed to spawn session worker: {}", e)))?;

        info!("Session manager started");

        Ok(SessionManager {
            jobs,
            shared,
            worker: Some(handle),
        })
    }
}

/// VPN session manager
///
/// - Parses each connect request once, on the caller thread
/// - Serializes all tunnel work on one worker thread
/// - Exposes a lock-light status snapshot
pub struct SessionManager {
    /// Queue into the worker
    jobs: Sender<Job>,
    /// Status snapshot and caller intent
    shared: Arc<Shared>,
    /// Worker thread, `None` once shut down
    worker: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Start building a manager around a tunnel backend and negotiator
    pub fn builder(
        backend: impl TunnelBackend + 'static,
        negotiator: impl Negotiator + 'static,
    ) -> SessionBuilder {
        SessionBuilder {
            backend: Box::new(backend),
            negotiator: Box::new(negotiator),
            settings: InterfaceSettings::default(),
            store: Arc::new(MemoryStateStore::new()),
            sink: Arc::new(LogSink),
        }
    }

    /// Request a connection using raw configuration text.
    ///
    /// Returns `Ignored` if the session is already connecting or connected.
    /// An unusable config fails immediately; the error is also recorded and
    /// emitted to the shell by the worker.
    pub fn connect(&self, raw_config: &str) -> Result<Admission, SessionError> {
        self.ensure_running()?;
        let mut intent = self.shared.intent();

        if intent.target == Target::Up {
            debug!("VPN already running, ignoring connect");
            return Ok(Admission::Ignored);
        }

        let config = match SessionConfig::parse(raw_config) {
            Ok(config) => config,
            Err(e) => {
                let error = SessionError::Config(e);
                self.submit(Job::Reject {
                    error: error.clone(),
                })?;
                return Err(error);
            }
        };

        debug!("Config content received, length: {}", raw_config.len());

        intent.seq += 1;
        intent.target = Target::Up;
        self.submit(Job::Connect {
            config,
            seq: intent.seq,
        })?;

        Ok(Admission::Queued)
    }

    /// Request a disconnect.
    ///
    /// Queued behind any in-flight connect. A no-op when already disconnected
    /// or when a disconnect is already queued.
    pub fn disconnect(&self) -> Result<Admission, SessionError> {
        self.ensure_running()?;
        let mut intent = self.shared.intent();

        if intent.target == Target::Down {
            debug!("VPN not running, ignoring disconnect");
            return Ok(Admission::Ignored);
        }

        intent.seq += 1;
        intent.target = Target::Down;
        self.submit(Job::Disconnect)?;

        Ok(Admission::Queued)
    }

    /// Current phase and last error
    pub fn status(&self) -> SessionStatus {
        self.shared.snapshot()
    }

    /// Check if the worker is still accepting commands
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Flush queued work, release any live tunnel, persist `false` and stop
    /// the worker. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        info!("Shutting down session manager");

        if self.jobs.send(Job::Shutdown).is_err() {
            debug!("Session worker already gone");
        }
        if worker.join().is_err() {
            error!("Session worker terminated abnormally");
        }
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.worker.is_some() {
            Ok(())
        } else {
            Err(SessionError::Stopped)
        }
    }

    fn submit(&self, job: Job) -> Result<(), SessionError> {
        self.jobs.send(job).map_err(|_| SessionError::Stopped)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
