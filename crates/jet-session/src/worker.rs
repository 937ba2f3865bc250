//! Session worker thread.
//!
//! All connect, negotiate, disconnect and release work runs here, one job at
//! a time in submission order. The worker is the only writer of the session
//! status and the only owner of the tunnel handle.

use crate::config::SessionConfig;
use crate::event::{EventSink, ShellEvent, StatusUpdate};
use crate::manager::{Phase, SessionError, Shared};
use crate::store::StateStore;
use crate::tunnel::{InterfaceSettings, Negotiator, TunnelBackend, TunnelError, TunnelHandle};
use crossbeam_channel::Receiver;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Indicator text shown while connected
const INDICATOR_MESSAGE: &str = "VPN Connected";

/// Work submitted by the session manager
#[derive(Debug)]
pub(crate) enum Job {
    /// Run the connect sequence. `seq` identifies the caller's intent.
    Connect { config: SessionConfig, seq: u64 },
    /// Record a config that was rejected on the caller thread
    Reject { error: SessionError },
    /// Tear the session down
    Disconnect,
    /// Flush, force-release and exit
    Shutdown,
}

/// Everything the worker owns
pub(crate) struct SessionWorker {
    pub backend: Box<dyn TunnelBackend>,
    pub negotiator: Box<dyn Negotiator>,
    pub settings: InterfaceSettings,
    pub store: Arc<dyn StateStore>,
    pub sink: Arc<dyn EventSink>,
    pub shared: Arc<Shared>,
    /// Live handle; present iff the phase is Connecting or Connected
    pub tunnel: Option<TunnelHandle>,
    /// Whether the shell is showing the connected indicator
    pub indicator_visible: bool,
}

/// Spawn the worker thread.
pub(crate) fn spawn_worker(
    worker: SessionWorker,
    rx: Receiver<Job>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("jet-session".to_string())
        .spawn(move || {
            debug!("Session worker started");
            run_worker_loop(worker, rx);
            debug!("Session worker stopped");
        })
}

/// Main worker loop with panic isolation.
fn run_worker_loop(mut worker: SessionWorker, rx: Receiver<Job>) {
    loop {
        let job = match rx.recv() {
            Ok(job) => job,
            Err(_) => {
                // Manager dropped without shutdown
                debug!("Session channel closed, shutting down");
                worker.shutdown();
                break;
            }
        };

        if matches!(job, Job::Shutdown) {
            worker.shutdown();
            break;
        }

        let seq = match &job {
            Job::Connect { seq, .. } => Some(*seq),
            _ => None,
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| worker.process(job)));

        if let Err(panic_info) = result {
            let message = panic_message(&*panic_info);
            error!("Session worker panicked: {}", message);
            worker.recover(SessionError::Internal(message), seq);
        }
    }
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

impl SessionWorker {
    fn process(&mut self, job: Job) {
        match job {
            Job::Connect { config, seq } => self.connect(config, seq),
            Job::Reject { error } => self.reject(error),
            Job::Disconnect => self.disconnect(),
            // Handled in the main loop
            Job::Shutdown => {}
        }
    }

    fn connect(&mut self, config: SessionConfig, seq: u64) {
        let phase = self.shared.phase();
        if matches!(phase, Phase::Connecting | Phase::Connected) {
            debug!("Session already {}, ignoring connect", phase);
            return;
        }

        info!("Connecting to {}", config.endpoint());
        self.shared.set_phase(Phase::Connecting);
        self.sink.emit(ShellEvent::StatusChanged(StatusUpdate::connecting()));

        let device = match self.backend.establish(&self.settings) {
            Ok(device) => device,
            Err(e) => {
                self.fail(SessionError::establish(e), Some(seq));
                return;
            }
        };

        let handle = TunnelHandle::new(device);
        info!("Tunnel interface {} established", handle.name());
        self.tunnel = Some(handle);

        let negotiated = match self.tunnel.as_mut() {
            Some(handle) => handle
                .device_mut()
                .and_then(|device| self.negotiator.negotiate(&config, device)),
            None => Err(TunnelError::Closed),
        };

        if let Err(e) = negotiated {
            self.fail(SessionError::negotiation(e), Some(seq));
            return;
        }

        self.shared.set_connected();
        self.persist(true);
        self.sink.emit(ShellEvent::StatusChanged(StatusUpdate::connected()));
        self.show_indicator();

        info!("VPN connected to {}", config.endpoint());
    }

    fn disconnect(&mut self) {
        let phase = self.shared.phase();
        if phase == Phase::Disconnected && self.tunnel.is_none() {
            debug!("Session already disconnected, ignoring disconnect");
            return;
        }

        info!("Disconnecting VPN");
        self.shared.set_phase(Phase::Disconnecting);
        self.release_tunnel();
        self.settle_disconnected();

        info!("VPN disconnected");
    }

    fn reject(&mut self, error: SessionError) {
        warn!("Rejected connect: {}", error);
        self.shared.set_last_error(error.to_string());
        self.emit_error(&error);
    }

    /// End a failed connect attempt.
    fn fail(&mut self, error: SessionError, seq: Option<u64>) {
        error!("VPN connection failed: {}", error);

        self.release_tunnel();
        self.shared.set_failed(error.to_string());
        self.persist(false);
        self.emit_error(&error);
        self.sink.emit(ShellEvent::StatusChanged(StatusUpdate::disconnected()));
        self.clear_indicator();

        if let Some(seq) = seq {
            self.shared.settle_intent(seq);
        }
    }

    /// Force a consistent state after a panic inside a job.
    ///
    /// The job may have died mid-teardown, so nothing is inferred from the
    /// phase: `fail` releases whatever is left and clears a visible indicator.
    fn recover(&mut self, error: SessionError, seq: Option<u64>) {
        self.fail(error, seq);
    }

    fn shutdown(&mut self) {
        info!("Shutting down session worker");

        let phase = self.shared.phase();
        self.release_tunnel();

        if phase != Phase::Disconnected {
            self.settle_disconnected();
        } else {
            self.persist(false);
            self.clear_indicator();
        }
    }

    /// Final step of every teardown: Disconnected, flag cleared, shell told.
    fn settle_disconnected(&mut self) {
        self.shared.set_phase(Phase::Disconnected);
        self.persist(false);
        self.sink.emit(ShellEvent::StatusChanged(StatusUpdate::disconnected()));
        self.clear_indicator();
    }

    fn release_tunnel(&mut self) {
        if let Some(mut handle) = self.tunnel.take() {
            handle.release();
        }
    }

    fn show_indicator(&mut self) {
        self.indicator_visible = true;
        self.sink.emit(ShellEvent::Indicator {
            visible: true,
            message: INDICATOR_MESSAGE.to_string(),
        });
    }

    /// Clear the indicator if it is showing
    fn clear_indicator(&mut self) {
        if !self.indicator_visible {
            return;
        }
        self.indicator_visible = false;
        self.sink.emit(ShellEvent::Indicator {
            visible: false,
            message: INDICATOR_MESSAGE.to_string(),
        });
    }

    fn emit_error(&self, error: &SessionError) {
        self.sink.emit(ShellEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn persist(&self, connected: bool) {
        if let Err(e) = self.store.save(connected) {
            warn!("Failed to persist connection state: {}", e);
        }
    }
}
