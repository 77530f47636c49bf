//! Ties the listener manager, filter store, worker pool, and accept loop
//! together into one bootable server.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::accept::{AcceptLoop, ControlEvent};
use crate::config::ConfigStore;
use crate::conn::ListenerManager;
use crate::error::CoreError;
use crate::filter::FilterStore;
use crate::handlers::TerminalHandlers;
use crate::worker::{TokioWorkerPool, WorkerPool};

/// A constructed, not-yet-running server: every piece needed to call
/// [`Server::run`] has already been built and validated.
pub struct Server {
    listeners: ListenerManager,
    accept_loop: AcceptLoop,
    control_tx: mpsc::Sender<ControlEvent>,
    control_rx: Option<mpsc::Receiver<ControlEvent>>,
}

impl Server {
    /// Load configuration, open listeners, and build the filter store and
    /// worker pool. `handlers` wires in the real admin/fileserve/source/
    /// stats modules; pass [`crate::handlers::LoggingHandlers`] to exercise
    /// the accept loop and request assembly without them.
    pub fn bootstrap(config_path: impl Into<std::path::PathBuf>, handlers: Arc<dyn TerminalHandlers>) -> Result<Self, CoreError> {
        let config = ConfigStore::load(config_path)?;
        let snapshot = config.current();

        let listeners = ListenerManager::open_all(&snapshot)?;
        let filters = Arc::new(FilterStore::load(&snapshot)?);
        let client_count = Arc::new(AtomicUsize::new(0));

        let worker_pool: Arc<dyn WorkerPool> = Arc::new(TokioWorkerPool::new(
            config.clone(),
            Arc::clone(&filters),
            handlers,
            Arc::clone(&client_count),
        ));

        let accept_loop = AcceptLoop::new(config, filters, worker_pool, client_count);
        let (control_tx, control_rx) = mpsc::channel(8);

        Ok(Self { listeners, accept_loop, control_tx, control_rx: Some(control_rx) })
    }

    /// A sender clone for delivering `Terminate`/`Reload` events, e.g. from
    /// a signal-handling task started alongside `run`.
    #[must_use]
    pub fn control_sender(&self) -> mpsc::Sender<ControlEvent> {
        self.control_tx.clone()
    }

    /// Run the accept loop until a `Terminate` event arrives.
    pub async fn run(mut self) {
        let control_rx = self.control_rx.take().expect("run called once");
        self.accept_loop.run(self.listeners, control_rx).await;
    }
}

/// Install handlers for SIGINT/SIGTERM (`Terminate`) and SIGHUP (`Reload`),
/// forwarding them onto `tx`. Mirrors the source's signalfd-delivered
/// control channel using Tokio's signal listeners instead.
#[cfg(unix)]
pub fn spawn_signal_forwarder(tx: mpsc::Sender<ControlEvent>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut hup = signal(SignalKind::hangup()).expect("install SIGHUP handler");

        loop {
            tokio::select! {
                _ = term.recv() => { let _ = tx.send(ControlEvent::Terminate).await; return; }
                _ = int.recv() => { let _ = tx.send(ControlEvent::Terminate).await; return; }
                _ = hup.recv() => { let _ = tx.send(ControlEvent::Reload).await; }
            }
        }
    });
}
