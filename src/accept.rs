//! The accept loop: one dedicated task per listener feeding a single
//! dispatch point, which applies admission control, allocates the client,
//! and hands off to the worker pool. A control channel carries the
//! shutdown/reload events the source delivered via signalfd.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{Client, ListenerAttrs};
use crate::config::ConfigStore;
use crate::conn::{Connection, ListenerHandle, ListenerManager, NextConnId};
use crate::filter::FilterStore;
use crate::worker::WorkerPool;

/// Typed control-channel events, backed by a self-pipe-equivalent
/// `tokio::sync::mpsc` channel rather than a real signalfd.
#[derive(Debug, Clone, Copy)]
pub enum ControlEvent {
    Terminate,
    Reload,
}

struct ListenerAccepted {
    listener: Arc<ListenerHandle>,
}

/// Drives the accept loop until a [`ControlEvent::Terminate`] arrives.
pub struct AcceptLoop {
    config: ConfigStore,
    filters: Arc<FilterStore>,
    id_source: Arc<NextConnId>,
    worker_pool: Arc<dyn WorkerPool>,
    client_count: Arc<AtomicUsize>,
    new_connections_slowdown: Option<u32>,
}

enum Accepted {
    Connection {
        stream: tokio::net::TcpStream,
        remote_addr: std::net::SocketAddr,
        local_addr: std::net::SocketAddr,
        listener: Arc<ListenerHandle>,
    },
    ListenerClosed,
}

impl AcceptLoop {
    #[must_use]
    pub fn new(
        config: ConfigStore,
        filters: Arc<FilterStore>,
        worker_pool: Arc<dyn WorkerPool>,
        client_count: Arc<AtomicUsize>,
    ) -> Self {
        let slowdown = config.current().new_connections_slowdown;
        Self {
            config,
            filters,
            id_source: Arc::new(NextConnId::new()),
            worker_pool,
            client_count,
            new_connections_slowdown: slowdown,
        }
    }

    /// Run until a `Terminate` control event arrives. `control_rx` is
    /// consumed; the caller owns the corresponding sender (and decides how
    /// real signals get translated into sends on it). A `Reload` event
    /// rereads the configuration file and reconciles the live listener set
    /// against it, starting tasks for newly opened listeners and stopping
    /// tasks for ones `ListenerManager::reload` dropped.
    pub async fn run(&self, listeners: ListenerManager, mut control_rx: mpsc::Receiver<ControlEvent>) {
        let (accepted_tx, mut accepted_rx) = mpsc::channel::<Accepted>(256);
        let listeners = Arc::new(RwLock::new(listeners));

        let mut running: Vec<(Arc<ListenerHandle>, JoinHandle<()>)> = listeners
            .read()
            .handles()
            .iter()
            .map(|handle| (Arc::clone(handle), spawn_listener_task(Arc::clone(handle), accepted_tx.clone())))
            .collect();

        loop {
            tokio::select! {
                biased;
                event = control_rx.recv() => {
                    match event {
                        Some(ControlEvent::Terminate) | None => {
                            tracing::info!("accept loop terminating");
                            break;
                        }
                        Some(ControlEvent::Reload) => {
                            if let Err(e) = self.config.reload() {
                                tracing::warn!(error = %e, "config reload failed");
                                continue;
                            }
                            self.reconcile_listeners(&listeners, &mut running, &accepted_tx);
                        }
                    }
                }
                accepted = accepted_rx.recv() => {
                    match accepted {
                        Some(Accepted::Connection { stream, remote_addr, local_addr, listener }) => {
                            self.handle_accepted(stream, remote_addr, local_addr, listener).await;
                        }
                        Some(Accepted::ListenerClosed) | None => {}
                    }
                }
            }
        }

        for (_, task) in running {
            task.abort();
        }
    }

    /// Reconcile the live listener set against the just-reloaded
    /// configuration: listeners `ListenerManager::reload` kept (by `Arc`
    /// identity) keep their running accept task; listeners it dropped have
    /// their task aborted; newly opened listeners get a fresh task.
    fn reconcile_listeners(
        &self,
        listeners: &Arc<RwLock<ListenerManager>>,
        running: &mut Vec<(Arc<ListenerHandle>, JoinHandle<()>)>,
        accepted_tx: &mpsc::Sender<Accepted>,
    ) {
        let snapshot = self.config.current();
        if let Err(e) = listeners.write().reload(&snapshot) {
            tracing::warn!(error = %e, "listener reload failed, keeping prior set");
            return;
        }

        let current: Vec<Arc<ListenerHandle>> = listeners.read().handles().to_vec();

        running.retain(|(handle, task)| {
            let kept = current.iter().any(|h| Arc::ptr_eq(h, handle));
            if !kept {
                task.abort();
            }
            kept
        });

        for handle in &current {
            if !running.iter().any(|(h, _)| Arc::ptr_eq(h, handle)) {
                let task = spawn_listener_task(Arc::clone(handle), accepted_tx.clone());
                running.push((Arc::clone(handle), task));
            }
        }

        tracing::info!(count = current.len(), "listener set reconciled after reload");
    }

    async fn handle_accepted(
        &self,
        stream: tokio::net::TcpStream,
        remote_addr: std::net::SocketAddr,
        local_addr: std::net::SocketAddr,
        listener: Arc<ListenerHandle>,
    ) {
        let config = self.config.current();

        if self.filters.is_denied(&remote_addr.ip()) {
            tracing::debug!(peer = %remote_addr, "admission denied");
            return;
        }

        if let Some(multiplier) = self.new_connections_slowdown {
            if multiplier > 0 {
                tokio::time::sleep(Duration::from_millis(u64::from(multiplier))).await;
            }
        }

        #[cfg(feature = "rustls")]
        let transport = if let Some(tls) = &listener.tls {
            match tls.accept(stream).await {
                Ok(tls_stream) => crate::conn::Transport::Tls(Box::new(tls_stream)),
                Err(e) => {
                    tracing::warn!(peer = %remote_addr, error = %e, "tls handshake failed");
                    return;
                }
            }
        } else {
            crate::conn::Transport::Plain(stream)
        };
        #[cfg(not(feature = "rustls"))]
        let transport = crate::conn::Transport::Plain(stream);

        let header_timeout = Duration::from_millis(config.header_timeout_ms);
        let connection = Connection::init(transport, remote_addr, local_addr, &self.id_source, header_timeout);

        let attrs = Arc::new(ListenerAttrs {
            tls: listener.listener.config.tls,
            shoutcast_compat: listener.listener.config.shoutcast_compat,
            shoutcast_mount: listener.listener.config.shoutcast_mount.clone(),
        });

        let client = Client::new(connection, attrs, 8 * 1024);
        self.client_count.fetch_add(1, Ordering::Relaxed);
        self.worker_pool.enqueue(client);
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }
}

fn spawn_listener_task(listener: Arc<ListenerHandle>, tx: mpsc::Sender<Accepted>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.listener.accept().await {
                Ok(accepted) => {
                    let msg = Accepted::Connection {
                        stream: accepted.stream,
                        remote_addr: accepted.remote_addr,
                        local_addr: accepted.local_addr,
                        listener: Arc::clone(&listener),
                    };
                    if tx.send(msg).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(port = listener.port(), error = %e, "listener accept failed, closing");
                    let _ = tx.send(Accepted::ListenerClosed).await;
                    return;
                }
            }
        }
    })
}
