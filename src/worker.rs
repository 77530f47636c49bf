//! The worker-pool seam: the accept loop's only contact with the pool that
//! drives a client through request assembly and beyond is this trait's
//! `enqueue` call.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::client::Client;
use crate::config::ConfigStore;
use crate::filter::FilterStore;
use crate::handlers::TerminalHandlers;
use crate::request_assembly::{step, StepOutcome};

/// External collaborator that owns a client once the accept loop is done
/// with it. The only contract this core depends on: accept a client and a
/// time reference (its schedule timestamp), return quickly.
pub trait WorkerPool: Send + Sync {
    fn enqueue(&self, client: Client);
}

/// A `WorkerPool` that spawns one Tokio task per client and drives request
/// assembly to completion inside it, looping `step` until the client is
/// handed off, dropped, or answered directly.
pub struct TokioWorkerPool {
    config: ConfigStore,
    filters: Arc<FilterStore>,
    handlers: Arc<dyn TerminalHandlers>,
    client_count: Arc<std::sync::atomic::AtomicUsize>,
}

impl TokioWorkerPool {
    #[must_use]
    pub fn new(
        config: ConfigStore,
        filters: Arc<FilterStore>,
        handlers: Arc<dyn TerminalHandlers>,
        client_count: Arc<std::sync::atomic::AtomicUsize>,
    ) -> Self {
        Self { config, filters, handlers, client_count }
    }

    fn drive(&self, mut client: Client) -> JoinHandle<()> {
        let config = self.config.clone();
        let filters = Arc::clone(&self.filters);
        let handlers = Arc::clone(&self.handlers);
        let client_count = Arc::clone(&self.client_count);

        tokio::spawn(async move {
            loop {
                let wake_at = client.schedule_at;
                tokio::time::sleep_until(wake_at.into()).await;

                let snapshot = config.current();
                let count = client_count.load(Ordering::Relaxed);
                match step(client, &snapshot, &filters, &handlers, count).await {
                    Ok(StepOutcome::Continue(next)) => {
                        client = next;
                        continue;
                    }
                    Ok(StepOutcome::Dropped) => {
                        client_count.fetch_sub(1, Ordering::Relaxed);
                        tracing::debug!("client dropped during request assembly");
                        return;
                    }
                    Ok(StepOutcome::HandedOff) => {
                        return;
                    }
                    Ok(StepOutcome::Responded(mut responded)) => {
                        if let Err(e) = responded.flush_refbuf().await {
                            tracing::warn!(error = %e, "failed to send canned response");
                        }
                        client_count.fetch_sub(1, Ordering::Relaxed);
                        return;
                    }
                    Err(e) => {
                        client_count.fetch_sub(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "request assembly failed");
                        return;
                    }
                }
            }
        })
    }
}

impl WorkerPool for TokioWorkerPool {
    fn enqueue(&self, client: Client) {
        self.drive(client);
    }
}
