//! The terminal handlers this core hands a classified client off to.
//! Their internals (admin UI, fileserve, source ingest, stats aggregation)
//! are out of scope here; this trait is the seam a real server plugs real
//! implementations into.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::client::Client;

/// Where a request was routed after classification, as seen by
/// [`TerminalHandlers`]. Carries the pieces each real handler needs that
/// aren't already on `Client`.
pub enum Route {
    /// `/admin.cgi` or `/admin/*`, after admin auth.
    Admin,
    /// A normal listener GET/HEAD, already alias-rewritten. `peer` is the
    /// client's address after X-Forwarded-For substitution.
    ListenerAttach { uri: String, peer: IpAddr },
    /// A fully-authenticated SOURCE/PUT. `peer` is the client's address
    /// after X-Forwarded-For substitution.
    SourceAttach { uri: String, peer: IpAddr },
    /// STATS with admin credentials: full stats feed.
    StatsFull,
    /// STATS with relay credentials on `/admin/streams`: slave feed.
    StatsSlave,
}

/// External collaborators a dispatched client is finally handed to. A real
/// deployment wires this to its admin/fileserve/source/stats modules; the
/// accept loop and request-assembly state machine never call those modules
/// directly.
#[async_trait]
pub trait TerminalHandlers: Send + Sync {
    async fn dispatch(&self, client: Client, route: Route);

    /// The canned Flash cross-domain policy file, served before any header
    /// parsing when the Flash policy probe is detected.
    async fn serve_flashpolicy(&self, client: Client);
}

/// A `TerminalHandlers` that logs and drops every client. Useful for
/// exercising the accept loop and request assembly in isolation, and as the
/// default until a deployment supplies its real modules.
pub struct LoggingHandlers;

#[async_trait]
impl TerminalHandlers for LoggingHandlers {
    async fn dispatch(&self, client: Client, route: Route) {
        let route_name = match route {
            Route::Admin => "admin",
            Route::ListenerAttach { .. } => "listener-attach",
            Route::SourceAttach { .. } => "source-attach",
            Route::StatsFull => "stats-full",
            Route::StatsSlave => "stats-slave",
        };
        tracing::debug!(conn_id = client.connection.id, route = route_name, "dispatched (no-op handler)");
    }

    async fn serve_flashpolicy(&self, client: Client) {
        tracing::debug!(conn_id = client.connection.id, "flash policy probe (no-op handler)");
    }
}
