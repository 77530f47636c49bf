//! Owns the set of bound listening sockets and reconciles it against a new
//! configuration snapshot on reload, keeping privileged (<1024) ports bound
//! across the reconciliation rather than closing and racing to rebind them.

use std::sync::Arc;

use crate::config::{Config, ListenerConfig};
use crate::error::CoreError;

use super::tcp::TcpListener;

#[cfg(feature = "rustls")]
use super::tls::TlsAdaptor;

/// One bound listener plus the TLS material it terminates with, if any.
pub struct ListenerHandle {
    pub listener: TcpListener,
    #[cfg(feature = "rustls")]
    pub tls: Option<TlsAdaptor>,
}

impl ListenerHandle {
    fn open(config: ListenerConfig, global: &Config) -> Result<Self, CoreError> {
        let tls_requested = config.tls;
        let listener = TcpListener::bind(config)?;

        #[cfg(feature = "rustls")]
        let tls = if tls_requested {
            Some(TlsAdaptor::from_config(&global.tls)?)
        } else {
            None
        };
        #[cfg(not(feature = "rustls"))]
        {
            let _ = (tls_requested, global);
        }

        Ok(Self {
            listener,
            #[cfg(feature = "rustls")]
            tls,
        })
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.listener.config.port
    }

    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.port() < 1024
    }
}

/// The live set of listeners. Rebuilt wholesale on reload except for
/// privileged ports already bound, which are carried over as-is since
/// rebinding them requires capabilities the process may have dropped after
/// startup.
pub struct ListenerManager {
    handles: Vec<Arc<ListenerHandle>>,
}

impl ListenerManager {
    pub fn open_all(config: &Config) -> Result<Self, CoreError> {
        let mut handles = Vec::with_capacity(config.listeners.len());
        for listener_config in &config.listeners {
            handles.push(Arc::new(ListenerHandle::open(listener_config.clone(), config)?));
        }
        if handles.is_empty() {
            return Err(CoreError::ConfigFailure("no listeners configured".into()));
        }
        Ok(Self { handles })
    }

    #[must_use]
    pub fn handles(&self) -> &[Arc<ListenerHandle>] {
        &self.handles
    }

    /// Reconcile against `new_config`: privileged-port listeners that are
    /// still requested at the same port are kept bound; every other
    /// listener is rebuilt from scratch. Listeners no longer requested are
    /// dropped (which closes them once their in-flight connections finish,
    /// since `Arc` keeps them alive for those).
    pub fn reload(&mut self, new_config: &Config) -> Result<(), CoreError> {
        let mut kept = Vec::with_capacity(new_config.listeners.len());

        for listener_config in &new_config.listeners {
            let carried = self.handles.iter().find(|h| {
                h.is_privileged() && h.port() == listener_config.port
                    && h.listener.config.bind_address == listener_config.bind_address
            });

            if let Some(handle) = carried {
                kept.push(Arc::clone(handle));
            } else {
                kept.push(Arc::new(ListenerHandle::open(listener_config.clone(), new_config)?));
            }
        }

        if kept.is_empty() {
            return Err(CoreError::ConfigFailure("reload would leave no listeners".into()));
        }

        self.handles = kept;
        tracing::info!(count = self.handles.len(), "listener set reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config_with_ports(ports: &[u16]) -> Config {
        let listeners_yaml: String = ports
            .iter()
            .map(|p| format!("  - bind_address: \"127.0.0.1\"\n    port: {p}\n"))
            .collect();
        let yaml = format!("listeners:\n{listeners_yaml}");
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn open_all_rejects_empty_listener_list() {
        let config = config_with_ports(&[]);
        assert!(ListenerManager::open_all(&config).is_err());
    }
}
