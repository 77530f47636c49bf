//! A thin wrapper over `tokio::net::TcpListener` that applies the
//! per-listener socket options the configuration asks for before handing
//! the stream back to the accept loop.

use std::net::SocketAddr;

use socket2::SockRef;
use tokio::net::{TcpListener as TokioTcpListener, TcpSocket, TcpStream};

use crate::config::ListenerConfig;
use crate::error::CoreError;

/// An accepted socket paired with both ends' addresses, before it has been
/// wrapped in a [`super::Transport`] or handed a connection ID.
pub struct Accepted {
    pub stream: TcpStream,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
}

/// A bound, listening TCP socket plus the listener config that produced it.
pub struct TcpListener {
    inner: TokioTcpListener,
    pub config: ListenerConfig,
}

impl TcpListener {
    /// Bind and start listening per `config` (backlog, and where set,
    /// `SO_SNDBUF`/TCP segment size hints).
    pub fn bind(config: ListenerConfig) -> Result<Self, CoreError> {
        let addr = SocketAddr::new(config.bind_address, config.port);
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| CoreError::ConfigFailure(format!("socket({addr}): {e}")))?;

        socket
            .set_reuseaddr(true)
            .map_err(|e| CoreError::ConfigFailure(format!("SO_REUSEADDR({addr}): {e}")))?;
        if let Some(sndbuf) = config.send_buffer {
            socket
                .set_send_buffer_size(sndbuf)
                .map_err(|e| CoreError::ConfigFailure(format!("SO_SNDBUF({addr}): {e}")))?;
        }
        if let Some(mss) = config.mss {
            SockRef::from(&socket)
                .set_mss(mss)
                .map_err(|e| CoreError::ConfigFailure(format!("TCP_MAXSEG({addr}): {e}")))?;
        }
        socket
            .bind(addr)
            .map_err(|e| CoreError::ConfigFailure(format!("bind({addr}): {e}")))?;
        let inner = socket
            .listen(config.backlog)
            .map_err(|e| CoreError::ConfigFailure(format!("listen({addr}): {e}")))?;

        Ok(Self { inner, config })
    }

    /// Accept one connection. Cancel-safe: suitable for a `tokio::select!` arm.
    pub async fn accept(&self) -> std::io::Result<Accepted> {
        let (stream, remote_addr) = self.inner.accept().await?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;
        Ok(Accepted { stream, local_addr, remote_addr })
    }

    #[must_use]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
