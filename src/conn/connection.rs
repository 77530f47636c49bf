//! The `Connection` wrapper: socket handle, ID, peer address, counters.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::addr::strip_ipv6_mapped_prefix;
use super::sendbuf::ConnectionBufs;
use super::Transport;
use crate::error::CoreError;

/// Global, strictly-monotonic connection ID counter. An `AtomicU64` gives
/// the same cross-thread ordering guarantee a spin-lock would, without one.
pub struct NextConnId(AtomicU64);

impl NextConnId {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for NextConnId {
    fn default() -> Self {
        Self::new()
    }
}

/// An accepted socket plus everything the rest of the core needs to track
/// about it: a unique ID, its peer's address (with any `::ffff:` prefix
/// stripped once), a bytes-sent counter, an error flag, and deadlines.
pub struct Connection {
    pub id: u64,
    transport: Transport,
    pub peer_ip: String,
    pub local_addr: SocketAddr,
    bytes_sent: AtomicU64,
    error: AtomicBool,
    pub connect_time: Instant,
    pub disconnect_deadline: Instant,
}

impl Connection {
    /// Attach an accepted socket, assigning the next connection ID and
    /// deriving the peer-IP string (see [`strip_ipv6_mapped_prefix`]).
    pub fn init(
        transport: Transport,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        id_source: &NextConnId,
        header_timeout: Duration,
    ) -> Self {
        let peer_ip = strip_ipv6_mapped_prefix(&remote_addr.ip().to_string()).to_string();
        let now = Instant::now();
        Self {
            id: id_source.next(),
            transport,
            peer_ip,
            local_addr,
            bytes_sent: AtomicU64::new(0),
            error: AtomicBool::new(false),
            connect_time: now,
            disconnect_deadline: now + header_timeout,
        }
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.transport.is_tls()
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    pub fn set_error(&self) {
        self.error.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn deadline_passed(&self, now: Instant) -> bool {
        now > self.disconnect_deadline
    }

    pub fn extend_deadline(&mut self, from: Instant, timeout: Duration) {
        self.disconnect_deadline = from + timeout;
    }

    /// Read into `buf`, returning the number of bytes read (0 = peer closed).
    /// `WouldBlock`/`Interrupted` surface as [`CoreError::Transient`]; other
    /// errors set the error flag and surface as [`CoreError::Fatal`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, CoreError> {
        use tokio::io::AsyncReadExt;
        match self.transport.read(buf).await {
            Ok(n) => Ok(n),
            Err(e) => {
                let err = CoreError::from(e);
                if matches!(err, CoreError::Fatal(_)) {
                    self.set_error();
                }
                Err(err)
            }
        }
    }

    /// Scatter-gather send of `bufs` starting at byte offset `skip`. See
    /// [`ConnectionBufs::send_via`] for the partial-send contract.
    pub async fn send(&mut self, bufs: &mut ConnectionBufs, skip: usize) -> Result<usize, CoreError> {
        match bufs.send_via(&mut self.transport, skip).await {
            Ok(n) => {
                self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                Ok(n)
            }
            Err(e) => {
                let err = CoreError::from(e);
                if matches!(err, CoreError::Fatal(_)) {
                    self.set_error();
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_monotonic_across_calls() {
        let counter = NextConnId::new();
        let mut last = 0;
        for _ in 0..1000 {
            let id = counter.next();
            assert!(id > last);
            last = id;
        }
    }
}
