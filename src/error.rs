//! Error taxonomy for the connection front-end.
//!
//! Transient socket/TLS conditions never escape a client step, fatal ones set
//! a flag the worker observes, and a handful of categories map directly onto
//! an HTTP response code. Invariant violations are bugs, not input, and
//! therefore panic (see [`invariant`]) rather than flow through `Result`.

use std::io;

/// Errors that can surface from the accept loop, request assembly, or send path.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Recoverable socket condition (EAGAIN/EINTR, or TLS WANT_READ/WANT_WRITE).
    /// Never sets a connection's error flag; callers reschedule.
    #[error("transient I/O condition")]
    Transient,

    /// Non-recoverable socket or TLS error. Connection::error is set; the
    /// worker will destroy the client on the next step.
    #[error("fatal connection error: {0}")]
    Fatal(#[source] io::Error),

    /// Header block failed to parse, protocol wasn't ICE/HTTP, or the URI
    /// was invalid.
    #[error("request could not be parsed: {0}")]
    ParseFailure(String),

    /// Banned IP, not on the allow list, user-agent denied, or client-limit
    /// exceeded on a non-admin GET.
    #[error("admission denied: {0}")]
    AdmissionDenied(&'static str),

    /// Basic/ICY/legacy credential check failed.
    #[error("authentication failed")]
    AuthFailure,

    /// A listener failed to bind or configure; the listener is dropped and
    /// the server continues as long as one listener remains.
    #[error("listener configuration failed: {0}")]
    ConfigFailure(String),
}

impl CoreError {
    /// Status code a terminal dispatcher should send for this error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ParseFailure(_) => Some(400),
            Self::AdmissionDenied(_) => Some(403),
            Self::AuthFailure => Some(401),
            Self::Transient | Self::Fatal(_) | Self::ConfigFailure(_) => None,
        }
    }
}

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Self::Transient,
            _ => Self::Fatal(err),
        }
    }
}

/// Panics with a consistent message for conditions that are bugs, not input:
/// a chunk size requested above the 2^24 sanity ceiling, or a `skip` offset
/// exceeding a `ConnectionBufs`'s total length.
macro_rules! invariant {
    ($cond:expr, $msg:literal $(, $arg:expr)*) => {
        if !$cond {
            panic!(concat!("invariant violated: ", $msg) $(, $arg)*);
        }
    };
}

pub(crate) use invariant;
