//! The per-connection state machine: the reference-counted response buffer,
//! the client's flags and position bookkeeping, and the tagged state that
//! replaces the original's `(process, destroy)` function-pointer pair.

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;

use crate::conn::{Connection, ConnectionBufs};
use crate::error::CoreError;

/// A byte buffer with an optional follow-on buffer chained behind it.
///
/// The chain models exactly one situation: bytes that arrived packed behind
/// a header block (stream data sent early by a source, or the rest of a
/// Shoutcast handshake) need to survive the handoff from the buffer that
/// held the header bytes to whatever reads next. One explicit `associated`
/// slot covers every call site that needs this; a general list never
/// chains more than one level deep in practice.
pub struct Refbuf {
    pub data: BytesMut,
    pub associated: Option<Box<Refbuf>>,
}

impl Refbuf {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: BytesMut::with_capacity(capacity), associated: None }
    }

    #[must_use]
    pub fn from_bytes(data: BytesMut) -> Self {
        Self { data, associated: None }
    }

    pub fn set_associated(&mut self, buf: Refbuf) {
        self.associated = Some(Box::new(buf));
    }

    /// Detach the follow-on buffer, promoting it to stand alone.
    pub fn take_associated(&mut self) -> Option<Refbuf> {
        self.associated.take().map(|b| *b)
    }
}

/// Boolean state carried per client. Kept as a plain struct rather than a
/// bitset: four independent booleans don't earn a packed representation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientFlags {
    pub keepalive: bool,
    pub active: bool,
    pub wants_flv: bool,
    pub skip_accesslog: bool,
}

/// Parsed request-line and header fields handed back by the (external,
/// opaque) HTTP parser, carried from `Parsed` onward.
#[derive(Debug, Clone, Default)]
pub struct ParsedRequest {
    pub method: String,
    pub uri: String,
    pub query: Option<String>,
    pub protocol: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl ParsedRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The state a client is currently in, replacing the source's
/// `(process, destroy)` function-pointer pair with a tagged variant driven
/// by one transition function ([`Client::step`] in the request-assembly
/// module).
pub enum ClientState {
    /// Listener is shoutcast-compatible; awaiting the password line.
    ShoutcastIntro,
    /// Reading and assembling the HTTP-style header block.
    RequestRead,
    /// Header block parsed and classified as a listener GET/HEAD.
    GetHandler(ParsedRequest),
    /// Header block parsed and classified as SOURCE/PUT.
    SourceHandler(ParsedRequest),
    /// Header block parsed and classified as STATS.
    StatsHandler(ParsedRequest),
}

impl ClientState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ShoutcastIntro => "shoutcast-intro",
            Self::RequestRead => "request-read",
            Self::GetHandler(_) => "get-handler",
            Self::SourceHandler(_) => "source-handler",
            Self::StatsHandler(_) => "stats-handler",
        }
    }
}

/// Per-listener attributes attached to a client at accept time.
#[derive(Debug, Clone, Default)]
pub struct ListenerAttrs {
    pub tls: bool,
    pub shoutcast_compat: bool,
    pub shoutcast_mount: Option<String>,
}

/// An accepted connection plus everything request assembly and the
/// terminal handlers need to drive it.
pub struct Client {
    pub connection: Connection,
    pub state: ClientState,
    /// In-progress read buffer while in `RequestRead`/`ShoutcastIntro`;
    /// `None` once ownership has passed to a terminal handler's refbuf.
    pub shared_data: Option<Refbuf>,
    /// Response (or synthesized-request) buffer once in a terminal state.
    pub refbuf: Option<Refbuf>,
    pub flags: ClientFlags,
    pub listener: Arc<ListenerAttrs>,
    pub schedule_at: Instant,
    pub created_at: Instant,
}

impl Client {
    #[must_use]
    pub fn new(connection: Connection, listener: Arc<ListenerAttrs>, initial_capacity: usize) -> Self {
        let now = Instant::now();
        let state = if listener.shoutcast_compat {
            ClientState::ShoutcastIntro
        } else {
            ClientState::RequestRead
        };
        Self {
            connection,
            state,
            shared_data: Some(Refbuf::with_capacity(initial_capacity)),
            refbuf: None,
            flags: ClientFlags { active: true, ..ClientFlags::default() },
            listener,
            schedule_at: now,
            created_at: now,
        }
    }

    #[must_use]
    pub fn is_past_deadline(&self, now: Instant) -> bool {
        self.connection.deadline_passed(now)
    }

    pub fn reschedule_in(&mut self, delay: std::time::Duration) {
        self.schedule_at = Instant::now() + delay;
    }

    /// Write `self.refbuf` to completion, looping over partial writes, then
    /// clear it. A no-op if nothing is queued.
    pub async fn flush_refbuf(&mut self) -> Result<(), CoreError> {
        let Some(buf) = self.refbuf.take() else { return Ok(()) };
        let mut bufs = ConnectionBufs::new();
        bufs.push(buf.data.freeze());
        let total = bufs.len();

        let mut sent = 0;
        while sent < total {
            let n = self.connection.send(&mut bufs, sent).await?;
            if n == 0 {
                break;
            }
            sent += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn associated_buffer_chains_and_detaches() {
        let mut head = Refbuf::with_capacity(16);
        head.set_associated(Refbuf::from_bytes(BytesMut::from(&b"tail"[..])));

        let tail = head.take_associated().unwrap();
        assert_eq!(&tail.data[..], b"tail");
        assert!(head.associated.is_none());
    }
}
