//! Scatter-gather send buffer and chunked-transfer framing helpers.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::invariant;

/// Chunks above this size are almost certainly a length computed from a
/// corrupt or malicious value, not a real chunk a source would send.
pub const MAX_CHUNK_SIZE: usize = 1 << 24;

/// A queue of owned buffers to be written out with a single vectored-write
/// syscall where possible, with resumable partial-send support.
///
/// `send_via` never holds borrowed slices across an `.await`: each call
/// locates the segment and in-segment byte offset that `skip` lands on,
/// builds the `IoSlice` array fresh, issues one write, and returns how many
/// bytes of *this* call were accepted. The caller accumulates `skip` across
/// calls until it reaches `self.len()`.
#[derive(Default)]
pub struct ConnectionBufs {
    segments: Vec<Bytes>,
}

impl ConnectionBufs {
    #[must_use]
    pub fn new() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn push(&mut self, data: impl Into<Bytes>) {
        let data = data.into();
        if !data.is_empty() {
            self.segments.push(data);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Issue one vectored write of the data starting at byte offset `skip`.
    /// Returns the number of bytes the underlying transport accepted.
    pub async fn send_via<W>(&self, writer: &mut W, skip: usize) -> std::io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let total = self.len();
        invariant!(skip <= total, "send skip {} exceeds buffer length {}", skip, total);
        if skip == total {
            return Ok(0);
        }

        let mut remaining_skip = skip;
        let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            if remaining_skip >= seg.len() {
                remaining_skip -= seg.len();
                continue;
            }
            slices.push(IoSlice::new(&seg[remaining_skip..]));
            remaining_skip = 0;
        }

        writer.write_vectored(&slices).await
    }
}

/// Render a chunk-size header line: `"<hex-size>\r\n"`.
#[must_use]
pub fn chunk_header(size: usize) -> Bytes {
    invariant!(size <= MAX_CHUNK_SIZE, "chunk size {} exceeds sanity ceiling", size);
    Bytes::from(format!("{size:x}\r\n"))
}

/// Render the CRLF that terminates a chunk's data.
#[must_use]
pub fn chunk_footer() -> Bytes {
    Bytes::from_static(b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_via_writes_everything_in_one_call() {
        let mut bufs = ConnectionBufs::new();
        bufs.push(Bytes::from_static(b"hello "));
        bufs.push(Bytes::from_static(b"world"));
        assert_eq!(bufs.len(), 11);

        let mut out = Vec::new();
        let n = bufs.send_via(&mut out, 0).await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn send_via_resumes_mid_segment() {
        let mut bufs = ConnectionBufs::new();
        bufs.push(Bytes::from_static(b"hello "));
        bufs.push(Bytes::from_static(b"world"));

        let mut out = Vec::new();
        let n = bufs.send_via(&mut out, 8).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(out, b"rld");
    }

    #[test]
    fn chunk_header_formats_hex_size() {
        assert_eq!(&chunk_header(255)[..], b"ff\r\n");
    }

    #[test]
    #[should_panic(expected = "invariant violated")]
    fn chunk_header_rejects_oversize() {
        let _ = chunk_header(MAX_CHUNK_SIZE + 1);
    }
}
