//! Buffered request body with an explicit lifecycle.
//!
//! A [`BodySink`] moves through exactly three phases:
//!
//! 1. [`SinkPhase::Writable`]: the caller fills it through a [`BodyWriter`].
//! 2. [`SinkPhase::Frozen`]: the adapter freezes it into a read-only byte
//!    source positioned at the start of the payload.
//! 3. [`SinkPhase::Released`]: the storage is reclaimed.
//!
//! Dropping a [`BodyWriter`] only ends a write session; it never touches the
//! storage. Phases cannot be skipped or revisited, and an illegal transition
//! is reported as a [`PhaseError`].

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::buf::Reader;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::AsyncWrite;

/// Lifecycle phase of a [`BodySink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SinkPhase {
    Writable,
    Frozen,
    Released,
}

impl SinkPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkPhase::Writable => "writable",
            SinkPhase::Frozen => "frozen",
            SinkPhase::Released => "released",
        }
    }
}

impl fmt::Display for SinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation was attempted in the wrong body-sink phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("body sink is {actual}, expected {expected}")]
pub struct PhaseError {
    pub expected: SinkPhase,
    pub actual: SinkPhase,
}

/// The buffered, write-then-read byte store holding an outbound payload.
///
/// # Example
///
/// ```
/// use soapwire_client::{BodySink, SinkPhase};
/// use std::io::Write;
///
/// let mut sink = BodySink::new();
/// {
///     let mut writer = sink.writer().unwrap();
///     writer.write_all(b"<req/>").unwrap();
/// } // the writer is gone, the bytes are not
///
/// let payload = sink.freeze().unwrap();
/// assert_eq!(&payload[..], b"<req/>");
///
/// sink.release().unwrap();
/// assert_eq!(sink.phase(), SinkPhase::Released);
/// ```
pub struct BodySink {
    phase: SinkPhase,
    buffer: BytesMut,
    frozen: Option<Bytes>,
    write_sessions: usize,
    releases: usize,
}

impl BodySink {
    /// Create an empty writable sink.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty writable sink with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            phase: SinkPhase::Writable,
            buffer: BytesMut::with_capacity(capacity),
            frozen: None,
            write_sessions: 0,
            releases: 0,
        }
    }

    /// The current phase.
    pub fn phase(&self) -> SinkPhase {
        self.phase
    }

    /// Number of payload bytes held (zero once released).
    pub fn len(&self) -> usize {
        match self.phase {
            SinkPhase::Writable => self.buffer.len(),
            SinkPhase::Frozen => self.frozen.as_ref().map_or(0, Bytes::len),
            SinkPhase::Released => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a write session onto the sink.
    ///
    /// Every writer appends to the same storage, so repeated calls during the
    /// writable phase continue the same payload.
    pub fn writer(&mut self) -> Result<BodyWriter<'_>, PhaseError> {
        self.expect(SinkPhase::Writable)?;
        Ok(BodyWriter { sink: self })
    }

    /// Transition writable -> frozen and return the payload.
    ///
    /// The returned [`Bytes`] starts at the first written byte and shares the
    /// storage with the sink; no copy is made.
    pub fn freeze(&mut self) -> Result<Bytes, PhaseError> {
        self.expect(SinkPhase::Writable)?;
        let payload = std::mem::take(&mut self.buffer).freeze();
        self.frozen = Some(payload.clone());
        self.phase = SinkPhase::Frozen;
        #[cfg(feature = "tracing")]
        tracing::trace!(len = payload.len(), "body sink frozen");
        Ok(payload)
    }

    /// The frozen payload.
    pub fn payload(&self) -> Result<&Bytes, PhaseError> {
        self.expect(SinkPhase::Frozen)?;
        match &self.frozen {
            Some(payload) => Ok(payload),
            None => Err(PhaseError {
                expected: SinkPhase::Frozen,
                actual: self.phase,
            }),
        }
    }

    /// A reader over the frozen payload, positioned at its start.
    pub fn reader(&self) -> Result<Reader<Bytes>, PhaseError> {
        self.payload().map(|payload| payload.clone().reader())
    }

    /// Transition frozen -> released and reclaim the storage.
    pub fn release(&mut self) -> Result<(), PhaseError> {
        self.expect(SinkPhase::Frozen)?;
        self.frozen = None;
        self.buffer = BytesMut::new();
        self.phase = SinkPhase::Released;
        self.releases += 1;
        #[cfg(feature = "tracing")]
        tracing::trace!("body sink released");
        Ok(())
    }

    fn expect(&self, expected: SinkPhase) -> Result<(), PhaseError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(PhaseError {
                expected,
                actual: self.phase,
            })
        }
    }

    fn end_write(&mut self) {
        self.write_sessions += 1;
        #[cfg(feature = "tracing")]
        tracing::trace!(
            sessions = self.write_sessions,
            len = self.buffer.len(),
            "body write session ended"
        );
    }

    #[cfg(test)]
    pub(crate) fn releases(&self) -> usize {
        self.releases
    }
}

impl Default for BodySink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BodySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodySink")
            .field("phase", &self.phase)
            .field("len", &self.len())
            .field("write_sessions", &self.write_sessions)
            .field("releases", &self.releases)
            .finish()
    }
}

/// Write handle onto a [`BodySink`] in its writable phase.
///
/// Dropping the writer ends the write session and leaves the written bytes in
/// place.
pub struct BodyWriter<'a> {
    sink: &'a mut BodySink,
}

impl BodyWriter<'_> {
    /// Append bytes to the payload.
    pub fn put_slice(&mut self, data: &[u8]) {
        self.sink.buffer.put_slice(data);
    }

    /// Bytes written so far, across all sessions.
    pub fn len(&self) -> usize {
        self.sink.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sink.buffer.is_empty()
    }
}

impl io::Write for BodyWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncWrite for BodyWriter<'_> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().put_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl fmt::Debug for BodyWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyWriter")
            .field("len", &self.sink.buffer.len())
            .finish()
    }
}

impl Drop for BodyWriter<'_> {
    fn drop(&mut self) {
        self.sink.end_write();
    }
}
