//! Type-erased byte streams and the debug byte counter.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Any bidirectional byte stream the transports can run over.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Raw stream returned by a dial collaborator.
pub type BoxedIo = Box<dyn Io>;

/// Direction of an I/O operation reported to the byte counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Observational callback invoked with the size of every read and write.
pub type ByteCounter = Arc<dyn Fn(Direction, usize) + Send + Sync>;

/// Stream wrapper reporting transferred bytes to an optional [`ByteCounter`].
pub struct CountingStream<S> {
    inner: S,
    counter: Option<ByteCounter>,
}

impl<S> CountingStream<S> {
    pub fn new(inner: S, counter: Option<ByteCounter>) -> Self {
        Self { inner, counter }
    }

    fn record(&self, direction: Direction, n: usize) {
        if n == 0 {
            return;
        }
        if let Some(counter) = &self.counter {
            counter(direction, n);
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for CountingStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingStream")
            .field("inner", &self.inner)
            .field("counting", &self.counter.is_some())
            .finish()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CountingStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let n = buf.filled().len() - before;
            self.record(Direction::Read, n);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CountingStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.record(Direction::Write, *n);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
