//! Two unidirectional pipes presented as one full-duplex stream

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{ChildStdin, ChildStdout};

/// Connection to a helper process over its stdin/stdout.
pub type StdioConn = DuplexPipe<ChildStdout, ChildStdin>;

/// Address stub reported for either end of a pipe connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeAddr {
    pid: Option<u32>,
}

impl PipeAddr {
    /// Process id of the helper on the other end, if known
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl fmt::Display for PipeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "pipe:{}", pid),
            None => write!(f, "pipe"),
        }
    }
}

/// Full-duplex byte stream built from a read half and a write half
///
/// Reads return what the peer wrote to its output pipe, in order; writes
/// are delivered verbatim to the peer's input pipe. The pid is carried for
/// diagnostics only, the connection does not own the process.
pub struct DuplexPipe<R, W> {
    reader: Option<R>,
    writer: Option<W>,
    pid: Option<u32>,
}

impl<R, W> DuplexPipe<R, W> {
    /// Join a read half and a write half into one connection
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
            pid: None,
        }
    }

    /// Attach the peer's process id for diagnostics
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Process id of the peer, if known
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether both halves have been closed
    pub fn is_closed(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }

    /// Close both pipe ends.
    ///
    /// Closing the write end signals EOF to the peer. A second call returns
    /// an error that callers can ignore at shutdown.
    pub fn close(&mut self) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "pipe connection already closed",
            ));
        }
        self.writer.take();
        self.reader.take();
        tracing::debug!(pid = ?self.pid, "pipe connection closed");
        Ok(())
    }

    /// Pipes have no timeout primitive; accepted and ignored.
    pub fn set_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// Accepted and ignored.
    pub fn set_read_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// Accepted and ignored.
    pub fn set_write_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// Address stub for this end
    pub fn local_addr(&self) -> PipeAddr {
        PipeAddr { pid: None }
    }

    /// Address stub for the peer end
    pub fn peer_addr(&self) -> PipeAddr {
        PipeAddr { pid: self.pid }
    }
}

impl<R, W> fmt::Debug for DuplexPipe<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexPipe")
            .field("pid", &self.pid)
            .field("readable", &self.reader.is_some())
            .field("writable", &self.writer.is_some())
            .finish()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe connection closed")
}

impl<R: AsyncRead + Unpin, W: Unpin> AsyncRead for DuplexPipe<R, W> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().reader.as_mut() {
            Some(reader) => Pin::new(reader).poll_read(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }
}

impl<R: Unpin, W: AsyncWrite + Unpin> AsyncWrite for DuplexPipe<R, W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(writer) = this.writer.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match Pin::new(writer).poll_shutdown(cx) {
            Poll::Ready(result) => {
                // dropping the write end is what the peer sees as EOF
                this.writer = None;
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
