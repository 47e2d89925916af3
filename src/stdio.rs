//! The local end of the session: our own stdin and stdout.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncWrite, Stdin, Stdout};

/// Local input, read by the forwarder and relayed to the winner.
pub fn local_input() -> Stdin {
    tokio::io::stdin()
}

/// Local output, fed with everything the winner sends.
///
/// Shutting it down flushes pending data and then closes file descriptor 1, so the
/// process on the other end of the pipe sees end of stream even though this
/// process keeps running until the other direction is done.
#[derive(Debug)]
pub struct LocalOutput {
    inner: Stdout,
    closed: bool,
}

impl LocalOutput {
    pub fn new() -> Self {
        Self {
            inner: tokio::io::stdout(),
            closed: false,
        }
    }
}

impl Default for LocalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncWrite for LocalOutput {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.closed {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.closed {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.closed {
            return Poll::Ready(Ok(()));
        }
        ready!(Pin::new(&mut self.inner).poll_flush(cx))?;
        self.closed = true;
        close_stdout()?;
        Poll::Ready(Ok(()))
    }
}

#[cfg(unix)]
fn close_stdout() -> io::Result<()> {
    // SAFETY: fd 1 is only ever written through `LocalOutput`, which refuses all
    // writes once closed.
    unsafe {
        // Stdout may be a socket shared with another process; a plain close
        // would not end the stream for it.
        if libc::shutdown(libc::STDOUT_FILENO, libc::SHUT_WR) != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOTSOCK) {
                tracing::debug!(error = %err, "shutdown of stdout failed");
            }
        }
        if libc::close(libc::STDOUT_FILENO) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn close_stdout() -> io::Result<()> {
    Ok(())
}
