//! Duplex forwarding between local stdio and the winning connection.
//!
//! Each direction owns a fixed-size buffer. A direction reads only while its
//! source is open and the buffer has room, writes only while the buffer holds
//! data, and shuts down its destination once the source is finished and the
//! buffer has drained. Forwarding ends when both directions have shut down.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Result;
use crate::poller::{self, Readiness};

/// Per-direction buffer size.
pub const BUFFER_CAPACITY: usize = 8 * 1024;

/// Bytes written to each destination over the life of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transferred {
    /// Local input to the remote connection.
    pub local_to_remote: u64,
    /// Remote connection to local output, including the sniffed banner.
    pub remote_to_local: u64,
}

/// One direction of the relay.
#[derive(Debug)]
struct Channel {
    label: &'static str,
    buf: Box<[u8]>,
    /// Buffered bytes live in `buf[start..end]`.
    start: usize,
    end: usize,
    source_active: bool,
    closed: bool,
    written: u64,
}

impl Channel {
    fn new(label: &'static str, capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be non-zero");
        Self {
            label,
            buf: vec![0; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
            source_active: true,
            closed: false,
            written: 0,
        }
    }

    fn len(&self) -> usize {
        self.end - self.start
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn spare(&self) -> usize {
        self.buf.len() - self.len()
    }

    fn preload(&mut self, data: &[u8]) {
        assert!(data.len() <= self.spare(), "preloaded data exceeds buffer capacity");
        self.compact();
        self.buf[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
    }

    /// Moves buffered bytes to the front so all spare room is contiguous.
    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }

    fn consume(&mut self, n: usize) {
        self.start += n;
        self.written += n as u64;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// The destination is gone: stop reading and forget what was buffered.
    fn abandon(&mut self, error: io::Error) {
        tracing::debug!(
            direction = self.label,
            error = %error,
            dropped = self.len(),
            "write failed, closing direction"
        );
        self.source_active = false;
        self.start = 0;
        self.end = 0;
    }

    /// Moves as many bytes as possible from `reader` to `writer`.
    ///
    /// Returns `Ready` once the source is finished, the buffer is empty and the
    /// destination has been shut down.
    fn poll_transfer<R, W>(&mut self, cx: &mut Context<'_>, reader: &mut R, writer: &mut W) -> Poll<()>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        loop {
            let mut progressed = false;

            if !self.is_empty() {
                match Pin::new(&mut *writer).poll_write(cx, &self.buf[self.start..self.end]) {
                    Poll::Ready(Ok(0)) => {
                        self.abandon(io::ErrorKind::WriteZero.into());
                        progressed = true;
                    }
                    Poll::Ready(Ok(n)) => {
                        self.consume(n);
                        progressed = true;
                    }
                    Poll::Ready(Err(e)) => {
                        self.abandon(e);
                        progressed = true;
                    }
                    Poll::Pending => {}
                }
            }

            if self.source_active && self.spare() > 0 {
                self.compact();
                let mut read_buf = ReadBuf::new(&mut self.buf[self.end..]);
                match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            tracing::debug!(direction = self.label, "source reached end of stream");
                            self.source_active = false;
                        } else {
                            self.end += n;
                        }
                        progressed = true;
                    }
                    Poll::Ready(Err(e)) => {
                        tracing::debug!(direction = self.label, error = %e, "source read failed");
                        self.source_active = false;
                        progressed = true;
                    }
                    Poll::Pending => {}
                }
            }

            if !self.source_active && self.is_empty() {
                if !self.closed {
                    match Pin::new(&mut *writer).poll_shutdown(cx) {
                        Poll::Ready(res) => {
                            if let Err(e) = res {
                                tracing::debug!(direction = self.label, error = %e, "shutdown failed");
                            }
                            tracing::debug!(direction = self.label, written = self.written, "direction closed");
                            self.closed = true;
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }
                return Poll::Ready(());
            }

            if !progressed {
                return Poll::Pending;
            }
        }
    }
}

/// Relays local input to the remote writer and the remote reader to local output.
#[derive(Debug)]
pub struct Forwarder<I, O, R, W> {
    local_in: I,
    local_out: O,
    remote_rd: R,
    remote_wr: W,
    outbound: Channel,
    inbound: Channel,
}

impl<I, O, R, W> Forwarder<I, O, R, W>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(local_in: I, local_out: O, remote_rd: R, remote_wr: W) -> Self {
        Self::with_capacity(local_in, local_out, remote_rd, remote_wr, BUFFER_CAPACITY)
    }

    pub fn with_capacity(local_in: I, local_out: O, remote_rd: R, remote_wr: W, capacity: usize) -> Self {
        Self {
            local_in,
            local_out,
            remote_rd,
            remote_wr,
            outbound: Channel::new("local->remote", capacity),
            inbound: Channel::new("remote->local", capacity),
        }
    }

    /// Queues bytes already taken from the remote so they reach local output first.
    pub fn preload(mut self, data: &[u8]) -> Self {
        self.inbound.preload(data);
        self
    }

    /// Advances both directions; ready once both have shut down.
    pub fn poll_forward(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<Transferred>> {
        let outbound = self
            .outbound
            .poll_transfer(cx, &mut self.local_in, &mut self.remote_wr);
        let inbound = self
            .inbound
            .poll_transfer(cx, &mut self.remote_rd, &mut self.local_out);

        if outbound.is_ready() && inbound.is_ready() {
            Poll::Ready(Ok(Transferred {
                local_to_remote: self.outbound.written,
                remote_to_local: self.inbound.written,
            }))
        } else {
            Poll::Pending
        }
    }

    /// Forwards until both directions are drained and closed.
    pub async fn run(mut self) -> Result<Transferred> {
        match poller::wait(None, |cx| self.poll_forward(cx)).await? {
            Readiness::Ready(transferred) => Ok(transferred),
            Readiness::Elapsed => unreachable!("forwarding wait has no deadline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Never runs dry; counts how many bytes it handed out.
    struct Endless {
        served: Arc<AtomicUsize>,
    }

    impl AsyncRead for Endless {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            let n = buf.remaining();
            buf.put_slice(&vec![b'x'; n]);
            self.served.fetch_add(n, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    /// Accepts `budget` bytes, then never becomes writable again.
    struct Stalled {
        budget: usize,
    }

    impl AsyncWrite for Stalled {
        fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Pending;
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Fails every write, remembers whether it was shut down.
    struct Broken {
        shut_down: Arc<AtomicBool>,
    }

    impl AsyncWrite for Broken {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.shut_down.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[tokio::test]
    async fn test_relays_both_directions_with_banner_first() {
        let (mut user_in, local_in) = tokio::io::duplex(64);
        let (local_out, mut user_out) = tokio::io::duplex(64);
        let (remote, mut server) = tokio::io::duplex(64);
        let (remote_rd, remote_wr) = tokio::io::split(remote);

        let forwarder = Forwarder::new(local_in, local_out, remote_rd, remote_wr).preload(b"SSH");
        let handle = tokio::spawn(forwarder.run());

        server.write_all(b"-2.0-test\r\n").await.unwrap();
        server.shutdown().await.unwrap();
        user_in.write_all(b"hello").await.unwrap();
        user_in.shutdown().await.unwrap();

        let mut received = Vec::new();
        user_out.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"SSH-2.0-test\r\n");

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert_eq!(sent, b"hello");

        let transferred = handle.await.unwrap().unwrap();
        assert_eq!(
            transferred,
            Transferred {
                local_to_remote: 5,
                remote_to_local: 14,
            }
        );
    }

    #[tokio::test]
    async fn test_remote_eof_closes_local_output_only() {
        let (mut user_in, local_in) = tokio::io::duplex(64);
        let (local_out, mut user_out) = tokio::io::duplex(64);
        let (remote, mut server) = tokio::io::duplex(64);
        let (remote_rd, remote_wr) = tokio::io::split(remote);

        let handle = tokio::spawn(Forwarder::new(local_in, local_out, remote_rd, remote_wr).run());

        server.write_all(b"bye").await.unwrap();
        server.shutdown().await.unwrap();

        let mut received = Vec::new();
        user_out.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye");
        assert!(!handle.is_finished());

        // The other direction keeps working after local output was closed.
        user_in.write_all(b"still here").await.unwrap();
        let mut buf = [0u8; 10];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"still here");

        drop(user_in);
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let transferred = handle.await.unwrap().unwrap();
        assert_eq!(transferred.local_to_remote, 10);
        assert_eq!(transferred.remote_to_local, 3);
    }

    #[tokio::test]
    async fn test_fragmented_sources_arrive_intact() {
        let upstream = pattern(100_000, 7);
        let downstream = pattern(70_001, 3);

        // Tiny pipes force many short reads and writes.
        let (mut user_in, local_in) = tokio::io::duplex(3);
        let (local_out, mut user_out) = tokio::io::duplex(5);
        let (remote, server) = tokio::io::duplex(7);
        let (remote_rd, remote_wr) = tokio::io::split(remote);

        let handle = tokio::spawn(Forwarder::new(local_in, local_out, remote_rd, remote_wr).run());

        let up = upstream.clone();
        let writer = tokio::spawn(async move {
            for chunk in up.chunks(13) {
                user_in.write_all(chunk).await.unwrap();
            }
            user_in.shutdown().await.unwrap();
        });
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            user_out.read_to_end(&mut received).await.unwrap();
            received
        });

        let (mut server_rd, mut server_wr) = tokio::io::split(server);
        let down = downstream.clone();
        let server_writer = tokio::spawn(async move {
            for chunk in down.chunks(11) {
                server_wr.write_all(chunk).await.unwrap();
            }
            server_wr.shutdown().await.unwrap();
        });
        let mut sent = Vec::new();
        server_rd.read_to_end(&mut sent).await.unwrap();

        writer.await.unwrap();
        server_writer.await.unwrap();
        let received = reader.await.unwrap();

        assert_eq!(sent, upstream);
        assert_eq!(received, downstream);

        let transferred = handle.await.unwrap().unwrap();
        assert_eq!(transferred.local_to_remote, upstream.len() as u64);
        assert_eq!(transferred.remote_to_local, downstream.len() as u64);
    }

    #[tokio::test]
    async fn test_full_buffer_stops_reading() {
        let served = Arc::new(AtomicUsize::new(0));
        let forwarder = Forwarder::new(
            Endless {
                served: Arc::clone(&served),
            },
            tokio::io::sink(),
            tokio::io::empty(),
            Stalled { budget: 0 },
        );

        let res = tokio::time::timeout(Duration::from_millis(100), forwarder.run()).await;
        assert!(res.is_err());
        assert_eq!(served.load(Ordering::SeqCst), BUFFER_CAPACITY);
    }

    #[tokio::test]
    async fn test_one_written_byte_frees_one_byte_of_room() {
        let served = Arc::new(AtomicUsize::new(0));
        let forwarder = Forwarder::new(
            Endless {
                served: Arc::clone(&served),
            },
            tokio::io::sink(),
            tokio::io::empty(),
            Stalled { budget: 1 },
        );

        let res = tokio::time::timeout(Duration::from_millis(100), forwarder.run()).await;
        assert!(res.is_err());
        assert_eq!(served.load(Ordering::SeqCst), BUFFER_CAPACITY + 1);
    }

    #[tokio::test]
    async fn test_write_failure_closes_that_direction_only() {
        let shut_down = Arc::new(AtomicBool::new(false));
        let mut output = Vec::new();

        let forwarder = Forwarder::new(
            &b"typed by the user"[..],
            &mut output,
            &b"SSH-2.0-test\r\n"[..],
            Broken {
                shut_down: Arc::clone(&shut_down),
            },
        );
        let transferred = forwarder.run().await.unwrap();

        assert!(shut_down.load(Ordering::SeqCst));
        assert_eq!(transferred.local_to_remote, 0);
        assert_eq!(transferred.remote_to_local, 14);
        assert_eq!(output, b"SSH-2.0-test\r\n");
    }

    #[test]
    fn test_channel_compacts_before_reading() {
        let mut channel = Channel::new("test", 8);
        channel.preload(b"abcdef");
        channel.consume(4);
        assert_eq!(channel.len(), 2);
        assert_eq!(channel.spare(), 6);

        channel.preload(b"ghijkl");
        assert_eq!(channel.start, 0);
        assert_eq!(&channel.buf[..channel.end], b"efghijkl");
        assert_eq!(channel.spare(), 0);
    }
}
