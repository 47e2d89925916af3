//! Non-blocking outbound connection attempts.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::endpoint::Candidate;
use crate::sniffer::Banner;

/// Stable identity of a launched attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl AttemptId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// A connection that has been started but not yet accepted or rejected.
#[derive(Debug)]
pub struct PendingAttempt {
    id: AttemptId,
    candidate: Candidate,
    stream: TcpStream,
    launched_at: Instant,
    banner: Banner,
}

impl PendingAttempt {
    pub fn id(&self) -> AttemptId {
        self.id
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn launched_at(&self) -> Instant {
        self.launched_at
    }

    /// Signature bytes received so far.
    pub fn banner(&self) -> &[u8] {
        self.banner.as_bytes()
    }

    pub(crate) fn parts_mut(&mut self) -> (&TcpStream, &mut Banner) {
        (&self.stream, &mut self.banner)
    }

    pub(crate) fn into_parts(self) -> (Candidate, TcpStream, Banner) {
        (self.candidate, self.stream, self.banner)
    }
}

/// Starts a connection to `candidate` without waiting for it to complete.
///
/// Returns `None` when no socket could be set up; the reason is logged. A returned
/// attempt says nothing about reachability yet.
pub fn connect(id: AttemptId, candidate: Candidate) -> Option<PendingAttempt> {
    match start_connect(&candidate) {
        Ok(stream) => {
            tracing::debug!(candidate = %candidate, ?id, "connection attempt started");
            Some(PendingAttempt {
                id,
                candidate,
                stream,
                launched_at: Instant::now(),
                banner: Banner::default(),
            })
        }
        Err(e) => {
            tracing::warn!(candidate = %candidate, error = %e, "cannot start connection");
            None
        }
    }
}

fn start_connect(candidate: &Candidate) -> io::Result<TcpStream> {
    let addr = candidate.addr();
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    #[cfg(unix)]
    socket.set_cloexec(true)?;

    match socket.connect(&SockAddr::from(addr)) {
        Ok(()) => {}
        Err(e) if is_in_progress(&e) => {}
        Err(e) => return Err(e),
    }

    TcpStream::from_std(std::net::TcpStream::from(socket))
}

fn is_in_progress(e: &io::Error) -> bool {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    e.kind() == io::ErrorKind::WouldBlock
}
