//! SSH banner detection.
//!
//! A candidate is only committed to once the first three bytes it sends are
//! exactly `SSH`. Anything else, or the connection ending first, rejects it.

use std::fmt;
use std::io;
use tokio::net::TcpStream;

/// The prefix every SSH server banner starts with.
pub const SIGNATURE: &[u8; 3] = b"SSH";

/// Outcome of inspecting a candidate's first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The full signature arrived.
    Accept,
    /// Everything so far matches but the signature is incomplete.
    Pending,
    /// The candidate cannot be an SSH server.
    Reject(RejectReason),
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Bytes diverged from the signature.
    Mismatch,
    /// The peer closed before the signature was complete.
    Closed,
    /// Connecting or reading failed.
    Io(io::ErrorKind),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Mismatch => f.write_str("not an SSH server"),
            RejectReason::Closed => f.write_str("connection closed"),
            RejectReason::Io(kind) => write!(f, "{}", io::Error::from(*kind)),
        }
    }
}

/// Judges a prefix of a candidate's output.
pub fn judge(received: &[u8]) -> Verdict {
    if !SIGNATURE.starts_with(received) {
        Verdict::Reject(RejectReason::Mismatch)
    } else if received.len() == SIGNATURE.len() {
        Verdict::Accept
    } else {
        Verdict::Pending
    }
}

/// The banner bytes received from one candidate so far.
#[derive(Debug, Clone, Default)]
pub struct Banner {
    buf: [u8; SIGNATURE.len()],
    filled: usize,
}

impl Banner {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Folds the result of one read into the banner and judges it.
    pub fn record(&mut self, read: io::Result<usize>) -> Verdict {
        match read {
            Ok(0) => Verdict::Reject(RejectReason::Closed),
            Ok(n) => {
                self.filled += n;
                judge(self.as_bytes())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Verdict::Pending,
            Err(e) => Verdict::Reject(RejectReason::Io(e.kind())),
        }
    }
}

/// Performs one non-blocking read of the missing banner bytes from `stream`.
///
/// Reads at most what is needed to complete the signature, so nothing past the
/// banner is consumed.
pub fn sniff(stream: &TcpStream, banner: &mut Banner) -> Verdict {
    let read = stream.try_read(banner.unfilled_mut());
    banner.record(read)
}
