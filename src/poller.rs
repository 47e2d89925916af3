//! The readiness poller.
//!
//! Every suspension in the program goes through [`wait`]: the race waits for any
//! pending attempt to become readable (bounded by the stagger or fallback
//! deadline), and the forwarder waits for either direction to make progress (no
//! deadline). Both are expressed as a poll function over the tokio reactor.

use std::future::poll_fn;
use std::io;
use std::task::{Context, Poll};
use tokio::time::Instant;

use crate::connector::{AttemptId, PendingAttempt};
use crate::error::{Error, Result};

/// Result of a bounded wait.
#[derive(Debug, PartialEq, Eq)]
pub enum Readiness<T> {
    /// The poll function produced a value.
    Ready(T),
    /// The deadline passed first.
    Elapsed,
}

/// Drives `poll` until it yields or the absolute `deadline` passes.
///
/// An error from `poll` means the reactor can no longer report readiness and is
/// returned as [`Error::Poll`].
pub async fn wait<T, F>(deadline: Option<Instant>, poll: F) -> Result<Readiness<T>>
where
    F: FnMut(&mut Context<'_>) -> Poll<io::Result<T>>,
{
    let ready = poll_fn(poll);
    let res = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, ready).await {
            Ok(res) => res,
            Err(_) => return Ok(Readiness::Elapsed),
        },
        None => ready.await,
    };

    res.map(Readiness::Ready).map_err(Error::Poll)
}

/// Read interest over every pending attempt.
///
/// Connect completion, incoming data, EOF and socket errors all show up as read
/// readiness. Yields the ids of all attempts that are ready right now.
pub fn poll_readable(
    attempts: &[PendingAttempt],
    cx: &mut Context<'_>,
) -> Poll<io::Result<Vec<AttemptId>>> {
    let mut ready = Vec::new();
    for attempt in attempts {
        match attempt.stream().poll_read_ready(cx) {
            Poll::Ready(Ok(())) => ready.push(attempt.id()),
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => {}
        }
    }

    if ready.is_empty() {
        Poll::Pending
    } else {
        Poll::Ready(Ok(ready))
    }
}

/// Waits until at least one attempt is readable or `deadline` passes.
///
/// With no attempts there is nothing that could become ready, so this reports
/// [`Readiness::Elapsed`] at once.
pub async fn wait_readable(
    attempts: &[PendingAttempt],
    deadline: Option<Instant>,
) -> Result<Readiness<Vec<AttemptId>>> {
    if attempts.is_empty() {
        return Ok(Readiness::Elapsed);
    }
    wait(deadline, |cx| poll_readable(attempts, cx)).await
}
