//! The connection race.
//!
//! Candidates are launched one at a time. While the most recent attempt is still
//! pending the race waits up to the stagger delay before launching the next one;
//! if that attempt already failed, the next one goes out immediately. Every pending
//! attempt is polled the whole time, and the first one to send the SSH signature
//! wins. All others are closed at that moment.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::connector::{self, AttemptId, PendingAttempt};
use crate::endpoint::{Candidate, Resolve, Target};
use crate::error::{Error, Result};
use crate::poller::{self, Readiness};
use crate::sniffer::{self, Banner, Verdict};

/// Deadline used when the last launched attempt is already gone.
const IMMEDIATE: Duration = Duration::from_micros(1);

/// Where the race stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceState {
    /// Some candidates have not been launched yet.
    Staggering,
    /// Every candidate has been launched; waiting for one to answer.
    Waiting,
    /// A winner was handed out.
    Won,
    /// Nothing pending and nothing left to launch.
    Exhausted,
}

/// How a call to [`Race::run`] ended.
#[derive(Debug)]
pub enum RaceOutcome {
    Won(Winner),
    /// The overall deadline passed with attempts still pending.
    TimedOut,
    Exhausted,
}

/// The one candidate that answered with an SSH banner.
#[derive(Debug)]
pub struct Winner {
    candidate: Candidate,
    stream: TcpStream,
    banner: Banner,
}

impl Winner {
    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    /// Bytes already read from the stream; they belong at the start of the session.
    pub fn banner(&self) -> &[u8] {
        self.banner.as_bytes()
    }

    pub fn into_parts(self) -> (Candidate, TcpStream, Banner) {
        (self.candidate, self.stream, self.banner)
    }
}

/// Races a list of targets against each other.
#[derive(Debug)]
pub struct Race<R> {
    targets: VecDeque<Target>,
    resolver: R,
    stagger: Duration,
    pending: Vec<PendingAttempt>,
    last_launch: Option<(AttemptId, Instant)>,
    next_id: u64,
    state: RaceState,
}

impl<R: Resolve> Race<R> {
    pub fn new(targets: Vec<Target>, resolver: R, stagger: Duration) -> Self {
        let state = if targets.is_empty() {
            RaceState::Waiting
        } else {
            RaceState::Staggering
        };

        Self {
            targets: targets.into(),
            resolver,
            stagger,
            pending: Vec::new(),
            last_launch: None,
            next_id: 0,
            state,
        }
    }

    pub fn state(&self) -> RaceState {
        self.state
    }

    /// Attempts that are connected or connecting and not yet judged.
    pub fn pending(&self) -> &[PendingAttempt] {
        &self.pending
    }

    /// Runs the race until a winner emerges, every attempt has failed, or
    /// `final_wait` has passed since the last launch.
    ///
    /// `final_wait` only applies once every candidate has been launched; `None`
    /// waits for as long as anything is pending. A timed out race keeps its
    /// attempts and can be run again.
    pub async fn run(&mut self, final_wait: Option<Duration>) -> Result<RaceOutcome> {
        loop {
            match self.state {
                RaceState::Won => return Err(Error::RaceConcluded),
                RaceState::Exhausted => return Ok(RaceOutcome::Exhausted),
                RaceState::Staggering => {
                    let Some(deadline) = self.stagger_deadline() else {
                        self.launch_next().await;
                        continue;
                    };

                    match poller::wait_readable(&self.pending, Some(deadline)).await? {
                        Readiness::Elapsed => self.launch_next().await,
                        Readiness::Ready(ready) => {
                            if let Some(winner) = self.judge(ready) {
                                return Ok(RaceOutcome::Won(winner));
                            }
                        }
                    }
                }
                RaceState::Waiting => {
                    if self.pending.is_empty() {
                        tracing::debug!("no candidates left");
                        self.state = RaceState::Exhausted;
                        continue;
                    }

                    let deadline = final_wait.map(|wait| self.last_launch_time() + wait);
                    match poller::wait_readable(&self.pending, deadline).await? {
                        Readiness::Elapsed => return Ok(RaceOutcome::TimedOut),
                        Readiness::Ready(ready) => {
                            if let Some(winner) = self.judge(ready) {
                                return Ok(RaceOutcome::Won(winner));
                            }
                        }
                    }
                }
            }
        }
    }

    /// When to give up waiting and launch the next candidate; `None` means now.
    fn stagger_deadline(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        let (last_id, launched_at) = self.last_launch?;

        let still_pending = self.pending.iter().any(|attempt| attempt.id() == last_id);
        if still_pending {
            Some(launched_at + self.stagger)
        } else {
            Some(launched_at + IMMEDIATE)
        }
    }

    fn last_launch_time(&self) -> Instant {
        self.last_launch
            .map(|(_, launched_at)| launched_at)
            .unwrap_or_else(Instant::now)
    }

    async fn launch_next(&mut self) {
        let Some(target) = self.targets.pop_front() else {
            self.state = RaceState::Waiting;
            return;
        };

        if let Some(attempt) = self.start(&target).await {
            self.last_launch = Some((attempt.id(), attempt.launched_at()));
            self.pending.push(attempt);
        }

        if self.targets.is_empty() {
            self.state = RaceState::Waiting;
        }
    }

    async fn start(&mut self, target: &Target) -> Option<PendingAttempt> {
        let candidate = match target.resolve(&self.resolver).await {
            Ok(candidate) => candidate,
            Err(e) => {
                tracing::warn!(host = target.name(), error = %e, "skipping candidate");
                return None;
            }
        };

        let id = AttemptId::new(self.next_id);
        self.next_id += 1;
        tracing::debug!(candidate = %candidate, "trying");
        connector::connect(id, candidate)
    }

    /// Sniffs every ready attempt, discarding failures. Stops at the first winner.
    fn judge(&mut self, ready: Vec<AttemptId>) -> Option<Winner> {
        for id in ready {
            let Some(attempt) = self.pending.iter_mut().find(|attempt| attempt.id() == id) else {
                continue;
            };

            let (stream, banner) = attempt.parts_mut();
            match sniffer::sniff(stream, banner) {
                Verdict::Pending => {}
                Verdict::Reject(reason) => {
                    if let Some(attempt) = self.remove(id) {
                        tracing::info!(candidate = %attempt.candidate(), %reason, "discarding candidate");
                    }
                }
                Verdict::Accept => return self.promote(id),
            }
        }
        None
    }

    /// Makes `id` the winner and closes everything else.
    fn promote(&mut self, id: AttemptId) -> Option<Winner> {
        let attempt = self.remove(id)?;
        for loser in self.pending.drain(..) {
            tracing::debug!(candidate = %loser.candidate(), "closing losing attempt");
        }
        self.targets.clear();
        self.state = RaceState::Won;

        let (candidate, stream, banner) = attempt.into_parts();
        tracing::info!("Using: {} ({})", candidate.name(), candidate.addr());
        Some(Winner {
            candidate,
            stream,
            banner,
        })
    }

    fn remove(&mut self, id: AttemptId) -> Option<PendingAttempt> {
        let index = self.pending.iter().position(|attempt| attempt.id() == id)?;
        Some(self.pending.remove(index))
    }
}
