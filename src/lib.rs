//! ssh-multipath - Reach one SSH server over whichever of several paths answers first.
//!
//! Intended as an SSH `ProxyCommand`: candidates are connected to in a staggered
//! race, the first one that sends an SSH banner wins, and stdin/stdout are relayed
//! over it. If nothing answers in time a fallback command takes over the process.

pub mod cli;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod forward;
pub mod poller;
pub mod process;
pub mod proxy;
pub mod race;
pub mod sniffer;
pub mod stdio;

pub use cli::{Cli, DEFAULT_FALLBACK_WAIT, DEFAULT_PORT, DEFAULT_STAGGER};
pub use connector::{connect, AttemptId, PendingAttempt};
pub use endpoint::{Candidate, DnsResolver, Resolve, Target};
pub use error::{Error, ExitCode, Result};
pub use forward::{Forwarder, Transferred, BUFFER_CAPACITY};
pub use poller::Readiness;
pub use process::{detach_session, FallbackCommand};
pub use proxy::{forward, run_proxy, select_winner};
pub use race::{Race, RaceOutcome, RaceState, Winner};
pub use sniffer::{Banner, RejectReason, Verdict, SIGNATURE};
pub use stdio::LocalOutput;
