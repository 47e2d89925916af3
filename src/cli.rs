//! CLI definitions for ssh-multipath.

use clap::{builder::PossibleValuesParser, Parser};
use std::time::Duration;

/// Port used when a host is given without one.
pub const DEFAULT_PORT: u16 = 22;

/// Default delay between launching successive candidates.
pub const DEFAULT_STAGGER: Duration = Duration::from_secs(1);

/// Default time to keep waiting after the last launch before running the fallback command.
pub const DEFAULT_FALLBACK_WAIT: Duration = Duration::from_secs(3);

/// Parse a duration from a human-readable string.
fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Reach one SSH server through several alternative paths (ProxyCommand helper).
///
/// Connects to each HOST[:PORT] in turn, one second apart, and relays stdin/stdout
/// over the first one that answers with an SSH banner. Anything after `--` is a
/// fallback command executed when no host answers in time.
#[derive(Debug, Parser)]
#[command(name = "ssh-multipath")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level (debug|info|warn|error)
    #[arg(long, default_value = "info", value_parser = PossibleValuesParser::new(["debug", "info", "warn", "error"]))]
    pub log_level: String,

    /// Delay before launching the next candidate while the previous one is pending
    #[arg(long, value_parser = parse_duration, default_value = "1s")]
    pub stagger: Duration,

    /// Time to wait after the last launch before running the fallback command
    #[arg(long, value_parser = parse_duration, default_value = "3s")]
    pub fallback_wait: Duration,

    /// Do not detach into a new session
    #[arg(long, default_value_t = false)]
    pub no_setsid: bool,

    /// Candidates to try, in order (host or host:port, default port 22)
    #[arg(required = true, value_name = "HOST[:PORT]")]
    pub hosts: Vec<String>,

    /// Fallback command and its arguments
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}
