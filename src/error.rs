//! Error types for ssh-multipath.

use thiserror::Error;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Session forwarded and closed cleanly
    Success = 0,
    /// No candidate won and no fallback command could take over
    Failure = 1,
    /// The readiness poller failed
    PollFailed = 2,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Main error type for ssh-multipath.
#[derive(Debug, Error)]
pub enum Error {
    #[error("all candidates failed")]
    Exhausted,

    #[error("polling failed: {0}")]
    Poll(#[source] std::io::Error),

    #[error("race already produced a winner")]
    RaceConcluded,

    #[error("failed to resolve '{host}': {reason}")]
    Resolve { host: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::Poll(_) => ExitCode::PollFailed,
            Error::Exhausted
            | Error::RaceConcluded
            | Error::Resolve { .. }
            | Error::Io(_)
            | Error::Config(_) => ExitCode::Failure,
        }
    }
}

/// Result type alias for ssh-multipath operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_failure_has_its_own_exit_code() {
        let err = Error::Poll(std::io::Error::other("epoll_wait"));
        assert_eq!(err.exit_code(), ExitCode::PollFailed);
        assert_eq!(i32::from(err.exit_code()), 2);
    }

    #[test]
    fn exhausted_is_a_plain_failure() {
        assert_eq!(Error::Exhausted.exit_code(), ExitCode::Failure);
        assert_eq!(i32::from(ExitCode::Failure), 1);
    }

    #[test]
    fn resolve_display_names_the_host() {
        let err = Error::Resolve {
            host: "nowhere.invalid".to_string(),
            reason: "no such host".to_string(),
        };
        assert!(err.to_string().contains("nowhere.invalid"));
    }
}
