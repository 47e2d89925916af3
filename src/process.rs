//! Process-level concerns: session detachment and the fallback command.

use std::fmt;
use std::io;
use std::process::Command;

/// Puts the process into a new session so that signals aimed at the invoking
/// terminal's process group do not reach it.
#[cfg(unix)]
pub fn detach_session() -> io::Result<()> {
    // SAFETY: setsid takes no arguments and only changes process attributes.
    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn detach_session() -> io::Result<()> {
    Ok(())
}

/// Command run in place of this process when no candidate wins in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackCommand {
    program: String,
    args: Vec<String>,
}

impl FallbackCommand {
    /// Builds the command from the words after `--`. `None` when there are none.
    pub fn from_args(words: Vec<String>) -> Option<Self> {
        let mut words = words.into_iter();
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The command with inherited stdio, resolved through `PATH`.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Replaces the current process with the fallback command.
    ///
    /// Only returns if the exec failed.
    #[cfg(unix)]
    pub fn exec(&self) -> io::Error {
        use std::os::unix::process::CommandExt;

        tracing::info!("Running: {}", self);
        self.command().exec()
    }

    #[cfg(not(unix))]
    pub fn exec(&self) -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "exec is only available on unix")
    }
}

impl fmt::Display for FallbackCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
