//! ssh-multipath - Reach one SSH server over whichever of several paths answers first.

use clap::Parser;
use ssh_multipath::{detach_session, run_proxy, Cli, ExitCode};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // stdout carries the SSH session, so diagnostics go to stderr only
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if !cli.no_setsid {
        if let Err(e) = detach_session() {
            tracing::warn!(error = %e, "failed to start a new session");
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to create tokio runtime");
            std::process::exit(ExitCode::Failure.into());
        }
    };

    let code = match runtime.block_on(run_proxy(&cli)) {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "ssh-multipath error");
            e.exit_code()
        }
    };

    // The stdin reader thread may still be blocked; do not wait for it.
    std::process::exit(code.into());
}
