//! The ProxyCommand itself: race the candidates, then relay stdio over the winner.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::cli::Cli;
use crate::endpoint::{DnsResolver, Resolve, Target};
use crate::error::{Error, Result};
use crate::forward::{Forwarder, Transferred};
use crate::process::FallbackCommand;
use crate::race::{Race, RaceOutcome, Winner};
use crate::stdio::{self, LocalOutput};

/// Runs ssh-multipath as configured on the command line.
///
/// Returns once the session has ended in both directions. If the fallback command
/// is started this never returns, since the process image is replaced.
pub async fn run_proxy(args: &Cli) -> Result<()> {
    let targets = args
        .hosts
        .iter()
        .map(|host| Target::parse(host))
        .collect::<Result<Vec<_>>>()?;
    let fallback = FallbackCommand::from_args(args.command.clone());

    tracing::debug!(
        candidates = targets.len(),
        stagger = ?args.stagger,
        has_fallback = fallback.is_some(),
        "starting race"
    );

    let mut race = Race::new(targets, DnsResolver::new(), args.stagger);
    let winner = select_winner(&mut race, fallback, args.fallback_wait).await?;
    drop(race);

    let transferred = forward(winner, stdio::local_input(), LocalOutput::new()).await?;
    tracing::debug!(
        sent = transferred.local_to_remote,
        received = transferred.remote_to_local,
        "session finished"
    );
    Ok(())
}

/// Races until there is a winner, handing over to `fallback` if none shows up
/// within `fallback_wait` of the last launch.
///
/// A fallback that cannot be started is logged and the race continues with no
/// deadline. Without a fallback the race waits for as long as anything is pending.
pub async fn select_winner<R: Resolve>(
    race: &mut Race<R>,
    mut fallback: Option<FallbackCommand>,
    fallback_wait: Duration,
) -> Result<Winner> {
    loop {
        let final_wait = fallback.as_ref().map(|_| fallback_wait);
        let outcome = race.run(final_wait).await?;
        let exhausted = matches!(outcome, RaceOutcome::Exhausted);

        let idle = match outcome {
            RaceOutcome::Won(winner) => return Ok(winner),
            RaceOutcome::TimedOut => "no candidate answered in time",
            RaceOutcome::Exhausted => "all candidates failed",
        };

        match fallback.take() {
            Some(command) => {
                tracing::debug!(reason = idle, "switching to fallback command");
                let err = command.exec();
                tracing::error!(command = %command, error = %err, "failed to run fallback command");
            }
            None if exhausted => return Err(Error::Exhausted),
            None => {}
        }
    }
}

/// Relays between the local streams and the winner until both directions close.
///
/// Whatever the winner already sent during sniffing reaches `output` first.
pub async fn forward<I, O>(winner: Winner, input: I, output: O) -> Result<Transferred>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let (_, stream, banner) = winner.into_parts();
    let (remote_rd, remote_wr) = stream.into_split();

    Forwarder::new(input, output, remote_rd, remote_wr)
        .preload(banner.as_bytes())
        .run()
        .await
}
