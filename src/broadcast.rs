use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{net::UdpSocket, time};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::store::{Candidate, VoteStore};

/// How often the current leader is announced.
pub const BROADCAST_PERIOD: Duration = Duration::from_secs(1);

/// Announces the tally leader once per period until the token is cancelled.
///
/// The socket must already be connected to the result destination. The
/// cancellation branch is biased ahead of the timer, so no datagram goes
/// out once shutdown has been observed. A send failure stops this task
/// only; the election server keeps running.
pub async fn run(
    store: Arc<VoteStore>,
    socket: UdpSocket,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut period = time::interval(BROADCAST_PERIOD);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = period.tick() => {}
        }

        let payload = announcement(store.snapshot_tally().leader());
        socket
            .send(payload.as_bytes())
            .await
            .context("failed to send result datagram")?;
        debug!(payload = payload.trim_end(), "announced tally");
    }

    Ok(())
}

fn announcement(leader: Option<Candidate>) -> String {
    match leader {
        Some(candidate) => format!("The winner is {candidate}\n"),
        None => "No winner for now\n".to_string(),
    }
}
