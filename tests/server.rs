use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use vote_booth::{
    server::Server,
    store::{Tally, VoteStore},
};

const WAIT: Duration = Duration::from_secs(2);
const POLL: Duration = Duration::from_millis(10);

struct TestServer {
    addr: SocketAddr,
    store: Arc<VoteStore>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<Tally>>,
}

async fn start_server() -> Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let store = Arc::new(VoteStore::new());
    let shutdown = CancellationToken::new();
    let server = Server::new(listener, Arc::clone(&store));
    let handle = tokio::spawn(server.run(shutdown.clone()));
    Ok(TestServer {
        addr,
        store,
        shutdown,
        handle,
    })
}

impl TestServer {
    /// Cancels the token and waits for the event loop to return its final tally.
    async fn stop(self) -> Result<Tally> {
        self.shutdown.cancel();
        timeout(WAIT, self.handle).await??
    }

    /// Polls the store until the predicate holds, failing after [`WAIT`].
    async fn tally_where(&self, predicate: impl Fn(&Tally) -> bool) -> Result<Tally> {
        timeout(WAIT, async {
            loop {
                let tally = self.store.snapshot_tally();
                if predicate(&tally) {
                    return tally;
                }
                sleep(POLL).await;
            }
        })
        .await
        .map_err(|_| anyhow!("tally never reached the expected state"))
    }
}

/// Connects and registers as the given elector, asserting the welcome line.
async fn register(addr: SocketAddr, digit: u8) -> Result<BufReader<TcpStream>> {
    let stream = TcpStream::connect(addr).await?;
    let mut stream = BufReader::new(stream);
    stream.write_all(&[digit]).await?;

    let mut line = String::new();
    let bytes = timeout(WAIT, stream.read_line(&mut line)).await??;
    if bytes == 0 {
        return Err(anyhow!("server closed the connection during registration"));
    }
    assert_eq!(line, format!("Welcome, elector {}\n", (digit - b'0')));
    Ok(stream)
}

#[tokio::test]
async fn registration_is_welcomed() -> Result<()> {
    let server = start_server().await?;
    let _elector = register(server.addr, b'4').await?;
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_closed_without_a_reply() -> Result<()> {
    let server = start_server().await?;
    let mut occupant = register(server.addr, b'3').await?;

    let mut impostor = TcpStream::connect(server.addr).await?;
    impostor.write_all(b"3").await?;
    let mut buf = [0u8; 16];
    let read = timeout(WAIT, impostor.read(&mut buf)).await??;
    assert_eq!(read, 0, "impostor should see the connection closed silently");

    // The original occupant is unaffected and can still vote.
    occupant.write_all(b"2").await?;
    server.tally_where(|tally| tally.count_for(2) == 1).await?;

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn invalid_registration_byte_closes_the_connection() -> Result<()> {
    let server = start_server().await?;

    let mut stream = TcpStream::connect(server.addr).await?;
    stream.write_all(b"x").await?;
    let mut buf = [0u8; 16];
    let read = timeout(WAIT, stream.read(&mut buf)).await??;
    assert_eq!(read, 0);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn ballots_are_recorded_and_overwritten() -> Result<()> {
    let server = start_server().await?;
    let mut elector = register(server.addr, b'1').await?;

    elector.write_all(b"2").await?;
    server.tally_where(|tally| tally.count_for(2) == 1).await?;

    elector.write_all(b"3").await?;
    let tally = server
        .tally_where(|tally| tally.count_for(3) == 1)
        .await?;
    assert_eq!(tally.count_for(2), 0, "a new ballot replaces the old one");
    assert_eq!(tally.ballots(), 1);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn bytes_outside_the_candidate_range_are_ignored() -> Result<()> {
    let server = start_server().await?;
    let mut elector = register(server.addr, b'2').await?;

    // Neither an out-of-range digit nor garbage registers a ballot, and the
    // connection survives to cast a valid one afterwards.
    elector.write_all(b"9").await?;
    elector.write_all(b"?").await?;
    elector.write_all(b"1").await?;

    let tally = server
        .tally_where(|tally| tally.count_for(1) == 1)
        .await?;
    assert_eq!(tally.ballots(), 1);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn a_ballot_survives_reconnection() -> Result<()> {
    let server = start_server().await?;

    let mut elector = register(server.addr, b'5').await?;
    elector.write_all(b"1").await?;
    server.tally_where(|tally| tally.count_for(1) == 1).await?;
    drop(elector);

    // The server frees the seat once it observes the disconnect; retry
    // until the re-registration goes through.
    let _reclaimed = timeout(WAIT, async {
        loop {
            if let Ok(stream) = register(server.addr, b'5').await {
                return stream;
            }
            sleep(POLL).await;
        }
    })
    .await?;

    // The seat changed hands without casting a new ballot, yet the old one
    // still counts.
    let tally = server.tally_where(|tally| tally.count_for(1) == 1).await?;
    assert_eq!(tally.ballots(), 1);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_reports_the_final_tally() -> Result<()> {
    let server = start_server().await?;

    let mut one = register(server.addr, b'1').await?;
    let mut two = register(server.addr, b'2').await?;
    let mut three = register(server.addr, b'3').await?;

    one.write_all(b"1").await?;
    two.write_all(b"1").await?;
    three.write_all(b"2").await?;
    server.tally_where(|tally| tally.ballots() == 3).await?;

    let tally = server.stop().await?;
    assert_eq!(tally.count_for(1), 2);
    assert_eq!(tally.count_for(2), 1);
    assert_eq!(tally.count_for(3), 0);
    assert_eq!(tally.leader(), Some(1));
    Ok(())
}
