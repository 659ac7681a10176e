use std::{io, net::SocketAddr, sync::Arc};

use anyhow::Result;
use futures::future::select_all;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::store::{Candidate, SlotId, Tally, VoteStore, CANDIDATE_COUNT, SLOT_COUNT};

/// Accepts elector connections and runs the one-byte voting protocol.
///
/// Every socket is served cooperatively on the task that calls [`run`];
/// there is no task per connection. The registry of live clients is a plain
/// vector scanned linearly, which is fine for a handful of seats.
///
/// [`run`]: Server::run
pub struct Server {
    listener: TcpListener,
    store: Arc<VoteStore>,
    clients: Vec<Client>,
}

struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    state: ClientState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Unregistered,
    Registered(SlotId),
}

enum Event {
    Shutdown,
    Inbound(io::Result<(TcpStream, SocketAddr)>),
    Readable(usize, io::Result<()>),
}

impl Server {
    pub fn new(listener: TcpListener, store: Arc<VoteStore>) -> Self {
        Self {
            listener,
            store,
            clients: Vec::new(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept/read loop until the token is cancelled, then reports
    /// and returns the final tally.
    ///
    /// The loop's only suspension point is the `select!` below, so a
    /// cancellation always wakes it promptly. An accept or client failure
    /// is scoped to that connection; only listener-level setup problems
    /// reach the caller.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<Tally> {
        loop {
            let event = {
                let clients = &self.clients;
                tokio::select! {
                    _ = shutdown.cancelled() => Event::Shutdown,
                    inbound = self.listener.accept() => Event::Inbound(inbound),
                    (index, ready) = next_readable(clients) => Event::Readable(index, ready),
                }
            };

            match event {
                Event::Shutdown => break,
                Event::Inbound(inbound) => self.handle_inbound(inbound),
                Event::Readable(index, ready) => self.handle_readable(index, ready),
            }
        }

        info!("election server shutting down");
        let tally = self.store.snapshot_tally();
        report_final_tally(&tally);
        // Dropping `self` closes the listener and every client socket.
        Ok(tally)
    }

    fn handle_inbound(&mut self, inbound: io::Result<(TcpStream, SocketAddr)>) {
        match inbound {
            Ok((stream, peer)) => {
                debug!(%peer, "connection accepted");
                self.clients.push(Client {
                    stream,
                    peer,
                    state: ClientState::Unregistered,
                });
            }
            Err(error) => warn!(?error, "failed to accept connection"),
        }
    }

    fn handle_readable(&mut self, index: usize, ready: io::Result<()>) {
        if let Err(error) = ready {
            warn!(peer = %self.clients[index].peer, ?error, "client socket failed");
            self.drop_client(index);
            return;
        }

        // One command byte per step; leftover input stays buffered in the
        // socket and keeps it readable for the next iteration.
        let mut byte = [0u8; 1];
        match self.clients[index].stream.try_read(&mut byte) {
            Ok(0) => {
                debug!(peer = %self.clients[index].peer, "peer closed connection");
                self.drop_client(index);
            }
            Ok(_) => self.handle_command(index, byte[0]),
            // Spurious readiness; the next wait retries.
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {}
            Err(error) => {
                warn!(peer = %self.clients[index].peer, ?error, "read failed");
                self.drop_client(index);
            }
        }
    }

    fn handle_command(&mut self, index: usize, byte: u8) {
        match self.clients[index].state {
            ClientState::Unregistered => self.handle_registration(index, byte),
            ClientState::Registered(slot) => self.handle_ballot(slot, byte),
        }
    }

    fn handle_registration(&mut self, index: usize, byte: u8) {
        let peer = self.clients[index].peer;
        let Some(slot) = parse_slot(byte) else {
            warn!(%peer, byte, "invalid registration byte");
            self.drop_client(index);
            return;
        };

        if !self.store.claim(slot) {
            // The seat already has a live occupant; close without a reply
            // and leave the occupant untouched.
            warn!(%peer, elector = slot + 1, "rejected impostor for occupied seat");
            self.drop_client(index);
            return;
        }

        self.clients[index].state = ClientState::Registered(slot);
        info!(%peer, elector = slot + 1, "elector registered");

        if let Err(error) = self.send_welcome(index, slot) {
            warn!(%peer, ?error, "failed to write welcome");
            self.drop_client(index);
        }
    }

    /// Writes the welcome line without suspending. A short write counts as
    /// a failure; the line is far below any send buffer size.
    fn send_welcome(&mut self, index: usize, slot: SlotId) -> io::Result<()> {
        let line = format!("Welcome, elector {}\n", slot + 1);
        let written = self.clients[index].stream.try_write(line.as_bytes())?;
        if written != line.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "short welcome write",
            ));
        }
        Ok(())
    }

    fn handle_ballot(&mut self, slot: SlotId, byte: u8) {
        match parse_candidate(byte) {
            Some(candidate) => {
                self.store.set_vote(slot, candidate);
                info!(elector = slot + 1, candidate, "ballot recorded");
            }
            // Anything outside the candidate range is not a command.
            None => trace!(elector = slot + 1, byte, "ignoring byte outside candidate range"),
        }
    }

    fn drop_client(&mut self, index: usize) {
        let client = self.clients.swap_remove(index);
        if let ClientState::Registered(slot) = client.state {
            self.store.release(slot);
            info!(peer = %client.peer, elector = slot + 1, "seat freed");
        }
    }
}

/// Resolves once any live client socket reports read readiness.
///
/// With no clients connected it stays pending, leaving the enclosing
/// `select!` to wait on the listener and the cancellation token alone.
async fn next_readable(clients: &[Client]) -> (usize, io::Result<()>) {
    if clients.is_empty() {
        return futures::future::pending().await;
    }

    let waits = clients.iter().enumerate().map(|(index, client)| {
        Box::pin(async move { (index, client.stream.readable().await) })
    });
    let (first, _, _) = select_all(waits).await;
    first
}

fn parse_slot(byte: u8) -> Option<SlotId> {
    (b'1'..=b'0' + SLOT_COUNT as u8)
        .contains(&byte)
        .then(|| (byte - b'1') as SlotId)
}

fn parse_candidate(byte: u8) -> Option<Candidate> {
    (b'1'..=b'0' + CANDIDATE_COUNT as u8)
        .contains(&byte)
        .then(|| (byte - b'0') as Candidate)
}

fn report_final_tally(tally: &Tally) {
    for candidate in 1..=CANDIDATE_COUNT as Candidate {
        info!(candidate, votes = tally.count_for(candidate), "final tally");
    }
    info!(ballots = tally.ballots(), "election closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_digits_cover_the_seat_range() {
        assert_eq!(parse_slot(b'1'), Some(0));
        assert_eq!(parse_slot(b'7'), Some(6));
        assert_eq!(parse_slot(b'0'), None);
        assert_eq!(parse_slot(b'8'), None);
        assert_eq!(parse_slot(b'x'), None);
    }

    #[test]
    fn candidate_digits_cover_the_candidate_range() {
        assert_eq!(parse_candidate(b'1'), Some(1));
        assert_eq!(parse_candidate(b'3'), Some(3));
        assert_eq!(parse_candidate(b'4'), None);
        assert_eq!(parse_candidate(b'\n'), None);
    }
}
