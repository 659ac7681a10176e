//! A small concurrent election service.
//!
//! Electors connect over TCP, claim a numbered seat with their first byte,
//! and cast single-byte ballots for one of a fixed set of candidates. A
//! background task tallies the ballots once per period and announces the
//! current leader over UDP. Each module focuses on a concrete
//! responsibility:
//!
//! - [`cli`] parses the command-line interface (TCP listen port and UDP
//!   result port).
//! - [`server`] accepts elector connections and runs the one-byte
//!   registration/voting protocol, multiplexing every socket inside a
//!   single readiness-driven task.
//! - [`store`] guards the elector seats and derives tallies from them.
//! - [`broadcast`] publishes the current leader once per period.
//!
//! Integration tests use this crate directly to exercise the server loop,
//! the seat-occupancy rules, and the retained-vote policy.

pub mod broadcast;
pub mod cli;
pub mod server;
pub mod store;
