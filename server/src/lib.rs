//! # Race Session Server Library
//!
//! This library provides the authoritative host for a multiplayer race session.
//! It admits players holding the session token, keeps the lobby roster, drives
//! the lobby/countdown/race/results lifecycle and ranks the reported finish
//! times. Driving itself happens on the clients; the server only coordinates.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! Every new connection must present the session token before anything else
//! it sends is considered. Wrong tokens, joins while a race is underway and
//! joins into a full lobby are answered with a reason code, and the connection
//! is closed after a short grace delay so the answer can be delivered.
//!
//! ### Roster
//! Admitted participants get a dense 0-based ordinal in join order. The first
//! participant is the host, named "Host", and may kick others or return the
//! session to the lobby after a race. Ordinals are recompacted whenever
//! someone leaves.
//!
//! ### Race Lifecycle
//! When every participant is ready the server assigns spawn points, starts a
//! countdown and then signals the race start. Finish reports are collected
//! until every connected participant has one, and the ranking is broadcast
//! exactly once.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Session Loop
//! All session state lives in one [`session::SessionContext`] owned by the
//! [`network::Server`] loop. Connection tasks and timers only send messages
//! into that loop, so no locks guard the roster or the race state.
//!
//! ### Effects Instead of I/O
//! The session logic never touches a socket. Each event returns a list of
//! [`session::Effect`]s (send, broadcast, close later, start race later) that
//! the network layer applies in order. This keeps the protocol testable
//! without a network.
//!
//! ### TCP Transport
//! Packets are bincode-encoded and length-prefixed on a TCP stream, which
//! gives the reliable ordered delivery the lobby protocol needs.
//!
//! ## Module Organization
//!
//! - `auth`: token generation and per-connection admission decisions
//! - `config`: command line arguments and race settings
//! - `coordinator`: session state machine, readiness and countdown
//! - `host`: port range binding and the connection details to share
//! - `network`: TCP listener, connection tasks and the session loop
//! - `results`: finish report collection and ranking
//! - `roster`: admitted identities, ordinals and host privileges
//! - `session`: glue between transport events and the components above
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use server::config::{Args, ServerConfig};
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), server::BoxError> {
//!     let config = ServerConfig::try_from(Args::parse())?;
//!     let mut server = Server::bind(&config).await?;
//!
//!     // Share this with the other players
//!     println!("{}", server.announcement());
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod host;
pub mod network;
pub mod results;
pub mod roster;
pub mod session;

pub use network::BoxError;
