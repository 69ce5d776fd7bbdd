//! # Race Session Client Library
//!
//! This library provides the participant side of a multiplayer race session.
//! It joins a hosted session with the shared token, mirrors the lobby and race
//! state the server broadcasts, and validates the local participant's progress
//! around the track before reporting a finish time.
//!
//! ## Architecture Overview
//!
//! ### Server Authority
//! The server owns the roster and the session lifecycle. The client keeps a
//! read-only [`lobby::LobbyView`] that is only ever updated from server
//! packets; it never decides when the race starts and never computes ranks.
//!
//! ### Local Progress Validation
//! Checkpoint order, lap completion and the race clock are tracked locally by
//! a [`progress::ProgressTracker`]. Out-of-order checkpoints and premature
//! finish-line crossings are ignored. Only the final elapsed time is sent to
//! the server, once.
//!
//! ### Disconnect Handling
//! Losing the connection, being kicked or the host shutting down all end the
//! session for this client. The view moves to the pre-race phase and
//! [`network::Client::run`] returns so the caller can offer a new join.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Handshake, packet loop and the channels feeding track events and lobby
//! commands into the session.
//!
//! ### Lobby Module (`lobby`)
//! The mirrored roster, phase, spawn assignments and final ranking.
//!
//! ### Progress Module (`progress`)
//! Checkpoint and lap bookkeeping, respawn to the last checkpoint and stuck
//! detection.
//!
//! ### Driver Module (`driver`)
//! A scripted track and vehicle for headless runs and tests.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::driver::{ScriptedDriver, ScriptedVehicle};
//! use client::network::{join, ClientConfig};
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = join(ClientConfig {
//!         address: "127.0.0.1:7777".to_string(),
//!         name: "Ada".to_string(),
//!         token: "K7XM2P".to_string(),
//!         auto_ready: true,
//!         ..ClientConfig::default()
//!     })
//!     .await?;
//!
//!     let (events_tx, events) = mpsc::unbounded_channel();
//!     let (_commands_tx, commands) = mpsc::unbounded_channel();
//!     let driver = ScriptedDriver::new(Duration::from_secs(20));
//!     tokio::spawn(driver.run(client.subscribe(), events_tx));
//!
//!     let outcome = client.run(events, commands, &mut ScriptedVehicle::default()).await;
//!     println!("Session ended: {:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod driver;
pub mod lobby;
pub mod network;
pub mod progress;
