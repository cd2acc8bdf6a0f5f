//! # Arena Server Library
//!
//! The authoritative side of the arena's replication core. The server owns
//! every replicated value, decides who may write what, and pushes each
//! change to the connected clients.
//!
//! ## Core Responsibilities
//!
//! ### Authority
//! All replicated state lives in the [`authority::AuthorityStore`]. Every
//! write passes one authorization gate keyed on the requester's `Role`.
//! Client requests never write directly: the match re-validates them and
//! re-applies them as the server.
//!
//! ### Replication
//! Each value-changing write bumps a per-field version and queues an event.
//! The [`replication::ReplicationChannel`] forwards those events in write
//! order, so observers can apply them idempotently and drop stale repeats.
//! Periodic full snapshots make observers converge after packet loss.
//!
//! ### Match Flow
//! The [`phase::MatchPhaseController`] runs the prephase lobby and its
//! countdown. The [`objective::ObjectiveController`] tracks the artifact
//! from pickup to scoring. Delayed work such as countdown steps, buff
//! expiry and revives runs through the [`scheduler::Scheduler`].
//!
//! ## Module Organization
//!
//! - `authority`: canonical field store, clamping and damage rules
//! - `registry`: entity handles by id and by controlling player
//! - `replication`: observer set, acknowledgements and packet batching
//! - `phase`: lobby state machine
//! - `objective`: artifact possession state machine
//! - `scheduler`: keyed deadlines polled from the tick
//! - `spawns`: injected spawn and artifact placement
//! - `game`: the `Match` that wires everything together
//! - `client_manager`: connections and buffered requests
//! - `network`: UDP tasks and the main loop
//! - `error`: the `ReplicationError` type
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use tpk_server::game::MatchConfig;
//! use tpk_server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(16), // ~60Hz
//!         16,
//!         MatchConfig::default(),
//!     )
//!     .await?;
//!
//!     // Runs until Ctrl+C: receives requests, ticks the match and
//!     // replicates every change to the connected clients.
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The server uses an event-driven architecture with internal async tasks:
//! - **Network Receiver**: continuously listens for incoming packets
//! - **Network Sender**: drains the outgoing packet queue
//! - **Timeout Checker**: removes clients that went silent
//! - **Main Loop**: applies requests in order and ticks the match

pub mod authority;
pub mod client_manager;
pub mod error;
pub mod game;
pub mod network;
pub mod objective;
pub mod phase;
pub mod registry;
pub mod replication;
pub mod scheduler;
pub mod spawns;

pub use error::{ReplicationError, Result};
pub use game::{Match, MatchConfig};
