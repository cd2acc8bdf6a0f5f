//! # Arena Client Library
//!
//! The observer side of the arena's replication core. A client never owns
//! replicated state: it keeps a versioned replica of what the server sends
//! and submits requests that the server validates and re-applies.
//!
//! ## Architecture Overview
//!
//! ### Idempotent Replication
//! Every replicated field carries a version that increases with each write.
//! The [`game::ReplicaStore`] applies an event only if it is newer than what
//! it already holds, so duplicated, reordered or re-sent snapshot events
//! never move a field backwards.
//!
//! ### Request Prediction
//! Requests are numbered and their effect on the local hero is predicted
//! immediately. Each `Replicate` packet carries the last request the server
//! processed for this client; acknowledged requests are dropped and the
//! rest are replayed over the confirmed state.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! - Versioned replica store
//! - Phase and artifact views
//! - Pending request history and prediction
//!
//! ### Network Module (`network`)
//! - UDP socket and connection handling
//! - Heartbeats to keep the session alive
//! - Optional simulated latency
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use tpk_client::network::Client;
//! use tpk_shared::HeroType;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", 0, Some(HeroType::Rogue)).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
