//! # Rendezvous Server Library
//!
//! The rendezvous server introduces participants to each other. It holds no
//! game state and makes no game decisions: every connected participant gets a
//! random token, and frames addressed to a token are forwarded to whoever
//! holds it.
//!
//! ## Core Responsibilities
//!
//! ### Introductions
//! Session descriptions and ICE candidates travel between participants in
//! `Tunnel` frames until a direct peer connection is up.
//!
//! ### Relay
//! When no direct path exists, peer traffic is wrapped in `Relay` frames and
//! forwarded the same way.
//!
//! ### Lobby
//! New connections receive their token, a greeting and the online count.
//! The count is re-broadcast whenever someone joins or leaves.
//!
//! ## Architecture Design
//!
//! A single loop owns the [`registry::ConnectionRegistry`]. Each accepted
//! socket gets a reader task that forwards frames to the loop and a writer
//! task that drains an unbounded channel, so a slow participant never stalls
//! the others.
//!
//! ## Module Organization
//!
//! - `network`: accept loop, per-connection tasks, lobby frames
//! - `registry`: token to connection bookkeeping with a capacity limit
//! - `router`: pure target-token rewriting, testable without sockets
//! - `error`: [`error::RendezvousError`]
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::bind("127.0.0.1:8080", 256).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod network;
pub mod registry;
pub mod router;
