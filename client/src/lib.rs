//! # P2P Networking Core
//!
//! This library is the client-side networking core of a peer-to-peer
//! multiplayer game. One participant hosts a match; the others connect to it
//! through a rendezvous server that only brokers introductions (and relays
//! traffic when no direct path exists). Game objects are replicated from the
//! participant that owns them to everyone else.
//!
//! ## Architecture Overview
//!
//! ### Sans-IO core
//! [`node::NetworkNode`] does no I/O and never blocks. A driver feeds it
//! signaling frames and connectivity changes, calls `frame(now)` once per
//! tick, and writes out the frames it hands back. Time is always passed in,
//! which keeps every timer deterministic under test.
//!
//! ### Star topology
//! Non-hosts connect only to the host. The host relays entity updates it
//! receives to the other participants and is trusted to do so; everyone
//! else may only speak for the entities they own.
//!
//! ### Fault barrier
//! Inbound messages are routed by their command byte through a
//! [`shared::CommandRegistry`]. A malformed or rejected message is logged
//! and dropped; nothing behind it in the queue is affected.
//!
//! ## Module Organization
//!
//! ### Node (`node`)
//! Owns every component below and both dispatch registries:
//! - Signaling and peer command handlers
//! - The per-frame tick
//! - Events surfaced to the game
//!
//! ### Peers (`peer`, `peer_registry`, `transport`, `relay`, `negotiation`)
//! One connection per remote participant:
//! - Offer/answer and ICE candidates carried in signaling tunnels
//! - Candidates buffered until the remote description is set
//! - Three delivery tiers per connection
//! - Ping round trips and throughput counters
//!
//! ### Signaling (`signaling`, `driver`)
//! The connection to the rendezvous server:
//! - State machine with exponential backoff reconnection
//! - Tokio TCP driver with length-prefixed frames
//!
//! ### Replication (`entity`, `replication`)
//! - Scenes of owned, replicable entities
//! - Per-frame send pass picking a delivery tier per message
//! - Ownership checks on receive
//! - Join snapshots
//!
//! ### Session (`session`)
//! - Match roster and ping statistics
//! - Identity handshake over signaling
//! - Join flow and graceful departure
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use client::config::NetConfig;
//! use client::driver::{Driver, Game};
//! use client::entity::{EntityFactory, Scene, SceneSet};
//! use client::node::NetworkNode;
//! use client::relay::RelayTransportFactory;
//! use shared::NetId;
//!
//! struct Quiet;
//! impl Game for Quiet {}
//!
//! let node = NetworkNode::new(
//!     NetConfig::default(),
//!     NetId::random(),
//!     Box::new(RelayTransportFactory::new()),
//!     SceneSet::new().with_scene(Scene::new(0)),
//!     EntityFactory::new(),
//! );
//! let mut driver = Driver::new(node, "127.0.0.1:8080", 60);
//! driver.node_mut().host_match()?;
//! driver.run(&mut Quiet).await?;
//! ```

pub mod config;
pub mod driver;
pub mod entity;
pub mod error;
mod negotiation;
pub mod node;
pub mod peer;
pub mod peer_registry;
pub mod relay;
pub mod replication;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::NetConfig;
pub use error::{NetError, NetResult};
pub use node::{NetworkNode, NodeEvent};
