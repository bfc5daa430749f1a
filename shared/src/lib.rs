//! # Shared wire layer
//!
//! Everything both ends of a connection must agree on: the little-endian
//! binary codec, the command enumerations for the peer and signaling id
//! spaces, the 32-byte ids, the command dispatch registry and the
//! length-prefixed framing used on the signaling stream.
//!
//! ## Modules
//!
//! - `codec`: [`ByteWriter`] / [`ByteReader`] for primitives and strings
//! - `protocol`: command tags, delivery [`Channel`]s, [`NetId`]
//! - `dispatch`: [`CommandRegistry`], the fault-barrier dispatcher
//! - `framing`: async `[len][frame]` read/write helpers
//! - `error`: [`CodecError`]

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod protocol;

pub use codec::{ByteReader, ByteWriter};
pub use dispatch::{CommandRegistry, DispatchOutcome};
pub use error::CodecError;
pub use protocol::{
    Channel, EntityId, EntityState, NetId, PeerCommand, PlayerId, SignalingCommand, Token,
    TunnelKind, ID_LEN, MAX_FRAME_SIZE,
};
