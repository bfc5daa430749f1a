//! Command tags, delivery tiers and the 32-byte ids carried on the wire

use crate::codec::{ByteReader, ByteWriter};
use crate::error::CodecError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of every token, player id and entity id field
pub const ID_LEN: usize = 32;

/// Largest frame accepted on the signaling stream
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Fixed 32-byte id used for signaling tokens, player ids and entity ids.
/// All-zero means "none" (an unowned entity on the wire).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetId([u8; ID_LEN]);

/// Opaque correlation token assigned by the rendezvous server
pub type Token = NetId;
/// Network id of a participant
pub type PlayerId = NetId;
/// Id of a replicated entity
pub type EntityId = NetId;

impl NetId {
    pub const EMPTY: NetId = NetId([0; ID_LEN]);

    /// 32 random lowercase hex characters
    pub fn random() -> Self {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; ID_LEN];
        for b in bytes.iter_mut() {
            *b = HEX[rng.gen_range(0..16)];
        }
        NetId(bytes)
    }

    /// Builds an id from a string of at most 32 bytes, zero padded
    pub fn from_str_padded(value: &str) -> Result<Self, CodecError> {
        if value.len() > ID_LEN {
            return Err(CodecError::InvalidId {
                expected: ID_LEN,
                got: value.len(),
            });
        }
        let mut bytes = [0u8; ID_LEN];
        bytes[..value.len()].copy_from_slice(value.as_bytes());
        Ok(NetId(bytes))
    }

    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        NetId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0; ID_LEN]
    }

    pub fn write(&self, writer: &mut ByteWriter) {
        writer.write_bytes(&self.0);
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(reader.read_bytes(ID_LEN)?);
        Ok(NetId(bytes))
    }

    /// `None` for the all-zero id
    pub fn read_optional(reader: &mut ByteReader<'_>) -> Result<Option<Self>, CodecError> {
        let id = Self::read(reader)?;
        Ok((!id.is_empty()).then_some(id))
    }

    pub fn write_optional(id: Option<&NetId>, writer: &mut ByteWriter) {
        id.unwrap_or(&NetId::EMPTY).write(writer);
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(ID_LEN);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}

impl fmt::Debug for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetId({})", self)
    }
}

impl TryFrom<String> for NetId {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NetId::from_str_padded(&value)
    }
}

impl From<NetId> for String {
    fn from(id: NetId) -> Self {
        id.to_string()
    }
}

/// Declares a `#[repr(u8)]` command enum with a checked `TryFrom<u8>`
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $err:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<u8> for $name {
            type Error = CodecError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(CodecError::$err(other)),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }
    };
}

wire_enum!(
    /// Header byte of every message sent over a peer channel
    PeerCommand, UnknownCommand {
        JoinRequest = 0,
        JoinResponse = 1,
        PlayerConnection = 2,
        SnapshotEnd = 3,
        SnapshotAck = 4,
        EntityData = 5,
        EventData = 6,
        GracefulDisconnect = 7,
        PingRequest = 8,
        PingResponse = 9,
        PlayerPing = 10,
        ChatMessage = 11,
    }
);

wire_enum!(
    /// Header byte of every frame on the signaling channel
    SignalingCommand, UnknownCommand {
        Notification = 0,
        OnlinePlayers = 1,
        Tunnel = 2,
        PlayerIdentity = 3,
        ChatMessage = 4,
        Relay = 5,
        Welcome = 6,
    }
);

wire_enum!(
    /// Payload kind of a Tunnel frame
    TunnelKind, UnknownTunnelKind {
        SessionDescription = 0,
        IceCandidate = 1,
    }
);

wire_enum!(
    /// Delivery tier of a peer channel
    Channel, UnknownChannel {
        ReliableOrdered = 0,
        ReliableUnordered = 1,
        UnreliableUnordered = 2,
    }
);

wire_enum!(
    /// Lifecycle tag carried in EntityData
    EntityState, UnknownEntityState {
        Active = 0,
        Inactive = 1,
    }
);

impl Channel {
    pub fn is_reliable(self) -> bool {
        !matches!(self, Channel::UnreliableUnordered)
    }
}

/// Starts a frame with its command byte
pub fn begin_frame(command: impl Into<u8>) -> ByteWriter {
    let mut writer = ByteWriter::new();
    writer.write_u8(command.into());
    writer
}

/// `[Tunnel][token][kind][json]`
pub fn tunnel_frame(token: &Token, kind: TunnelKind, json: &str) -> Vec<u8> {
    let mut writer = begin_frame(SignalingCommand::Tunnel);
    token.write(&mut writer);
    writer.write_u8(kind.into());
    writer.write_bytes(json.as_bytes());
    writer.into_bytes()
}

/// `[PlayerIdentity][token][player]`
pub fn identity_frame(token: &Token, player: &PlayerId) -> Vec<u8> {
    let mut writer = begin_frame(SignalingCommand::PlayerIdentity);
    token.write(&mut writer);
    player.write(&mut writer);
    writer.into_bytes()
}

/// `[Relay][token][channel][payload]`
pub fn relay_frame(token: &Token, channel: Channel, payload: &[u8]) -> Vec<u8> {
    let mut writer = begin_frame(SignalingCommand::Relay);
    token.write(&mut writer);
    writer.write_u8(channel.into());
    writer.write_bytes(payload);
    writer.into_bytes()
}
