use shared::{CodecError, PlayerId, Token};
use thiserror::Error;

/// Errors raised inside the networking core.
///
/// Handlers return these to the dispatch registry, which logs and drops the
/// message; none of them tear down a connection on their own.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("malformed json payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no peer for token {0}")]
    UnknownToken(Token),

    #[error("unknown scene tag {0}")]
    UnknownScene(u8),

    #[error("no constructor for entity type tag {0}")]
    UnknownEntityType(u8),

    #[error("player {0} is not in the match roster")]
    UnknownPlayer(PlayerId),

    #[error("owner {claimed} claimed by peer bound to {actual:?}")]
    OwnerMismatch {
        claimed: PlayerId,
        actual: Option<PlayerId>,
    },

    #[error("message from peer {0} which has not joined the match")]
    NotJoined(Token),

    #[error("peer {token} cannot {action} while {state}")]
    InvalidPeerState {
        token: Token,
        action: &'static str,
        state: &'static str,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not in a match")]
    NoMatch,

    #[error("already in a match")]
    AlreadyInMatch,

    #[error("only the match host handles {0}")]
    NotHost(&'static str),

    #[error("{0} must come from the match host")]
    NotFromHost(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type NetResult<T> = Result<T, NetError>;
