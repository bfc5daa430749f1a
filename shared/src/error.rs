use thiserror::Error;

/// Errors raised while encoding or decoding wire data
#[derive(Debug, Error)]
pub enum CodecError {
    /// A read needed more bytes than the buffer had left. The cursor is not moved.
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown command id {0}")]
    UnknownCommand(u8),

    #[error("unknown tunnel kind {0}")]
    UnknownTunnelKind(u8),

    #[error("unknown channel tag {0}")]
    UnknownChannel(u8),

    #[error("unknown entity state tag {0}")]
    UnknownEntityState(u8),

    #[error("id must be {expected} bytes, got {got}")]
    InvalidId { expected: usize, got: usize },

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
