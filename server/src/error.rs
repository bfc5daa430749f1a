use shared::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
