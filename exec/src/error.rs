use thiserror::Error;
use vu_core::decode::DecodeError;

#[derive(Debug, Error)]
pub enum JitError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("code buffer full ({remaining} bytes left)")]
    BufferFull { remaining: usize },

    #[error("code buffer: {0}")]
    Io(#[from] std::io::Error),
}

pub type JitResult<T> = Result<T, JitError>;
