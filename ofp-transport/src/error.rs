use thiserror::Error;

/// Errors that can occur anywhere in the transport core.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("end of stream")]
    Eof,

    #[error("no buffer space available (PID slots exhausted)")]
    NoBufferSpace,

    #[error("configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// True iff this is the non-blocking "try again" signal rather than a real failure.
    pub fn would_block(&self) -> bool {
        matches!(self, TransportError::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        TransportError::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
