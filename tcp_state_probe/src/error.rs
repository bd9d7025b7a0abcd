use std::io;

/// Errors surfaced by the probe log and the record codecs.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("log buffer size must be between 1 and 16777216 records")]
    InvalidCapacity,

    #[error("unknown address family {0}")]
    UnknownAddressFamily(u8),

    #[error("unknown direction byte {0:#04x}")]
    UnknownDirection(u8),

    #[error("wait for log data was interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<ProbeError> for io::Error {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Io(e) => e,
            ProbeError::Interrupted => io::Error::new(io::ErrorKind::Interrupted, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
