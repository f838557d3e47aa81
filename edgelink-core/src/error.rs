use std::io;

/// The six error kinds every public edgelink operation may return.
///
/// There are no panics across the public API boundary; every fallible
/// operation returns one of these, wrapped in [`Error`].
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("unknown error")]
    Unknown,
}

pub type Error = ErrorKind;

pub type Result<T> = std::result::Result<T, Error>;

impl ErrorKind {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        ErrorKind::InvalidParameter(msg.into())
    }

    pub fn connection_failure(msg: impl Into<String>) -> Self {
        ErrorKind::ConnectionFailure(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        ErrorKind::NotSupported(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        let err: ErrorKind = io_err.into();
        assert!(matches!(err, ErrorKind::Io(_)));
    }
}
