use thiserror::Error;

/// Failures raised by the node client, the store and the header codec.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failure, timeout or non-2xx HTTP status.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with something that is not a usable JSON-RPC payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Store read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Malformed hash, hex or header bytes handed to the codec.
    #[error("encoding error: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<bb8::RunError<tokio_postgres::Error>> for Error {
    fn from(e: bb8::RunError<tokio_postgres::Error>) -> Self {
        Error::Storage(e.to_string())
    }
}

// Only the header cursor performs I/O-style reads and writes.
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Encoding(e.to_string())
    }
}
