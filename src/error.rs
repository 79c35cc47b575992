use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("malformed preamble: {0}")]
    MalformedPreamble(String),

    #[error("server did not acknowledge preamble")]
    PreambleRejected,

    #[error("peer did not acknowledge last message")]
    AckMismatch,

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("client must be connected first")]
    NotConnected,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
