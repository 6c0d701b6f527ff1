#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Malformed or out-of-sequence stream message.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A value the detector or config file provided that this crate cannot
    /// work with.
    #[error("unsupported configuration: {0}")]
    Config(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    /// The image container could not be composed or committed to storage.
    #[error("emit error: {0}")]
    Emit(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Cooperative shutdown was observed mid-receive.
    #[error("shutdown requested")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, Error>;
