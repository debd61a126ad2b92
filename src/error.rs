use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not a multicast group address: {0}")]
    InvalidMulticast(std::net::IpAddr),

    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("feed already disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, FeedError>;
