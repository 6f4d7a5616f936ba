use thiserror::Error;

/// Result type alias used across the broker crate.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors the broker surfaces to callers.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// `subscribe` was called after the broker shut down.
    #[error("broker is closed")]
    Closed,

    /// A pattern used `>` somewhere other than the final token.
    #[error(transparent)]
    InvalidPattern(#[from] sekia_protocol::ProtocolError),

    /// The durable journal could not be written.
    #[error("journal write failed: {0}")]
    Journal(#[from] std::io::Error),
}
