use thiserror::Error;

/// Result type alias used across the agent SDK.
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent connection is closed")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] sekia_protocol::ProtocolError),

    #[error(transparent)]
    Bus(#[from] sekia_broker::BrokerError),
}
