use thiserror::Error;

/// Result type alias used across the workflow engine crate.
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// The manifest is missing an entry for this workflow, or the on-disk
    /// hash no longer matches it.
    #[error("integrity check failed for workflow `{name}`")]
    IntegrityViolation { name: String },

    /// The script failed to parse or raised during its initial evaluation.
    #[error("workflow `{name}` failed to load: {message}")]
    LoadError { name: String, message: String },

    /// No workflow is loaded under this name.
    #[error("unknown workflow `{0}`")]
    UnknownWorkflow(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] sekia_protocol::ProtocolError),

    #[error(transparent)]
    Bus(#[from] sekia_broker::BrokerError),
}
