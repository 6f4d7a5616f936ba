use thiserror::Error;

/// Result type alias used across the protocol crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding, decoding, or signing wire envelopes.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The envelope bytes were not valid JSON, or didn't match the expected shape.
    #[error("malformed envelope: {0}")]
    Decode(#[from] serde_json::Error),

    /// A command carried a signature that did not verify against the configured secret.
    #[error("signature rejected for command {command:?}")]
    SignatureRejected {
        /// Name of the command whose signature failed verification.
        command: String,
    },

    /// A subject or pattern used a `>` wildcard somewhere other than the final token.
    #[error("invalid pattern: `>` must be the final token in `{0}`")]
    InvalidPattern(String),
}
