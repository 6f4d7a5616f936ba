//! Wire envelopes, canonical subjects, and HMAC command signing shared by
//! every sekia component.

pub mod envelope;
pub mod error;
pub mod signing;
pub mod subject;

pub use envelope::{Command, Event, Heartbeat, Payload, Registration, decode_source};
pub use error::{ProtocolError, Result};
pub use subject::{is_valid_pattern, matches, subjects};
