//! Thin client used by any component that behaves as an agent on the bus:
//! registers on connect, heartbeats every 30 seconds, subscribes to its
//! command subject, and answers config-reload broadcasts.

pub mod agent;
pub mod bus;
pub mod error;
pub mod loopback_client;

pub use agent::{Agent, CommandHandler, ReloadHandler};
pub use bus::{Bus, SubHandle};
pub use error::{AgentError, Result};
pub use loopback_client::LoopbackClient;
