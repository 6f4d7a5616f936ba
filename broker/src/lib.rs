//! Embedded publish/subscribe broker with wildcard subject routing
//! (spec.md §4.1), plus an optional durable journal and TCP loopback
//! transport for external agents.

pub mod core;
pub mod error;
pub mod journal;
pub mod loopback;

pub use core::{Broker, Handler, SubscriptionHandle};
pub use error::{BrokerError, Result};
pub use journal::Journal;
pub use loopback::LoopbackServer;
