//! Local-only HTTP control plane over a Unix domain socket: read-only
//! status/agents/workflows snapshots plus two actions, workflow reload and
//! config-reload notification. Never exposes direct bus publish access.

pub mod error;
pub mod routes;
pub mod server;
pub mod socket;
pub mod state;

pub use error::{ControlApiError, Result};
pub use server::ControlApi;
pub use socket::default_path;
pub use state::AppState;
