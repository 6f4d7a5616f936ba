use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::routes::router;
use crate::socket::bind;
use crate::state::AppState;

/// The control API server: one axum `Router` served over a Unix domain
/// socket, shut down cooperatively via a `CancellationToken`.
pub struct ControlApi {
    socket_path: PathBuf,
    state: AppState,
}

impl ControlApi {
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>, state: AppState) -> Self {
        Self { socket_path: socket_path.into(), state }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and serves until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let listener = bind(&self.socket_path)?;
        let app = router(self.state);

        info!(path = %self.socket_path.display(), "control API ready");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}
