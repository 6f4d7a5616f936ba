//! Unix domain socket bootstrap for the control API.
//!
//! The parent directory is created with owner-only permissions, a symlink
//! sitting at the socket path is refused outright, stale sockets left by a
//! previous run are removed, and the bound socket file itself is locked down
//! to owner-only permissions.

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use tokio::net::UnixListener;
use tracing::info;

use crate::error::{ControlApiError, Result};

pub fn bind(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
    }

    if let Ok(meta) = std::fs::symlink_metadata(path)
        && meta.file_type().is_symlink()
    {
        return Err(ControlApiError::SocketPathIsSymlink(path.to_owned()));
    }

    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let listener =
        UnixListener::bind(path).map_err(|source| ControlApiError::Bind { path: path.to_owned(), source })?;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

    info!(path = %path.display(), "control API listening");
    Ok(listener)
}

#[must_use]
pub fn default_path() -> PathBuf {
    PathBuf::from("/tmp/sekia/control.sock")
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixListener as StdUnixListener;

    use super::*;

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sekia-control-api-test-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn binds_and_locks_down_permissions() {
        let dir = test_dir("bind");
        let path = dir.join("control.sock");

        let listener = bind(&path).unwrap();
        drop(listener);

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn removes_a_stale_socket_from_a_previous_run() {
        let dir = test_dir("stale");
        let path = dir.join("control.sock");

        let stale = StdUnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());

        let listener = bind(&path).unwrap();
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn refuses_a_symlinked_socket_path() {
        let dir = test_dir("symlink");
        let real = dir.join("real.sock");
        let link = dir.join("control.sock");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let err = bind(&link).unwrap_err();
        assert!(matches!(err, ControlApiError::SocketPathIsSymlink(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
