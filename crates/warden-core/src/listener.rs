//! Control socket binding, stale-socket recovery and removal.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixSocket, UnixStream};
use tracing::{debug, error, warn};

/// Capacity of `sun_path` in `sockaddr_un`, terminator included.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const SUN_PATH_LEN: usize = 108;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const SUN_PATH_LEN: usize = 104;

/// Errors from setting up the control socket.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("control socket path {path:?} is too long (limit {limit} bytes)")]
    PathTooLong { path: PathBuf, limit: usize },

    #[error("{} is already running on {path:?}", instance_label(.instance))]
    AlreadyRunning {
        path: PathBuf,
        instance: Option<String>,
    },

    #[error("failed to bind control socket {path:?}: {source}")]
    BindFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on control socket {path:?}: {source}")]
    ListenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn instance_label(instance: &Option<String>) -> String {
    match instance {
        Some(name) => format!("another instance for `{name}'"),
        None => "another instance".to_string(),
    }
}

/// The listening control socket and the path it is bound to.
#[derive(Debug)]
pub struct ControlSocket {
    path: PathBuf,
    listener: UnixListener,
}

impl ControlSocket {
    /// Bind and listen at `path`.
    ///
    /// A socket file left behind by a dead process is removed and the bind
    /// retried once. A file that is not a socket is never touched, and a
    /// live listener at the path, even one with a full backlog, is reported
    /// as [`InitError::AlreadyRunning`].
    pub async fn bind(
        path: &Path,
        instance: Option<&str>,
        backlog: u32,
    ) -> Result<Self, InitError> {
        if path.as_os_str().len() >= SUN_PATH_LEN {
            return Err(InitError::PathTooLong {
                path: path.to_path_buf(),
                limit: SUN_PATH_LEN,
            });
        }

        let socket = match bind_socket(path) {
            Ok(socket) => socket,
            Err(source) if source.kind() == io::ErrorKind::AddrInUse => {
                recover_stale(path, instance, source).await?;
                bind_socket(path).map_err(|source| InitError::BindFailed {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            Err(source) => {
                return Err(InitError::BindFailed {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        match socket.listen(backlog) {
            Ok(listener) => {
                debug!(path = %path.display(), backlog, "control socket listening");
                Ok(Self {
                    path: path.to_path_buf(),
                    listener,
                })
            }
            Err(source) => {
                remove_socket_file(path);
                Err(InitError::ListenFailed {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    /// Wait for the next pending connection.
    pub async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop listening and unlink the socket file.
    pub fn close(self) {
        drop(self.listener);
        remove_socket_file(&self.path);
    }
}

fn bind_socket(path: &Path) -> io::Result<UnixSocket> {
    let socket = UnixSocket::new_stream()?;
    socket.bind(path)?;
    Ok(socket)
}

/// Decide what to do about an occupied path after `AddrInUse`.
async fn recover_stale(
    path: &Path,
    instance: Option<&str>,
    bind_error: io::Error,
) -> Result<(), InitError> {
    let is_socket = fs::symlink_metadata(path)
        .map(|metadata| metadata.file_type().is_socket())
        .unwrap_or(false);
    if !is_socket {
        return Err(InitError::BindFailed {
            path: path.to_path_buf(),
            source: bind_error,
        });
    }

    let probe_error = match UnixStream::connect(path).await {
        Ok(_probe) => return Err(already_running(path, instance)),
        Err(probe_error) => probe_error,
    };

    match probe_error.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => {}
        // A full accept backlog still means a listener owns the path.
        io::ErrorKind::WouldBlock => return Err(already_running(path, instance)),
        _ => {
            return Err(InitError::BindFailed {
                path: path.to_path_buf(),
                source: probe_error,
            });
        }
    }

    warn!(
        path = %path.display(),
        error = %probe_error,
        "Removing old control socket"
    );
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(InitError::BindFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn already_running(path: &Path, instance: Option<&str>) -> InitError {
    match instance {
        Some(name) => error!(
            path = %path.display(),
            "Another instance is already running for `{name}'"
        ),
        None => error!(path = %path.display(), "Another instance is already running"),
    }
    InitError::AlreadyRunning {
        path: path.to_path_buf(),
        instance: instance.map(str::to_string),
    }
}

fn remove_socket_file(path: &Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            path = %path.display(),
            error = %error,
            "failed to remove control socket file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn socket_path(dir: &TempDir) -> PathBuf {
        dir.path().join("control.sock")
    }

    fn is_socket(path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.file_type().is_socket())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_bind_creates_socket_and_close_unlinks() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);

        let socket = ControlSocket::bind(&path, None, 3).await.unwrap();
        assert_eq!(socket.path(), path.as_path());
        assert!(is_socket(&path));

        socket.close();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(is_socket(&path));

        let socket = ControlSocket::bind(&path, Some("vpn0"), 3).await.unwrap();
        assert!(is_socket(&path));
        socket.close();
    }

    #[tokio::test]
    async fn test_live_instance_is_protected() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let live = ControlSocket::bind(&path, None, 3).await.unwrap();

        let err = ControlSocket::bind(&path, Some("vpn0"), 3)
            .await
            .unwrap_err();
        match err {
            InitError::AlreadyRunning { instance, .. } => {
                assert_eq!(instance.as_deref(), Some("vpn0"));
            }
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        assert!(is_socket(&path), "live socket must survive");
        live.close();
    }

    #[tokio::test]
    async fn test_live_instance_with_full_backlog_is_protected() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let live = ControlSocket::bind(&path, None, 1).await.unwrap();

        // Queue connections nobody accepts until the backlog refuses more.
        let mut queued = Vec::new();
        let mut full = false;
        for _ in 0..64 {
            match UnixStream::connect(&path).await {
                Ok(stream) => queued.push(stream),
                Err(err) => {
                    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
                    full = true;
                    break;
                }
            }
        }
        assert!(full, "backlog never filled after {} connects", queued.len());

        let err = ControlSocket::bind(&path, Some("vpn0"), 1)
            .await
            .unwrap_err();
        match err {
            InitError::AlreadyRunning { instance, .. } => {
                assert_eq!(instance.as_deref(), Some("vpn0"));
            }
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        assert!(is_socket(&path), "live socket must survive");
        drop(queued);
        live.close();
    }

    #[test]
    fn test_already_running_names_instance() {
        let err = InitError::AlreadyRunning {
            path: PathBuf::from("/tmp/x.sock"),
            instance: Some("vpn0".to_string()),
        };
        assert!(err.to_string().contains("`vpn0'"));
    }

    #[tokio::test]
    async fn test_regular_file_is_never_removed() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        fs::write(&path, b"keep me").unwrap();

        let err = ControlSocket::bind(&path, None, 3).await.unwrap_err();
        assert!(matches!(err, InitError::BindFailed { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_path_too_long() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s".repeat(SUN_PATH_LEN));

        let err = ControlSocket::bind(&path, None, 3).await.unwrap_err();
        assert!(matches!(
            err,
            InitError::PathTooLong { limit: SUN_PATH_LEN, .. }
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_bind_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("control.sock");

        let err = ControlSocket::bind(&path, None, 3).await.unwrap_err();
        assert!(matches!(err, InitError::BindFailed { .. }));
    }
}
