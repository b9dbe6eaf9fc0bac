//! Client for the istgt control socket.
//!
//! The daemon speaks newline-terminated text. Each call opens a fresh
//! connection, writes one command, reads one reply line and closes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Default path of the istgt control socket.
pub const ISTGT_SOCKET: &str = "/var/run/istgt_ctl_sock";

pub const STATUS_CMD: &str = "STATUS";
pub const REFRESH_CMD: &str = "REFRESH";

/// Short-lived connection factory for the control socket.
#[derive(Debug, Clone)]
pub struct ControlSocket {
    path: PathBuf,
    timeout: Duration,
}

impl ControlSocket {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send one command and return the daemon's reply line.
    ///
    /// A reply starting with `ERR` is returned as [`EngineError::Socket`].
    pub async fn send(&self, command: &str) -> Result<String> {
        let exchange = async {
            let mut stream = UnixStream::connect(&self.path)
                .await
                .map_err(|e| EngineError::Socket(format!("connect {}: {}", self.path.display(), e)))?;

            stream
                .write_all(format!("{}\n", command).as_bytes())
                .await
                .map_err(|e| EngineError::Socket(format!("write {}: {}", command, e)))?;

            let mut reply = String::new();
            BufReader::new(stream)
                .read_line(&mut reply)
                .await
                .map_err(|e| EngineError::Socket(format!("read reply to {}: {}", command, e)))?;
            Ok::<_, EngineError>(reply.trim_end().to_string())
        };

        let reply = timeout(self.timeout, exchange)
            .await
            .map_err(|_| EngineError::Timeout(format!("{} on {}", command, self.path.display())))??;

        debug!(command, reply = %reply, "Control socket reply");
        if reply.starts_with("ERR") {
            return Err(EngineError::Socket(format!("{} rejected: {}", command, reply)));
        }
        Ok(reply)
    }

    /// Ask the daemon whether it is alive.
    pub async fn status(&self) -> Result<String> {
        self.send(STATUS_CMD).await
    }

    /// Tell the daemon to re-read its configuration.
    ///
    /// Failures are logged and swallowed; the daemon is restarted
    /// independently when it is unhealthy.
    pub async fn refresh(&self) -> bool {
        match self.send(REFRESH_CMD).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, socket = %self.path.display(), "REFRESH not delivered");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    async fn serve_once(listener: UnixListener, reply: &'static str) -> String {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut line = String::new();
        BufReader::new(read).read_line(&mut line).await.unwrap();
        write.write_all(reply.as_bytes()).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_status_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_once(listener, "OK STATUS\n"));

        let socket = ControlSocket::new(&path, Duration::from_secs(2));
        assert_eq!(socket.status().await.unwrap(), "OK STATUS");
        assert_eq!(server.await.unwrap(), "STATUS\n");
    }

    #[tokio::test]
    async fn test_error_reply_and_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_once(listener, "ERR unknown\n"));

        let socket = ControlSocket::new(&path, Duration::from_secs(2));
        assert!(matches!(socket.send("BOGUS").await, Err(EngineError::Socket(_))));
        server.await.unwrap();

        let missing = ControlSocket::new(dir.path().join("absent.sock"), Duration::from_secs(1));
        assert!(missing.status().await.is_err());
        assert!(!missing.refresh().await);
    }
}
