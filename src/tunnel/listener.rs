//! Front-end listener
//!
//! One [`Tunnel`] owns one listening socket. Construction validates the
//! config without binding; [`Tunnel::start`] binds, logs one start line and
//! spawns the accept loop, handing each accepted connection to its own
//! connection-pair task so a misbehaving pair never blocks later accepts.

use super::{pair, TunnelError};
use crate::cipher::CipherStream;
use crate::config::TunnelConfig;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long the duplicate-serve pre-check waits for a connect
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after a transient accept error, avoids spinning on fd exhaustion
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One configured tunnel, constructed but not yet serving.
pub struct Tunnel {
    name: String,
    config: Arc<TunnelConfig>,
}

impl Tunnel {
    /// Construct a tunnel from a validated config without binding anything.
    ///
    /// The cipher is built once here so that an unknown method or a bad
    /// secret fails before any socket is touched.
    pub fn new(name: impl Into<String>, config: TunnelConfig) -> crate::Result<Self> {
        config.validate()?;
        CipherStream::new(config.method, &config.secret)?;
        Ok(Self {
            name: name.into(),
            config: Arc::new(config),
        })
    }

    /// Tunnel name, used in log lines
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved configuration
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Bind the front-end address and begin accepting. Non-blocking: the
    /// accept loop runs on its own task and the handle returns immediately.
    ///
    /// Refuses to start if something is already serving the front-end
    /// address, detected with a short-timeout connect, so a duplicate
    /// tunnel reports a conflict instead of failing silently.
    pub async fn start(self) -> crate::Result<TunnelHandle> {
        if probe(&self.config.listen).await {
            return Err(TunnelError::FrontAddrInUse(self.config.listen.clone()).into());
        }

        let listener = TcpListener::bind(&self.config.listen)
            .await
            .map_err(|source| TunnelError::Bind {
                addr: self.config.listen.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(TunnelError::Io)?;

        info!(
            "tunnel {} started: {} -> {} ({} mode, {} cipher)",
            self.name, local_addr, self.config.backend, self.config.role, self.config.method
        );

        let task = tokio::spawn(accept_loop(
            self.name.clone(),
            listener,
            Arc::clone(&self.config),
        ));

        Ok(TunnelHandle {
            name: self.name,
            local_addr,
            task,
        })
    }
}

/// A started tunnel. Holds the accept-loop task; there is no stop call,
/// tunnels serve until the process terminates.
#[derive(Debug)]
pub struct TunnelHandle {
    name: String,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TunnelHandle {
    /// Tunnel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address the front-end socket actually bound, useful when the
    /// configured port was 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the accept loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn accept_loop(name: String, listener: TcpListener, config: Arc<TunnelConfig>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("tunnel {}: accepted connection from {}", name, peer);
                let name = name.clone();
                let config = Arc::clone(&config);
                tokio::spawn(pair::run(name, stream, peer, config));
            }
            Err(e) if is_transient(&e) => {
                warn!("tunnel {}: accept error: {}", name, e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
            Err(e) => {
                error!("tunnel {}: listener failed: {}", name, e);
                break;
            }
        }
    }
    info!("tunnel {} stopped", name);
}

/// Per-connection failures surfaced through `accept` that do not invalidate
/// the listener itself.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Other
    )
}

async fn probe(addr: &str) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::Method;
    use crate::config::Role;

    fn config(listen: &str, backend: &str) -> TunnelConfig {
        TunnelConfig {
            listen: listen.to_string(),
            backend: backend.to_string(),
            role: Role::Server,
            method: Method::Plain,
            secret: "s".to_string(),
            buffer_size: 4096,
            idle_timeout: None,
        }
    }

    #[test]
    fn test_invalid_config_rejected_before_binding() {
        let mut bad = config("127.0.0.1:0", "127.0.0.1:1");
        bad.buffer_size = 0;
        assert!(Tunnel::new("t", bad).is_err());
    }

    #[tokio::test]
    async fn test_start_is_nonblocking_and_reports_bound_addr() {
        let tunnel = Tunnel::new("t", config("127.0.0.1:0", "127.0.0.1:1")).unwrap();
        let handle = tunnel.start().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn test_duplicate_front_address_refused() {
        let first = Tunnel::new("first", config("127.0.0.1:0", "127.0.0.1:1"))
            .unwrap()
            .start()
            .await
            .unwrap();

        let taken = first.local_addr().to_string();
        let second = Tunnel::new("second", config(&taken, "127.0.0.1:1")).unwrap();
        let err = second.start().await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Tunnel(TunnelError::FrontAddrInUse(_))
        ));
    }
}
