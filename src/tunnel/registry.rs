//! Registry of started tunnels
//!
//! An owned, write-once collection: the bootstrap layer inserts every
//! handle it starts, then parks on [`TunnelRegistry::run_until_shutdown`].
//! There is no stop call and no graceful drain; in-flight connection pairs
//! are abandoned to OS cleanup when the process exits.

use super::TunnelHandle;
use std::io;
use tracing::info;

/// The set of serving tunnels, created at startup and never mutated after
/// the bootstrap layer finishes starting them.
#[derive(Default)]
pub struct TunnelRegistry {
    handles: Vec<TunnelHandle>,
}

impl TunnelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a started tunnel
    pub fn insert(&mut self, handle: TunnelHandle) {
        self.handles.push(handle);
    }

    /// Number of registered tunnels
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether any tunnel was registered
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// The registered tunnels
    pub fn handles(&self) -> &[TunnelHandle] {
        &self.handles
    }

    /// Block until the process receives SIGINT or SIGTERM.
    pub async fn run_until_shutdown(self) -> io::Result<()> {
        wait_for_signal().await?;
        info!("terminated by signal, stopping {} tunnel(s)", self.handles.len());
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::Method;
    use crate::config::{Role, TunnelConfig};
    use crate::tunnel::Tunnel;

    #[tokio::test]
    async fn test_registry_holds_started_tunnels() {
        let config = TunnelConfig {
            listen: "127.0.0.1:0".to_string(),
            backend: "127.0.0.1:1".to_string(),
            role: Role::Server,
            method: Method::Plain,
            secret: "s".to_string(),
            buffer_size: 4096,
            idle_timeout: None,
        };

        let mut registry = TunnelRegistry::new();
        assert!(registry.is_empty());

        let handle = Tunnel::new("t", config).unwrap().start().await.unwrap();
        registry.insert(handle);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.handles()[0].name(), "t");
    }
}
