//! Tunnel engine - the per-connection relay core
//!
//! Provides:
//! - Front-end listener and accept loop ([`Tunnel`], [`TunnelHandle`])
//! - Connection pairs: two concurrent copy loops per accepted connection,
//!   ciphered symmetrically, with coupled teardown of both sockets
//! - The process-wide registry of started tunnels ([`TunnelRegistry`])

mod listener;
mod pair;
mod registry;

pub use listener::{Tunnel, TunnelHandle};
pub use registry::TunnelRegistry;

use thiserror::Error;

/// Tunnel engine errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("front-end address {0} is already serving")]
    FrontAddrInUse(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
