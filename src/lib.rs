//! # Veil Tunnel
//!
//! An obfuscating TCP tunnel: it listens on a front-end address, accepts
//! client connections, and relays each byte stream to a fixed backend
//! address, transforming the payload with a keyed stream cipher so that
//! passive observers cannot read or trivially fingerprint the traffic.
//!
//! Veil is deployed in pairs: a client-mode instance next to the
//! plaintext-speaking application, and a server-mode instance next to the
//! plaintext-speaking service, with the ciphered segment in between:
//!
//! ```text
//! app ──plain──> [veil, client mode] ──ciphertext──> [veil, server mode] ──plain──> service
//! ```
//!
//! ## Features
//!
//! - **Keystream obfuscation** with pluggable methods (rc4, chacha20, none)
//! - **Per-connection relays**: one backend connection per accepted client,
//!   two concurrent copy loops, coupled teardown of both sockets
//! - **Idle timeouts** that treat a quiet connection like a disconnect
//! - **Multi-tunnel configuration** from a TOML file with a template section
//!
//! This is obfuscation, not authenticated encryption: there is no key
//! exchange and no message integrity. Both ends must be configured with the
//! same secret and cipher method or the relayed stream is silently garbage.

pub mod cipher;
pub mod config;
pub mod tunnel;

pub use config::{Config, Role, TunnelConfig};
pub use tunnel::{Tunnel, TunnelHandle, TunnelRegistry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cipher error: {0}")]
    Cipher(#[from] cipher::CipherError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Configuration error: {0}")]
    Config(String),
}
