//! Veil tunnel daemon
//!
//! Starts one tunnel from CLI flags, or many from a TOML config file:
//! - Flag mode: one tunnel, any start failure is fatal
//! - Config mode: every section starts independently; a broken section is
//!   skipped with a warning unless `--tag` pinned it, which makes any
//!   failure fatal
//!
//! Serves until SIGINT/SIGTERM. There is no graceful drain: in-flight
//! connections are abandoned when the process exits.

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::warn;
use veil_tunnel::cipher::Method;
use veil_tunnel::config::{self, Config, Role, TunnelConfig, DEFAULT_BUFFER_SIZE};
use veil_tunnel::tunnel::{Tunnel, TunnelHandle, TunnelRegistry};

/// Veil Tunnel - obfuscating TCP relay
#[derive(Parser, Debug)]
#[command(name = "veil")]
#[command(about = "Obfuscating TCP tunnel: relays byte streams through a keyed stream cipher")]
#[command(version)]
struct Args {
    /// Read tunnel definitions from a TOML config file
    #[arg(short, long)]
    config: Option<String>,

    /// Only start the named section of the config file
    #[arg(long, requires = "config")]
    tag: Option<String>,

    /// host:port to listen on
    #[arg(short, long, default_value = "127.0.0.1:9001")]
    listen: String,

    /// host:port of the backend
    #[arg(short, long, default_value = "127.0.0.1:6400")]
    backend: String,

    /// Encryption method (rc4, chacha20, none)
    #[arg(long, default_value = config::DEFAULT_METHOD)]
    crypto: String,

    /// Shared secret used to derive the keystream
    #[arg(short, long, default_value = "secret")]
    secret: String,

    /// Run in client mode: the front-end side speaks plaintext
    #[arg(long)]
    client_mode: bool,

    /// Copy buffer size in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer: usize,

    /// Idle seconds before a quiet connection is dropped (0 disables)
    #[arg(long, default_value_t = config::DEFAULT_IDLE_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Print an example config file and exit
    #[arg(long)]
    example_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.example_config {
        print!("{}", config::example_config());
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut registry = TunnelRegistry::new();

    if let Some(path) = &args.config {
        let config = Config::load(path).context("Failed to load configuration")?;
        let strict = args.tag.is_some();

        for (name, tunnel_config) in config.resolve(args.tag.as_deref())? {
            match start_tunnel(&name, tunnel_config).await {
                Ok(handle) => registry.insert(handle),
                Err(e) if strict => {
                    return Err(e.context(format!("tunnel [{name}] failed to start")))
                }
                Err(e) => warn!("skipping tunnel [{}]: {:#}", name, e),
            }
        }

        if registry.is_empty() {
            bail!("no tunnels started");
        }
    } else {
        let tunnel_config = TunnelConfig {
            listen: args.listen,
            backend: args.backend,
            role: if args.client_mode {
                Role::Client
            } else {
                Role::Server
            },
            method: Method::from_name(&args.crypto)?,
            secret: args.secret,
            buffer_size: args.buffer,
            idle_timeout: config::idle_timeout_from_secs(args.timeout_secs),
        };
        registry.insert(start_tunnel("main", tunnel_config).await?);
    }

    registry.run_until_shutdown().await?;
    Ok(())
}

async fn start_tunnel(name: &str, config: TunnelConfig) -> Result<TunnelHandle> {
    let handle = Tunnel::new(name, config)?.start().await?;
    Ok(handle)
}
