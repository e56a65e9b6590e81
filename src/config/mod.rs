//! Configuration management
//!
//! Tunnels are configured either from CLI flags (one tunnel) or from a TOML
//! file (many tunnels). In a config file every top-level table defines one
//! tunnel; the reserved `default` table is a template whose values fill in
//! whatever a named section leaves out, and is never itself started.
//!
//! ```toml
//! [default]
//! crypto = "rc4"
//! secret = "change me"
//!
//! [web]
//! listen = "0.0.0.0:9001"
//! backend = "127.0.0.1:6400"
//! ```

use crate::cipher::Method;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default copy-buffer size in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default idle timeout in seconds (30 minutes)
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30 * 60;

/// Default cipher method tag
pub const DEFAULT_METHOD: &str = "rc4";

/// Reserved template section name, never started as a tunnel
pub const TEMPLATE_SECTION: &str = "default";

/// Which side of a connection pair speaks plaintext.
///
/// In client mode the front-end side is plaintext (a local application
/// connects to us, we cipher toward the backend). In server mode the
/// front-end side is ciphertext (a remote veil client connects to us, we
/// forward plaintext to the backend service).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Map a configured timeout in seconds to the engine's idle deadline.
///
/// Zero is the explicit "no deadline enforcement" sentinel and maps to
/// `None`; every other value bounds each read.
pub fn idle_timeout_from_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// Resolved parameters for one tunnel, immutable once handed to the engine.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Front-end listen address (host:port)
    pub listen: String,
    /// Backend address (host:port)
    pub backend: String,
    /// Operating role
    pub role: Role,
    /// Cipher method
    pub method: Method,
    /// Shared secret the keystream is derived from
    pub secret: String,
    /// Copy-buffer size in bytes, must be non-zero
    pub buffer_size: usize,
    /// Per-read idle deadline; `None` disables deadline enforcement
    pub idle_timeout: Option<Duration>,
}

impl TunnelConfig {
    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> crate::Result<()> {
        if self.listen.is_empty() {
            return Err(crate::Error::Config("listen address is empty".to_string()));
        }
        if self.backend.is_empty() {
            return Err(crate::Error::Config("backend address is empty".to_string()));
        }
        if self.listen == self.backend {
            return Err(crate::Error::Config(format!(
                "listen and backend are the same address: {}",
                self.listen
            )));
        }
        if self.buffer_size == 0 {
            return Err(crate::Error::Config(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// One raw section of the config file. All fields optional; missing values
/// come from the template section or the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Section {
    pub listen: Option<String>,
    pub backend: Option<String>,
    pub client_mode: Option<bool>,
    pub crypto: Option<String>,
    pub secret: Option<String>,
    pub buffer: Option<usize>,
    pub timeout_secs: Option<u64>,
}

impl Section {
    /// Fill unset fields from the template section.
    fn merged_over(mut self, template: &Section) -> Section {
        self.listen = self.listen.or_else(|| template.listen.clone());
        self.backend = self.backend.or_else(|| template.backend.clone());
        self.client_mode = self.client_mode.or(template.client_mode);
        self.crypto = self.crypto.or_else(|| template.crypto.clone());
        self.secret = self.secret.or_else(|| template.secret.clone());
        self.buffer = self.buffer.or(template.buffer);
        self.timeout_secs = self.timeout_secs.or(template.timeout_secs);
        self
    }

    /// Turn a merged section into a validated tunnel config.
    fn into_tunnel_config(self) -> crate::Result<TunnelConfig> {
        let listen = self.listen.ok_or_else(|| missing("listen"))?;
        let backend = self.backend.ok_or_else(|| missing("backend"))?;
        let secret = self.secret.ok_or_else(|| missing("secret"))?;
        let method = Method::from_name(self.crypto.as_deref().unwrap_or(DEFAULT_METHOD))?;

        let config = TunnelConfig {
            listen,
            backend,
            role: if self.client_mode.unwrap_or(false) {
                Role::Client
            } else {
                Role::Server
            },
            method,
            secret,
            buffer_size: self.buffer.unwrap_or(DEFAULT_BUFFER_SIZE),
            idle_timeout: idle_timeout_from_secs(
                self.timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            ),
        };
        config.validate()?;
        Ok(config)
    }
}

fn missing(field: &str) -> crate::Error {
    crate::Error::Config(format!("missing required field `{field}`"))
}

/// Parsed multi-tunnel configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    sections: BTreeMap<String, Section>,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> crate::Result<Self> {
        let sections = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(Self { sections })
    }

    /// Section names, template included
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Resolve sections into tunnel configs.
    ///
    /// With a tag, exactly that section is resolved and any problem with it
    /// is a hard error. Without a tag every non-template section is
    /// resolved; a section that fails to resolve is skipped with a warning
    /// so one bad tunnel does not prevent the others from starting.
    pub fn resolve(&self, tag: Option<&str>) -> crate::Result<Vec<(String, TunnelConfig)>> {
        let template = self
            .sections
            .get(TEMPLATE_SECTION)
            .cloned()
            .unwrap_or_default();

        match tag {
            Some(tag) => {
                if tag == TEMPLATE_SECTION {
                    return Err(crate::Error::Config(format!(
                        "`{TEMPLATE_SECTION}` is the template section and cannot be started"
                    )));
                }
                let section = self
                    .sections
                    .get(tag)
                    .ok_or_else(|| crate::Error::Config(format!("no section named `{tag}`")))?;
                let config = section.clone().merged_over(&template).into_tunnel_config()?;
                Ok(vec![(tag.to_string(), config)])
            }
            None => {
                let mut resolved = Vec::new();
                for (name, section) in &self.sections {
                    if name == TEMPLATE_SECTION {
                        continue;
                    }
                    match section.clone().merged_over(&template).into_tunnel_config() {
                        Ok(config) => resolved.push((name.clone(), config)),
                        Err(e) => {
                            warn!("skipping invalid tunnel section [{}]: {}", name, e)
                        }
                    }
                }
                Ok(resolved)
            }
        }
    }
}

/// Example configuration file
pub fn example_config() -> &'static str {
    r#"# Veil tunnel definitions.
#
# Every table below starts one tunnel, except `default`, which is a
# template: named sections inherit any value they do not set themselves.

[default]
crypto = "rc4"
secret = "change me"
buffer = 4096
# Idle seconds before a quiet connection is dropped. 0 disables the deadline.
timeout_secs = 1800

[web]
listen = "0.0.0.0:9001"
backend = "127.0.0.1:6400"

[db]
listen = "127.0.0.1:9002"
backend = "10.0.0.5:9002"
client_mode = true
"#
}
