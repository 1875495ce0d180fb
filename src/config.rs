//! Configuration for AtlasMC
//!
//! Centralized configuration with sensible defaults. The library never reads
//! process environment; callers that want `MC_HOST`-style overrides resolve
//! them before building a `Config`.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{McError, Result};

/// Default memcached port
pub const DEFAULT_PORT: u16 = 11211;

/// Largest key the binary protocol server accepts
pub const MAX_KEY_LENGTH: usize = 250;

/// A memcached server address (`host[:port]`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddr {
    host: String,
    port: u16,
}

impl ServerAddr {
    /// Create an address from its parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host part (name or IP literal, without brackets)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parse a comma-separated server list, e.g. `"a:11211,b"`
    pub fn parse_list(list: &str) -> Result<Vec<ServerAddr>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for ServerAddr {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(McError::Config("empty server address".to_string()));
        }

        // IP literals with a port (covers bracketed IPv6)
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self::new(addr.ip().to_string(), addr.port()));
        }

        // Bare IPv6 literal, with or without brackets
        let unbracketed = s.trim_start_matches('[').trim_end_matches(']');
        if unbracketed.parse::<std::net::Ipv6Addr>().is_ok() {
            return Ok(Self::new(unbracketed, DEFAULT_PORT));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(McError::Config(format!("missing host in '{}'", s)));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| McError::Config(format!("invalid port in '{}'", s)))?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Main configuration for an AtlasMC client
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Server Configuration
    // -------------------------------------------------------------------------
    /// Server list, fixed for the lifetime of the client
    pub servers: Vec<ServerAddr>,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Upper bound on a single TCP connect attempt
    pub connect_timeout: Duration,

    /// Per-request deadline (`None` = wait forever)
    pub request_timeout: Option<Duration>,

    /// How often pending requests are checked against their deadlines
    pub sweep_interval: Duration,

    /// Disable Nagle's algorithm on every connection
    pub tcp_nodelay: bool,

    // -------------------------------------------------------------------------
    // Reconnect Configuration
    // -------------------------------------------------------------------------
    /// First delay after a connection fails
    pub reconnect_backoff_initial: Duration,

    /// Cap on the (exponentially growing) reconnect delay
    pub reconnect_backoff_max: Duration,

    // -------------------------------------------------------------------------
    // Size Limits
    // -------------------------------------------------------------------------
    /// Largest value `set` will send (checked locally)
    pub max_value_size: usize,

    /// Largest response body accepted before the frame is declared malformed
    pub max_body_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: vec![ServerAddr::new("127.0.0.1", DEFAULT_PORT)],
            connect_timeout: Duration::from_secs(1),
            request_timeout: Some(Duration::from_secs(5)),
            sweep_interval: Duration::from_millis(25),
            tcp_nodelay: true,
            reconnect_backoff_initial: Duration::from_millis(100),
            reconnect_backoff_max: Duration::from_secs(10),
            max_value_size: 1024 * 1024,     // 1 MiB
            max_body_size: 64 * 1024 * 1024, // 64 MiB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(McError::Config("at least one server is required".to_string()));
        }
        let value_limit = u32::MAX as usize - 8 - MAX_KEY_LENGTH;
        if self.max_value_size == 0 || self.max_value_size > value_limit {
            return Err(McError::Config(format!(
                "max_value_size must be in 1..={}",
                value_limit
            )));
        }
        if self.max_body_size == 0 || self.max_body_size > u32::MAX as usize {
            return Err(McError::Config(format!(
                "max_body_size must be in 1..={}",
                u32::MAX
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(McError::Config("sweep_interval must be non-zero".to_string()));
        }
        if self.reconnect_backoff_initial > self.reconnect_backoff_max {
            return Err(McError::Config(
                "reconnect_backoff_initial exceeds reconnect_backoff_max".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
///
/// Address parse failures are remembered and reported by `build()`.
#[derive(Debug)]
pub struct ConfigBuilder {
    config: Config,
    servers: Vec<ServerAddr>,
    error: Option<McError>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            servers: Vec::new(),
            error: None,
        }
    }
}

impl ConfigBuilder {
    /// Add one server, or a comma-separated list of servers
    pub fn server(mut self, addr: impl AsRef<str>) -> Self {
        match ServerAddr::parse_list(addr.as_ref()) {
            Ok(list) => self.servers.extend(list),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Add several servers
    pub fn servers<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for addr in addrs {
            self = self.server(addr);
        }
        self
    }

    /// Set the TCP connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-request deadline (`None` disables it)
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the timeout sweep period
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.config.tcp_nodelay = nodelay;
        self
    }

    /// Set the reconnect backoff bounds
    pub fn reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.reconnect_backoff_initial = initial;
        self.config.reconnect_backoff_max = max;
        self
    }

    /// Set the local value size ceiling (in bytes)
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.config.max_value_size = size;
        self
    }

    /// Set the response body sanity ceiling (in bytes)
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Finish, validating the result
    pub fn build(self) -> Result<Config> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut config = self.config;
        if !self.servers.is_empty() {
            config.servers = self.servers;
        }
        config.validate()?;
        Ok(config)
    }
}
