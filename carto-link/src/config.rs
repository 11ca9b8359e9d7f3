//! Link configuration.

use carto_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

/// Default command queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default bound on a single accept/connect attempt.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum read buffer size (64 bytes).
pub const MIN_READ_BUFFER_SIZE: usize = 64;

/// Default read buffer size (4 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Whether this endpoint listens for its peer or connects to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Bind, listen and accept one peer at a time (the robot controller).
    #[default]
    Server,
    /// Connect to a listening peer (the operator console).
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" | "listen" => Ok(Role::Server),
            "client" | "connect" => Ok(Role::Client),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Link configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Listen or connect.
    pub role: Role,
    /// Address to bind to (server) or connect to (client).
    #[serde(with = "socket_addr_serde")]
    pub addr: SocketAddr,
    /// Capacity of the outbound command queue.
    pub queue_capacity: usize,
    /// Upper bound of one accept/connect attempt, in milliseconds.
    pub poll_interval_ms: u64,
    /// Disable Nagle's algorithm on connected sockets.
    pub nodelay: bool,
    /// Size of each socket read.
    pub read_buffer_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            nodelay: true,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl LinkConfig {
    /// Configuration for the listening side.
    pub fn server(addr: SocketAddr) -> Self {
        Self {
            role: Role::Server,
            addr,
            ..Default::default()
        }
    }

    /// Configuration for the connecting side.
    pub fn client(addr: SocketAddr) -> Self {
        Self {
            role: Role::Client,
            addr,
            ..Default::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = (interval.as_millis() as u64).max(1);
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(MIN_READ_BUFFER_SIZE);
        self
    }

    /// Returns the poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Returns the queue capacity, never zero.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    /// Applies `CARTO_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(role) = std::env::var("CARTO_ROLE") {
            if let Ok(parsed) = role.parse() {
                self.role = parsed;
            }
        }

        if let Ok(addr) = std::env::var("CARTO_ADDR") {
            if let Ok(parsed) = addr.parse() {
                self.addr = parsed;
            }
        }

        if let Ok(capacity) = std::env::var("CARTO_QUEUE_CAPACITY") {
            if let Ok(n) = capacity.parse::<usize>() {
                self.queue_capacity = n.max(1);
            }
        }

        if let Ok(interval) = std::env::var("CARTO_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse::<u64>() {
                self.poll_interval_ms = ms.max(1);
            }
        }

        if let Ok(nodelay) = std::env::var("CARTO_NODELAY") {
            self.nodelay = nodelay == "1" || nodelay.to_lowercase() == "true";
        }
    }
}

/// Serializes SocketAddr as a plain string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
