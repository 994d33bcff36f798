//! Bind host and port selection.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use thiserror::Error;

/// Port scanning starts here when nothing usable was requested.
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkResolutionError {
    #[error("Port {0} is outside the valid port range")]
    InvalidBasePort(u64),
    #[error("No free port between {start} and {end}")]
    NoFreePort { start: u16, end: u16 },
    #[error("Port {0} leaves no room for the hot reload port")]
    NoHotPort(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    /// Hot updates don't work over `0.0.0.0` on Windows, so it only gets
    /// loopback there.
    pub fn default_host(self) -> &'static str {
        match self {
            Platform::Windows => "localhost",
            Platform::Unix => "0.0.0.0",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinding {
    /// Address handed to the listener.
    pub host: String,
    /// Address shown to the user.
    pub display_host: String,
}

/// Pick the bind host. An empty request counts as no request.
pub fn resolve_host(requested: Option<&str>, platform: Platform) -> HostBinding {
    let default_host = platform.default_host();
    let host = requested
        .filter(|host| !host.is_empty())
        .unwrap_or(default_host);

    let display_host = if host == default_host && platform != Platform::Windows {
        "localhost"
    } else {
        host
    };

    HostBinding {
        host: host.to_string(),
        display_host: display_host.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub display_host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(binding: HostBinding, port: u16) -> Self {
        Self {
            host: binding.host,
            display_host: binding.display_host,
            port,
        }
    }

    /// The hot reload transport always listens one port above the server.
    pub fn hot_port(&self) -> Result<u16, NetworkResolutionError> {
        self.port
            .checked_add(1)
            .ok_or(NetworkResolutionError::NoHotPort(self.port))
    }

    pub fn url(&self, base: &str) -> String {
        format!("http://{}:{}{}", self.display_host, self.port, base)
    }
}

/// Read the base port from user input, using leading digits only.
/// Missing, unparsable and zero values fall back to [`DEFAULT_PORT`].
pub fn parse_port(requested: Option<&str>) -> Result<u16, NetworkResolutionError> {
    let digits: String = requested
        .unwrap_or_default()
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();

    if digits.is_empty() {
        return Ok(DEFAULT_PORT);
    }

    let port = digits.parse::<u64>().unwrap_or(u64::MAX);
    match port {
        0 => Ok(DEFAULT_PORT),
        port => u16::try_from(port).map_err(|_| NetworkResolutionError::InvalidBasePort(port)),
    }
}

/// Find the first free port at or above `requested`.
pub async fn resolve_port(requested: Option<&str>) -> Result<u16, NetworkResolutionError> {
    let base = parse_port(requested)?;
    PortFinder::default().find(base).await
}

/// Scans upward for a port that can be bound on every probe host.
#[derive(Debug, Clone)]
pub struct PortFinder {
    hosts: Vec<IpAddr>,
    highest: u16,
}

impl Default for PortFinder {
    fn default() -> Self {
        Self::new(vec![
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        ])
    }
}

impl PortFinder {
    pub fn new(hosts: Vec<IpAddr>) -> Self {
        Self {
            hosts,
            highest: u16::MAX,
        }
    }

    pub fn with_highest(mut self, highest: u16) -> Self {
        self.highest = highest;
        self
    }

    pub async fn find(&self, base: u16) -> Result<u16, NetworkResolutionError> {
        for port in base..=self.highest {
            if self.is_free(port).await {
                tracing::debug!(port, "Found free port");
                return Ok(port);
            }
        }

        Err(NetworkResolutionError::NoFreePort {
            start: base,
            end: self.highest,
        })
    }

    async fn is_free(&self, port: u16) -> bool {
        for host in &self.hosts {
            match tokio::net::TcpListener::bind(SocketAddr::new(*host, port)).await {
                Ok(_) => continue,
                // The machine doesn't have this interface, nothing to collide with
                Err(e) if e.kind() == ErrorKind::AddrNotAvailable => continue,
                Err(_) => return false,
            }
        }

        true
    }
}
