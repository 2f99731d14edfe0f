//! Server configuration.

use std::net::SocketAddr;

use agentmux_core::config::DaemonConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP bind address.
    pub addr: SocketAddr,

    /// Outbound messages buffered per client.
    pub client_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3777)),
            client_queue_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Build from the daemon section of the configuration.
    pub fn from_daemon(daemon: &DaemonConfig) -> Result<Self, std::net::AddrParseError> {
        let addr = format!("{}:{}", daemon.bind_host, daemon.ws_port).parse()?;
        Ok(Self {
            addr,
            client_queue_capacity: daemon.client_queue_capacity,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), 3777);
        assert_eq!(config.client_queue_capacity, 256);
    }

    #[test]
    fn from_daemon_config() {
        let daemon = DaemonConfig {
            bind_host: "0.0.0.0".to_string(),
            ws_port: 4100,
            client_queue_capacity: 8,
            ..DaemonConfig::default()
        };
        let config = ServerConfig::from_daemon(&daemon).unwrap();
        assert_eq!(config.addr, SocketAddr::from(([0, 0, 0, 0], 4100)));
        assert_eq!(config.client_queue_capacity, 8);
    }

    #[test]
    fn invalid_host_is_rejected() {
        let daemon = DaemonConfig {
            bind_host: "not a host".to_string(),
            ..DaemonConfig::default()
        };
        assert!(ServerConfig::from_daemon(&daemon).is_err());
    }
}
