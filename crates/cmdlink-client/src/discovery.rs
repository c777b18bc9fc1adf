//! Server discovery.

use std::time::Duration;

use async_trait::async_trait;
use cmdlink_core::ServerIdentity;

use crate::error::ClientError;

/// Finds command servers.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Servers answering within `timeout`.
    ///
    /// # Errors
    /// Returns error if discovery could not run at all.
    async fn discover(&self, timeout: Duration) -> Result<Vec<ServerIdentity>, ClientError>;
}

/// Picks one server out of a discovered list, usually by asking the user.
#[async_trait]
pub trait ServerSelector: Send + Sync {
    /// Index into `servers`, or `None` to cancel.
    async fn select(&self, servers: &[ServerIdentity]) -> Option<usize>;
}

/// Selector that always picks the first server.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstServer;

#[async_trait]
impl ServerSelector for FirstServer {
    async fn select(&self, servers: &[ServerIdentity]) -> Option<usize> {
        (!servers.is_empty()).then_some(0)
    }
}

/// Discovery over a fixed list.
#[derive(Debug, Default, Clone)]
pub struct StaticDiscovery {
    servers: Vec<ServerIdentity>,
}

impl StaticDiscovery {
    #[must_use]
    pub const fn new(servers: Vec<ServerIdentity>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<ServerIdentity>, ClientError> {
        Ok(self.servers.clone())
    }
}

#[cfg(feature = "multicast")]
pub use multicast::MulticastDiscovery;

#[cfg(feature = "multicast")]
mod multicast {
    use std::{collections::HashSet, net::SocketAddr, time::Duration};

    use async_trait::async_trait;
    use cmdlink_core::{ServerIdentity, config::ServerConfig};
    use serde::{Deserialize, Serialize};
    use tokio::{net::UdpSocket, time::Instant};

    use super::Discovery;
    use crate::error::ClientError;

    const MAX_PACKET: usize = 2048;

    /// Discovery packet, one JSON object per datagram.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub(crate) enum DiscoveryPacket {
        Request {
            token: String,
        },
        Response {
            token: String,
            #[serde(default)]
            address: String,
            port: u16,
            #[serde(default)]
            name: String,
            #[serde(default)]
            version: String,
            #[serde(default)]
            tls: bool,
        },
    }

    /// UDP multicast discovery.
    ///
    /// Sends one request to the group and collects responses carrying the
    /// same token until the timeout expires.
    #[derive(Debug, Clone)]
    pub struct MulticastDiscovery {
        group: SocketAddr,
        token: String,
    }

    impl MulticastDiscovery {
        #[must_use]
        pub fn new(group: SocketAddr, token: impl Into<String>) -> Self {
            Self {
                group,
                token: token.into(),
            }
        }

        /// Build from the `[server]` config section.
        ///
        /// # Errors
        /// Returns error if the multicast group is not a socket address.
        pub fn from_config(config: &ServerConfig) -> Result<Self, ClientError> {
            let group = config.multicast_group.parse().map_err(|e| {
                ClientError::Discovery(format!(
                    "invalid multicast group '{}': {e}",
                    config.multicast_group
                ))
            })?;
            Ok(Self::new(group, config.discovery_token.clone()))
        }

        fn accept(&self, packet: DiscoveryPacket, from: SocketAddr) -> Option<ServerIdentity> {
            let DiscoveryPacket::Response {
                token,
                address,
                port,
                name,
                version,
                tls,
            } = packet
            else {
                return None;
            };
            if token != self.token {
                tracing::debug!(%from, "ignoring discovery response with foreign token");
                return None;
            }

            let address = if address.is_empty() {
                from.ip().to_string()
            } else {
                address
            };
            Some(ServerIdentity {
                name: if name.is_empty() { address.clone() } else { name },
                address,
                port,
                version,
                tls_enabled: tls,
                description: None,
            })
        }
    }

    #[async_trait]
    impl Discovery for MulticastDiscovery {
        async fn discover(&self, timeout: Duration) -> Result<Vec<ServerIdentity>, ClientError> {
            let io_err = |e: std::io::Error| ClientError::Discovery(e.to_string());

            let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(io_err)?;
            let request = serde_json::to_vec(&DiscoveryPacket::Request {
                token: self.token.clone(),
            })
            .map_err(|e| ClientError::Discovery(e.to_string()))?;
            socket.send_to(&request, self.group).await.map_err(io_err)?;
            tracing::info!("Discovery request sent to {}", self.group);

            let deadline = Instant::now() + timeout;
            let mut seen = HashSet::new();
            let mut servers = Vec::new();
            let mut buf = vec![0u8; MAX_PACKET];

            loop {
                let (len, from) =
                    match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                        Err(_) => break,
                        Ok(Ok(received)) => received,
                        Ok(Err(e)) => {
                            tracing::warn!("Discovery receive failed: {}", e);
                            break;
                        }
                    };

                let packet = match serde_json::from_slice::<DiscoveryPacket>(&buf[..len]) {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::debug!(%from, "ignoring malformed discovery packet: {e}");
                        continue;
                    }
                };
                if let Some(server) = self.accept(packet, from) {
                    if seen.insert(server.endpoint()) {
                        tracing::debug!("Discovered {} at {}", server.name, server.endpoint());
                        servers.push(server);
                    }
                }
            }

            tracing::info!(count = servers.len(), "discovery finished");
            Ok(servers)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_server_selector() {
        assert_eq!(FirstServer.select(&[]).await, None);
        assert_eq!(
            FirstServer.select(&[ServerIdentity::default()]).await,
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_static_discovery_returns_list() {
        let server = ServerIdentity {
            name: "local".into(),
            address: "localhost".into(),
            port: 50051,
            ..ServerIdentity::default()
        };
        let discovery = StaticDiscovery::new(vec![server.clone()]);
        let found = tokio_test::assert_ok!(discovery.discover(Duration::from_secs(1)).await);
        assert_eq!(found, vec![server]);
    }
}
