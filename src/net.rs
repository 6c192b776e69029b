use log::{debug, error};
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;

use crate::error::{AdbError, Result};

/// Connection timeout for sockets opened towards the server.
pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolved location of the host-side ADB server. The server listens
/// on `127.0.0.1:5037` unless started otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Default for Endpoint {
    fn default() -> Endpoint {
        Endpoint {
            host: "127.0.0.1".to_string(),
            port: Endpoint::DEFAULT_PORT,
        }
    }
}

impl Endpoint {
    /// Default port of the host-side ADB server.
    pub const DEFAULT_PORT: u16 = 5037;

    /// Create an endpoint from a host (IPv4/IPv6 literal or DNS name)
    /// and a port.
    pub fn new(host: &str, port: u16) -> Result<Endpoint> {
        if host.is_empty() {
            return Err(AdbError::InvalidArgument("empty endpoint host".into()));
        }
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve the endpoint to a socket address. IP literals resolve
    /// without a lookup; DNS names go through the system resolver.
    /// Anything that yields no usable address is `NotSupported`.
    pub fn resolve(&self) -> Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        let addr = format!("{}:{}", self.host, self.port);
        let mut addrs = addr.to_socket_addrs().map_err(|e| {
            error!("Error resolving endpoint {addr}: {e}");
            AdbError::NotSupported(format!("unresolvable endpoint {addr}: {e}"))
        })?;
        addrs
            .next()
            .ok_or_else(|| AdbError::NotSupported(format!("endpoint {addr} has no addresses")))
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = AdbError;

    /// Parse a `host:port` pair. IPv6 literals use the bracketed form
    /// `[::1]:5037`.
    fn from_str(s: &str) -> Result<Endpoint> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AdbError::InvalidArgument(format!("endpoint without port: {s}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = port
            .parse::<u16>()
            .map_err(|_| AdbError::InvalidArgument(format!("bad endpoint port in {s}")))?;
        Endpoint::new(host, port)
    }
}

/// A single connection to the ADB server. Sockets are exclusively
/// owned by the operation that opened them and dropped on scope exit;
/// only the streaming services keep one alive past a single
/// request/response exchange.
pub struct AdbSocket {
    stream: TcpStream,
    endpoint: Endpoint,
    connected: bool,
    recv_buffer_size: Option<u32>,
    send_buffer_size: Option<u32>,
}

impl AdbSocket {
    /// Open a fresh connection to the endpoint.
    pub async fn connect(endpoint: &Endpoint) -> Result<AdbSocket> {
        Self::connect_sized(endpoint, None, None).await
    }

    /// Open a fresh connection with explicit kernel buffer sizes.
    pub async fn connect_sized(
        endpoint: &Endpoint,
        recv_buffer_size: Option<u32>,
        send_buffer_size: Option<u32>,
    ) -> Result<AdbSocket> {
        let addr = endpoint.resolve()?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(size) = recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        let stream = match timeout(CONNECTION_TIMEOUT, socket.connect(addr)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(AdbError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connection to {endpoint} timed out"),
                )))
            }
        };
        stream.set_nodelay(true)?;
        debug!("Connected to adb server at {endpoint}");
        Ok(AdbSocket {
            stream,
            endpoint: endpoint.clone(),
            connected: true,
            recv_buffer_size,
            send_buffer_size,
        })
    }

    /// Drop the current connection and open a new one to the same
    /// endpoint.
    pub async fn reconnect(&mut self) -> Result<()> {
        let fresh = Self::connect_sized(
            &self.endpoint,
            self.recv_buffer_size,
            self.send_buffer_size,
        )
        .await?;
        self.stream = fresh.stream;
        self.connected = true;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Mark the socket closed. The underlying stream is shut down when
    /// the socket is dropped.
    pub fn close(&mut self) {
        self.connected = false;
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_default_is_loopback_5037() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 5037);
        assert_eq!(
            endpoint.resolve().unwrap(),
            "127.0.0.1:5037".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn endpoint_rejects_empty_host() {
        assert!(matches!(
            Endpoint::new("", 5037),
            Err(AdbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn endpoint_parses_host_port() {
        let endpoint: Endpoint = "localhost:5038".parse().unwrap();
        assert_eq!(endpoint.host(), "localhost");
        assert_eq!(endpoint.port(), 5038);
    }

    #[test]
    fn endpoint_parses_bracketed_ipv6() {
        let endpoint: Endpoint = "[::1]:5037".parse().unwrap();
        assert_eq!(endpoint.host(), "::1");
        let addr = endpoint.resolve().unwrap();
        assert!(addr.is_ipv6());
    }

    #[test]
    fn endpoint_parse_requires_port() {
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!("localhost:notaport".parse::<Endpoint>().is_err());
    }

    #[test]
    fn endpoint_displays_as_host_port() {
        let endpoint = Endpoint::new("10.0.0.2", 5555).unwrap();
        assert_eq!(endpoint.to_string(), "10.0.0.2:5555");
    }

    #[tokio::test]
    async fn socket_connects_and_reconnects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });
        let endpoint = Endpoint::new("127.0.0.1", port).unwrap();
        let mut socket = AdbSocket::connect(&endpoint).await.unwrap();
        assert!(socket.is_connected());
        socket.reconnect().await.unwrap();
        assert!(socket.is_connected());
    }
}
