//! Transport layer for pooled connections.
//!
//! Provides the [`Dialer`] abstraction the pool uses to open raw byte-stream
//! connections, plus stock TCP and implicit-TLS dialers.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_DIAL_TIMEOUT, SUPPORTED_NETWORKS};

#[cfg(feature = "rustls-tls")]
pub use self::tls::TlsDialer;

/// Trait for opening raw connections to a network endpoint.
///
/// The pool calls `dial` with the network type and address it was built
/// with; both are passed through verbatim.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Connection type produced by this dialer.
    type Conn: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Opens a new connection, giving up once `cancel` fires.
    async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> io::Result<Self::Conn>;
}

#[async_trait]
impl<D: Dialer + ?Sized> Dialer for Arc<D> {
    type Conn = D::Conn;

    async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> io::Result<Self::Conn> {
        (**self).dial(cancel, network, address).await
    }
}

/// Adapts an async closure into a [`Dialer`].
pub struct DialFn<F> {
    f: F,
}

impl<F> DialFn<F> {
    /// Wraps a closure taking `(cancel, network, address)`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for DialFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, C> Dialer for DialFn<F>
where
    F: Fn(CancellationToken, String, String) -> Fut + Send + Sync,
    Fut: Future<Output = io::Result<C>> + Send,
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Conn = C;

    async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> io::Result<C> {
        (self.f)(cancel.clone(), network.to_string(), address.to_string()).await
    }
}

/// Plain TCP dialer.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
    nodelay: bool,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_DIAL_TIMEOUT,
            nodelay: true,
        }
    }
}

impl TcpDialer {
    /// Creates a dialer with the default timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets TCP_NODELAY on dialed sockets.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    async fn connect(&self, network: &str, address: &str) -> io::Result<TcpStream> {
        let stream = match network {
            "tcp" => TcpStream::connect(address).await?,
            "tcp4" => Self::connect_family(address, SocketAddr::is_ipv4).await?,
            "tcp6" => Self::connect_family(address, SocketAddr::is_ipv6).await?,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "unsupported network {:?}, expected one of {:?}",
                        network, SUPPORTED_NETWORKS
                    ),
                ))
            }
        };

        if self.nodelay {
            stream.set_nodelay(true).ok();
        }

        Ok(stream)
    }

    /// Connects to the first resolved address of the requested family.
    async fn connect_family(address: &str, keep: fn(&SocketAddr) -> bool) -> io::Result<TcpStream> {
        let mut last_error = None;

        for addr in lookup_host(address).await?.filter(keep) {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address of the requested family for {}", address),
            )
        }))
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Conn = TcpStream;

    async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> io::Result<TcpStream> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            result = timeout(self.connect_timeout, self.connect(network, address)) => {
                result.map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, format!("dial {} timed out", address))
                })??
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(network = %network, address = %address, "Dialed TCP connection");

        Ok(stream)
    }
}

/// Error reported when a dial is abandoned because its token fired.
pub(crate) fn cancelled() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "dial cancelled")
}

/// Extracts the host part of a `host:port` address.
pub(crate) fn host_of(address: &str) -> &str {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

#[cfg(feature = "rustls-tls")]
mod tls {
    use super::*;
    use rustls::pki_types::ServerName;
    use std::fs::File;
    use std::io::BufReader;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::TlsConnector;

    use crate::config::TlsConfig;
    use crate::errors::{PoolError, PoolResult};

    /// Implicit-TLS dialer (port 465 style): TCP connect, then handshake.
    #[derive(Clone)]
    pub struct TlsDialer {
        tcp: TcpDialer,
        connector: TlsConnector,
        sni_override: Option<String>,
    }

    impl fmt::Debug for TlsDialer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("TlsDialer")
                .field("tcp", &self.tcp)
                .field("sni_override", &self.sni_override)
                .finish()
        }
    }

    impl TlsDialer {
        /// Builds a dialer trusting the webpki roots plus any configured CA file.
        pub fn new(config: &TlsConfig, tcp: TcpDialer) -> PoolResult<Self> {
            config.validate()?;

            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            if let Some(path) = &config.ca_cert_path {
                let file = File::open(path).map_err(|e| {
                    PoolError::configuration(format!("cannot open CA file {}: {}", path.display(), e))
                })?;

                for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
                    let cert = cert.map_err(|e| {
                        PoolError::configuration(format!("invalid CA file {}: {}", path.display(), e))
                    })?;
                    root_store
                        .add(cert)
                        .map_err(|e| PoolError::configuration(format!("rejected CA certificate: {}", e)))?;
                }
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            Ok(Self {
                tcp,
                connector: TlsConnector::from(Arc::new(tls_config)),
                sni_override: config.sni_override.clone(),
            })
        }

        fn server_name(&self, address: &str) -> io::Result<ServerName<'static>> {
            let host = self.sni_override.as_deref().unwrap_or_else(|| host_of(address));
            ServerName::try_from(host.to_string()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("invalid server name: {}", host))
            })
        }
    }

    #[async_trait]
    impl Dialer for TlsDialer {
        type Conn = TlsStream<TcpStream>;

        async fn dial(
            &self,
            cancel: &CancellationToken,
            network: &str,
            address: &str,
        ) -> io::Result<Self::Conn> {
            let server_name = self.server_name(address)?;
            let tcp_stream = self.tcp.dial(cancel, network, address).await?;

            let tls_stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                result = timeout(self.tcp.connect_timeout(), self.connector.connect(server_name, tcp_stream)) => {
                    result.map_err(|_| {
                        io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out")
                    })??
                }
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(address = %address, "TLS handshake complete");

            Ok(tls_stream)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("smtp.example.com:465"), "smtp.example.com");
        assert_eq!(host_of("[::1]:25"), "::1");
        assert_eq!(host_of("mail.example.com"), "mail.example.com");
    }

    #[tokio::test]
    async fn test_tcp_dialer_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"220 ready\r\n").await.unwrap();
        });

        let dialer = TcpDialer::new();
        let mut stream = dialer
            .dial(&CancellationToken::new(), "tcp4", &address)
            .await
            .unwrap();

        let mut buf = [0u8; 11];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"220 ready\r\n");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_dialer_rejects_unknown_network() {
        let err = TcpDialer::new()
            .dial(&CancellationToken::new(), "udp", "127.0.0.1:25")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_tcp_dialer_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = TcpDialer::new()
            .dial(&cancel, "tcp", "127.0.0.1:25")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn test_dial_fn_passes_target_through() {
        let dialer = DialFn::new(|_cancel: CancellationToken, network: String, address: String| async move {
            assert_eq!(network, "tcp");
            assert_eq!(address, "mx.example.com:25");
            let (client, _server) = tokio::io::duplex(64);
            Ok::<_, io::Error>(client)
        });

        assert!(dialer
            .dial(&CancellationToken::new(), "tcp", "mx.example.com:25")
            .await
            .is_ok());
    }

    #[cfg(feature = "rustls-tls")]
    #[test]
    fn test_tls_dialer_rejects_missing_ca_file() {
        let config = crate::config::TlsConfig::builder()
            .ca_cert_path("/nonexistent/ca.pem")
            .build()
            .unwrap();

        assert!(TlsDialer::new(&config, TcpDialer::new()).is_err());
    }

    #[cfg(feature = "rustls-tls")]
    #[test]
    fn test_tls_dialer_ca_file() {
        use std::io::Write;

        let empty = tempfile::NamedTempFile::new().unwrap();
        let config = crate::config::TlsConfig::builder()
            .ca_cert_path(empty.path())
            .sni_override("smtp.example.com")
            .build()
            .unwrap();
        assert!(TlsDialer::new(&config, TcpDialer::new()).is_ok());

        let mut corrupt = tempfile::NamedTempFile::new().unwrap();
        writeln!(corrupt, "-----BEGIN CERTIFICATE-----\n!!not base64!!\n-----END CERTIFICATE-----").unwrap();
        let config = crate::config::TlsConfig::builder()
            .ca_cert_path(corrupt.path())
            .build()
            .unwrap();
        assert!(TlsDialer::new(&config, TcpDialer::new()).is_err());
    }
}
