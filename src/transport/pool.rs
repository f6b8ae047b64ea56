//! Keep-alive connection pool.
//!
//! Connections are keyed by where their bytes ultimately land: scheme, host,
//! port, and the proxy hop when (and only when) the connection is a CONNECT
//! tunnel. A tunneled connection is target-specific and must never be handed
//! to a request for a different origin; a plain-HTTP proxy connection is keyed
//! on the proxy itself and serves any plain target through absolute-form
//! request lines.
//!
//! Checkout is atomic: an idle entry is removed under the lock before being
//! handed out, so no two callers ever share a stream.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::config::ProxyConfig;
use crate::transport::error::TransportErrorKind;
use crate::transport::wire::{self, Scheme, Target};

/// Identity of a reusable connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ConnectionKey {
    scheme: Scheme,
    host: String,
    port: u16,
    /// The proxy hop, present only for CONNECT tunnels.
    tunnel: Option<(String, u16)>,
}

impl ConnectionKey {
    /// Derives the key for a target, given the configured proxy (if any).
    ///
    /// Plain HTTP through a proxy connects to the proxy itself; HTTPS through
    /// a proxy tunnels to the origin and keeps the proxy in the key so the
    /// tunnel is never reused for another origin.
    pub(crate) fn for_target(target: &Target, proxy: Option<&ProxyConfig>) -> Self {
        match proxy {
            Some(proxy) if target.scheme.is_tls() => Self {
                scheme: target.scheme,
                host: target.host.clone(),
                port: target.port,
                tunnel: Some((proxy.host.clone(), proxy.port)),
            },
            Some(proxy) => Self {
                scheme: Scheme::Http,
                host: proxy.host.clone(),
                port: proxy.port,
                tunnel: None,
            },
            None => Self {
                scheme: target.scheme,
                host: target.host.clone(),
                port: target.port,
                tunnel: None,
            },
        }
    }

    fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A pooled byte stream, plain or TLS.
#[derive(Debug)]
pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A checked-out connection. Exactly one caller owns it at a time.
#[derive(Debug)]
pub(crate) struct Connection {
    /// Buffered stream; the read buffer survives across exchanges so
    /// keep-alive responses are never truncated.
    pub stream: BufReader<Stream>,
    key: ConnectionKey,
}

struct IdleEntry {
    conn: Connection,
    since: Instant,
}

/// Pool of idle keep-alive connections, grouped by [`ConnectionKey`].
pub(crate) struct ConnectionPool {
    idle: Mutex<HashMap<ConnectionKey, Vec<IdleEntry>>>,
    idle_timeout: Duration,
    tls: TlsConnector,
}

impl ConnectionPool {
    pub(crate) fn new(idle_timeout: Duration) -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            idle: Mutex::new(HashMap::new()),
            idle_timeout,
            tls: TlsConnector::from(Arc::new(config)),
        }
    }

    /// Hands out a connection for the key: an unexpired idle one when
    /// available, otherwise a freshly opened one.
    ///
    /// The boolean is true when the connection was reused, which callers need
    /// to distinguish stale-reuse failures from genuine network failures.
    pub(crate) async fn acquire(
        &self,
        key: &ConnectionKey,
    ) -> Result<(Connection, bool), TransportErrorKind> {
        if let Some(conn) = self.pop_idle(key) {
            debug!(authority = %key.authority(), "reusing pooled connection");
            return Ok((conn, true));
        }
        Ok((self.open(key).await?, false))
    }

    /// Opens a new connection unconditionally, bypassing the idle set.
    pub(crate) async fn open_fresh(
        &self,
        key: &ConnectionKey,
    ) -> Result<Connection, TransportErrorKind> {
        self.open(key).await
    }

    /// Returns a connection to the idle set, or drops it when the exchange
    /// left the stream unusable.
    pub(crate) fn release(&self, conn: Connection, still_usable: bool) {
        if !still_usable {
            return;
        }
        let key = conn.key.clone();
        #[allow(clippy::unwrap_used)] // lock poisoning is unrecoverable here
        self.idle
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push(IdleEntry {
                conn,
                since: Instant::now(),
            });
    }

    /// Removes one unexpired idle entry under the lock. Expired entries
    /// encountered along the way are discarded.
    fn pop_idle(&self, key: &ConnectionKey) -> Option<Connection> {
        #[allow(clippy::unwrap_used)] // lock poisoning is unrecoverable here
        let mut idle = self.idle.lock().unwrap();
        let entries = idle.get_mut(key)?;
        while let Some(entry) = entries.pop() {
            if entry.since.elapsed() <= self.idle_timeout {
                return Some(entry.conn);
            }
            debug!(authority = %key.authority(), "discarding expired idle connection");
        }
        None
    }

    async fn open(&self, key: &ConnectionKey) -> Result<Connection, TransportErrorKind> {
        // The TCP endpoint is the proxy for tunnels, the key host otherwise.
        let (tcp_host, tcp_port) = match &key.tunnel {
            Some((proxy_host, proxy_port)) => (proxy_host.as_str(), *proxy_port),
            None => (key.host.as_str(), key.port),
        };

        let mut addrs = tokio::net::lookup_host((tcp_host, tcp_port))
            .await
            .map_err(|_| TransportErrorKind::DnsFailure {
                host: tcp_host.to_string(),
            })?;
        let addr = addrs.next().ok_or_else(|| TransportErrorKind::DnsFailure {
            host: tcp_host.to_string(),
        })?;

        let url = format!("{}://{}", key.scheme.as_str(), key.authority());
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportErrorKind::from_io(&e, &url, tcp_host, tcp_port))?;
        let _ = tcp.set_nodelay(true);

        let mut stream = BufReader::new(Stream::Plain(tcp));
        if key.tunnel.is_some() {
            self.establish_tunnel(&mut stream, key, &url).await?;
        }

        if key.scheme.is_tls() {
            stream = self.upgrade_tls(stream, key).await?;
        }

        debug!(authority = %key.authority(), tunneled = key.tunnel.is_some(), "opened connection");
        Ok(Connection {
            stream,
            key: key.clone(),
        })
    }

    /// Performs the CONNECT handshake with the proxy on a fresh stream.
    async fn establish_tunnel(
        &self,
        stream: &mut BufReader<Stream>,
        key: &ConnectionKey,
        url: &str,
    ) -> Result<(), TransportErrorKind> {
        let authority = key.authority();
        let connect = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
        stream
            .write_all(connect.as_bytes())
            .await
            .map_err(|e| TransportErrorKind::from_io(&e, url, &key.host, key.port))?;
        stream
            .flush()
            .await
            .map_err(|e| TransportErrorKind::from_io(&e, url, &key.host, key.port))?;

        let reply = wire::read_response(stream, url, true, 0).await?;
        if !(200..300).contains(&reply.status) {
            return Err(TransportErrorKind::ProxyConnect {
                target: authority,
                status: reply.status,
            });
        }
        Ok(())
    }

    /// Runs the TLS handshake over the stream, direct or through a tunnel.
    async fn upgrade_tls(
        &self,
        stream: BufReader<Stream>,
        key: &ConnectionKey,
    ) -> Result<BufReader<Stream>, TransportErrorKind> {
        let server_name =
            ServerName::try_from(key.host.clone()).map_err(|e| TransportErrorKind::TlsFailure {
                host: key.host.clone(),
                reason: e.to_string(),
            })?;

        // The handshake consumes the raw TcpStream; a tunnel's read buffer is
        // empty at this point (the CONNECT reply has no body).
        let tcp = match stream.into_inner() {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(_) => {
                return Err(TransportErrorKind::TlsFailure {
                    host: key.host.clone(),
                    reason: "stream already encrypted".to_string(),
                });
            }
        };

        let tls = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportErrorKind::TlsFailure {
                host: key.host.clone(),
                reason: e.to_string(),
            })?;
        Ok(BufReader::new(Stream::Tls(Box::new(tls))))
    }
}
