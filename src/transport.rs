//! # Transport Module
//!
//! HTTP Transport Adapter: builds the per-request POST exchange over a
//! socket that escapes the host VPN via an injected [`ProtectSocket`] hook
//! and a hostname that escapes it via an injected [`DnsResolve`] hook,
//! with TLS for FRONTED mode and plaintext for UNFRONTED mode.
//!
//! A meek session already serializes its own requests end to end, so
//! there is nothing to gain from a pooling HTTP client here: each
//! exchange dials, optionally does a TLS handshake, sends one POST, reads
//! one response, and tears the connection down. This uses
//! `hyper::client::conn::http1` directly rather than a full client stack.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::{MeekError, MeekResult};

/// Host collaborator: marks a socket as exempt from the VPN route before
/// it connects.
pub trait ProtectSocket: Send + Sync {
    /// Returns `false` to refuse the connection outright.
    fn protect(&self, socket: &Socket) -> bool;
}

/// Host collaborator: resolves a hostname outside the tunnel.
pub trait DnsResolve: Send + Sync {
    fn resolve(&self, host: &str) -> MeekResult<Vec<IpAddr>>;
}

/// No-op protect hook for hosts that are not routed through a VPN
/// (desktop/server deployments, tests).
pub struct NoopProtectSocket;

impl ProtectSocket for NoopProtectSocket {
    fn protect(&self, _socket: &Socket) -> bool {
        true
    }
}

/// DNS resolver backed by the system resolver via the standard library.
pub struct SystemDnsResolve;

impl DnsResolve for SystemDnsResolve {
    fn resolve(&self, host: &str) -> MeekResult<Vec<IpAddr>> {
        use std::net::ToSocketAddrs;
        // Port is irrelevant for resolution; 0 is a standard placeholder.
        let addrs = (host, 0u16)
            .to_socket_addrs()
            .map_err(|e| MeekError::Dns(format!("{host}: {e}")))?
            .map(|sa| sa.ip())
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(MeekError::Dns(format!("{host}: no addresses returned")));
        }
        Ok(addrs)
    }
}

/// Everything the transport adapter needs to dial and authenticate one
/// session's requests. Built once per `MeekClient`, shared across all of
/// its Session Loops.
pub struct HttpTransport {
    protect: Arc<dyn ProtectSocket>,
    resolver: Arc<dyn DnsResolve>,
    tls_connector: TlsConnector,
}

impl HttpTransport {
    pub fn new(protect: Arc<dyn ProtectSocket>, resolver: Arc<dyn DnsResolve>) -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        Self {
            protect,
            resolver,
            tls_connector: TlsConnector::from(Arc::new(tls_config)),
        }
    }

    /// Dials `host:port`, routing the connect through the injected
    /// `ProtectSocket` hook and resolving `host` through the injected
    /// `DnsResolve` hook.
    async fn connect_tcp(&self, host: &str, port: u16) -> MeekResult<TcpStream> {
        let addrs = self.resolver.resolve(host)?;
        let mut last_err: Option<MeekError> = None;
        for ip in addrs {
            let addr = SocketAddr::new(ip, port);
            match connect_protected(addr, self.protect.as_ref()).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| MeekError::Dns(format!("{host}: no usable address"))))
    }

    /// Performs one POST exchange and returns the response body.
    ///
    /// `sni_host` is the TLS SNI / dial target (FRONTED: `frontingDomain`;
    /// UNFRONTED: the relay host); `header_host`, if set, overrides the
    /// `Host` header only (FRONTED: `frontingHost`).
    pub async fn post(
        &self,
        sni_host: &str,
        port: u16,
        use_tls: bool,
        header_host: Option<&str>,
        path: &str,
        cookie: &str,
        body: Vec<u8>,
    ) -> MeekResult<Vec<u8>> {
        let tcp = self.connect_tcp(sni_host, port).await?;

        // HTTP/1.1 requires a Host header on every request. Fronted mode
        // overrides it with the real relay's name; otherwise it reflects
        // the dial target itself, matching what the URL's host component
        // would imply.
        let host_header = header_host
            .map(str::to_string)
            .unwrap_or_else(|| format!("{sni_host}:{port}"));
        let builder = Request::post(path)
            .header("Content-Type", "application/octet-stream")
            .header("Cookie", cookie)
            .header(http::header::HOST, host_header);
        let request = builder
            .body(Full::new(Bytes::from(body)))
            .expect("request parts are all valid ASCII header values");

        if use_tls {
            let server_name = ServerName::try_from(sni_host.to_string())
                .map_err(|e| MeekError::Transport(format!("invalid SNI host: {e}")))?;
            let tls_stream = self
                .tls_connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| MeekError::Transport(format!("TLS handshake failed: {e}")))?;
            send_one(tls_stream, request).await
        } else {
            send_one(tcp, request).await
        }
    }
}

async fn send_one<IO>(io: IO, request: Request<Full<Bytes>>) -> MeekResult<Vec<u8>>
where
    IO: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let io = TokioIo::new(io);
    let (mut sender, connection) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| MeekError::Transport(format!("http handshake failed: {e}")))?;

    // The connection driver must run concurrently with `send_request`;
    // it exits on its own once the response body is fully consumed and
    // the connection is dropped, so we don't join it.
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::debug!("[transport.debug] connection driver ended: {e}");
        }
    });

    let response: Response<Incoming> = sender
        .send_request(request)
        .await
        .map_err(|e| MeekError::Transport(format!("request failed: {e}")))?;

    let status = response.status();
    if status.as_u16() != 200 {
        return Err(MeekError::BadStatus(status.as_u16()));
    }

    let collected = response
        .into_body()
        .collect()
        .await
        .map_err(|e| MeekError::Transport(format!("reading response body failed: {e}")))?;
    Ok(collected.to_bytes().to_vec())
}

async fn connect_protected(addr: SocketAddr, protect: &dyn ProtectSocket) -> MeekResult<TcpStream> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket =
        Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(MeekError::LocalIo)?;
    socket.set_nonblocking(true).map_err(MeekError::LocalIo)?;

    if !protect.protect(&socket) {
        return Err(MeekError::ProtectRejected);
    }

    connect_and_wait(socket, addr).await.map_err(MeekError::LocalIo)
}

async fn connect_and_wait(socket: Socket, addr: SocketAddr) -> io::Result<TcpStream> {
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e),
    }

    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from_std(std_stream)?;
    stream.writable().await?;
    if let Some(err) = stream.take_error()? {
        return Err(err);
    }
    Ok(stream)
}

/// Connect timeout applied around [`HttpTransport::connect_tcp`] by the
/// session loop via `tokio::time::timeout`.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> MeekResult<T>
where
    F: std::future::Future<Output = MeekResult<T>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| MeekError::Transport("request timed out".into()))?
}
