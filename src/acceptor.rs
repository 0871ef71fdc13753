//! Acceptor: a loopback-only listener that spawns one independent Session
//! Loop task per accepted connection.

use std::collections::HashMap;
use std::net::Shutdown;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::{TcpListener, TcpStream};

use crate::config::MeekConfig;
use crate::error::MeekResult;
use crate::logging::{EventLog, Sensitivity};
use crate::transport::HttpTransport;

/// Accept backlog for the loopback listener.
const ACCEPT_BACKLOG: u32 = 50;

/// A std-socket handle kept alongside each live client purely so the
/// Lifecycle Controller can force-close it from outside the Session Loop
/// that owns the corresponding `tokio::net::TcpStream`.
pub type LiveClients = Arc<StdMutex<HashMap<u64, std::net::TcpStream>>>;

/// Binds `127.0.0.1:0`, returning the bound listener and the port the OS
/// assigned. Backlog is fixed at [`ACCEPT_BACKLOG`]; callers needing a
/// different bind address are out of this crate's scope.
pub async fn bind() -> MeekResult<(TcpListener, u16)> {
    // `TcpListener::bind` on a `SocketAddr` uses a platform-default
    // backlog; std's `TcpBuilder`-style backlog control isn't exposed by
    // tokio, so we bind via `socket2` to get an explicit accept queue
    // depth instead.
    use socket2::{Domain, Socket, Type};
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().expect("valid loopback address");
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(crate::error::MeekError::LocalIo)?;
    socket.set_nonblocking(true).map_err(crate::error::MeekError::LocalIo)?;
    socket.bind(&addr.into()).map_err(crate::error::MeekError::LocalIo)?;
    socket
        .listen(ACCEPT_BACKLOG as i32)
        .map_err(crate::error::MeekError::LocalIo)?;
    let std_listener: std::net::TcpListener = socket.into();
    let listener = TcpListener::from_std(std_listener).map_err(crate::error::MeekError::LocalIo)?;
    let port = listener
        .local_addr()
        .map_err(crate::error::MeekError::LocalIo)?
        .port();
    Ok((listener, port))
}

/// Runs the accept loop until `listener` is closed externally (the normal
/// shutdown path: the Lifecycle Controller drops the listener to stop
/// accepting new connections). A closed listener surfaces as an `Err` from
/// `accept()` that we treat as termination rather than a fault — there is
/// no way to distinguish "closed on purpose" from other OS-level accept
/// errors short of platform-specific error codes, so any accept error ends
/// the loop.
pub async fn run(
    listener: TcpListener,
    config: Arc<MeekConfig>,
    transport: Arc<HttpTransport>,
    live_clients: LiveClients,
    log: Arc<dyn EventLog>,
) {
    let next_id = AtomicU64::new(0);
    loop {
        let (stream, _peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log.log(
                    "acceptor.stopped",
                    Sensitivity::NotSensitive,
                    &format!("accept loop ending: {e}"),
                );
                break;
            }
        };

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let (session_stream, close_handle) = match split_for_force_close(stream) {
            Ok(pair) => pair,
            Err(e) => {
                log.log("acceptor.warn", Sensitivity::NotSensitive, &e);
                continue;
            }
        };

        live_clients.lock().unwrap().insert(id, close_handle);

        let config = Arc::clone(&config);
        let transport = Arc::clone(&transport);
        let log = Arc::clone(&log);
        let live_clients = Arc::clone(&live_clients);
        tokio::spawn(async move {
            crate::session::run(config, transport, session_stream, log).await;
            live_clients.lock().unwrap().remove(&id);
        });
    }
}

/// Converts an accepted `tokio::net::TcpStream` into a pair: the stream
/// itself (handed to the Session Loop) and a cloned std socket that shares
/// the same underlying file description, so shutting it down from the
/// Lifecycle Controller unblocks the Session Loop's in-flight read/write.
fn split_for_force_close(
    stream: TcpStream,
) -> MeekResult<(TcpStream, std::net::TcpStream)> {
    let std_stream = stream.into_std().map_err(crate::error::MeekError::LocalIo)?;
    let close_handle = std_stream.try_clone().map_err(crate::error::MeekError::LocalIo)?;
    let stream = TcpStream::from_std(std_stream).map_err(crate::error::MeekError::LocalIo)?;
    Ok((stream, close_handle))
}

/// Forces every currently-registered client socket closed without waiting
/// for its Session Loop to notice.
pub fn force_close_all(live_clients: &LiveClients) {
    let mut guard = live_clients.lock().unwrap();
    for (_, handle) in guard.drain() {
        let _ = handle.shutdown(Shutdown::Both);
    }
}
