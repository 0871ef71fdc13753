//! Top-level `MeekClient` and Lifecycle Controller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::acceptor::{self, LiveClients};
use crate::config::MeekConfig;
use crate::error::{MeekError, MeekResult};
use crate::logging::{SharedEventLog, TracingEventLog};
use crate::transport::{DnsResolve, HttpTransport, NoopProtectSocket, ProtectSocket, SystemDnsResolve};

/// Everything about a running client that changes after construction,
/// guarded by one mutex.
#[derive(Default)]
struct LifecycleState {
    local_port: Option<u16>,
    acceptor_handle: Option<JoinHandle<()>>,
    live_clients: Option<LiveClients>,
}

/// Client-side meek transport: accepts local TCP connections and tunnels
/// each one through repeated HTTP(S) POST exchanges to a relay.
///
/// Construction parameters (`MeekConfig`) are immutable for the client's
/// lifetime; `start`/`stop` may be called repeatedly and are idempotent.
pub struct MeekClient {
    config: Arc<MeekConfig>,
    protect: Arc<dyn ProtectSocket>,
    resolver: Arc<dyn DnsResolve>,
    log: SharedEventLog,
    state: AsyncMutex<LifecycleState>,
}

impl MeekClient {
    /// Builds a client with the default host collaborators: no VPN
    /// protect hook and the system DNS resolver. Use [`MeekClient::with_hooks`]
    /// to supply platform-specific collaborators.
    pub fn new(config: MeekConfig) -> MeekResult<Self> {
        Self::with_hooks(
            config,
            Arc::new(NoopProtectSocket),
            Arc::new(SystemDnsResolve),
            Arc::new(TracingEventLog),
        )
    }

    pub fn with_hooks(
        config: MeekConfig,
        protect: Arc<dyn ProtectSocket>,
        resolver: Arc<dyn DnsResolve>,
        log: SharedEventLog,
    ) -> MeekResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            protect,
            resolver,
            log,
            state: AsyncMutex::new(LifecycleState::default()),
        })
    }

    /// Starts accepting local connections, binding an ephemeral loopback
    /// port. Idempotent: a client that is already running is stopped and
    /// restarted rather than erroring.
    pub async fn start(&self) -> MeekResult<u16> {
        self.stop().await;

        let (listener, port) = acceptor::bind().await?;
        self.run_acceptor(listener, port).await;
        Ok(port)
    }

    async fn run_acceptor(&self, listener: TcpListener, port: u16) {
        let transport = Arc::new(HttpTransport::new(
            Arc::clone(&self.protect),
            Arc::clone(&self.resolver),
        ));
        let live_clients: LiveClients = Arc::new(StdMutex::new(HashMap::new()));

        let config = Arc::clone(&self.config);
        let log = Arc::clone(&self.log);
        let live_clients_for_loop = Arc::clone(&live_clients);
        let handle = tokio::spawn(async move {
            acceptor::run(listener, config, transport, live_clients_for_loop, log).await;
        });

        let mut state = self.state.lock().await;
        state.local_port = Some(port);
        state.acceptor_handle = Some(handle);
        state.live_clients = Some(live_clients);
    }

    /// Stops accepting new connections and force-closes every live client
    /// socket without waiting for its Session Loop to unwind. A no-op when
    /// the client isn't running.
    ///
    /// Order matters: the acceptor is aborted and joined *before* the live
    /// clients are drained and closed. Doing it the other way around would
    /// leave a window where the still-running acceptor can accept and
    /// register a brand new connection after the drain, orphaning a
    /// Session Loop that this call was supposed to have torn down.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;

        if let Some(handle) = state.acceptor_handle.take() {
            // `abort()` only requests cancellation; awaiting the handle
            // afterwards is what actually joins the task.
            handle.abort();
            let _ = handle.await;
        }
        if let Some(live_clients) = state.live_clients.take() {
            acceptor::force_close_all(&live_clients);
        }
        state.local_port = None;
    }

    /// The bound local port, or `-1` if the client is stopped, matching
    /// the Android `meek` transport's convention for "not running".
    pub async fn local_port(&self) -> i32 {
        self.state
            .lock()
            .await
            .local_port
            .map(i32::from)
            .unwrap_or(-1)
    }

    /// Errors out instead of idempotently restarting; exposed for callers
    /// that want `AlreadyRunning` surfaced rather than silently handled.
    pub async fn start_strict(&self) -> MeekResult<u16> {
        if self.local_port().await != -1 {
            return Err(MeekError::AlreadyRunning);
        }
        self.start().await
    }
}
