//! TCP listener and per-connection dispatch.
//!
//! The accept loop evaluates the IP allow-list and hands admitted connections
//! to their own task. Everything after that runs inside the task:
//!
//! 1. one bounded read to classify the stream
//! 2. ClientHello SNI or HTTP Host extraction
//! 3. domain allow-list check
//! 4. backend selection and dial
//! 5. relay, starting with every byte consumed so far
//!
//! No backend is dialed until both access checks pass.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tlsmux_networking::IpAllowList;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn, Instrument};

use super::domain::DomainPolicy;
use super::http::read_http_host;
use super::relay::{relay, DuplexStream, RelayStats};
use super::sni::read_client_hello;
use super::sniff::{sniff, ProtocolKind};
use super::target::{select_target, BackendTarget};
use crate::config::Config;
use crate::error::ConnectionError;

/// Back-off after a failed `accept`.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Count of connections that passed the IP check and have not torn down yet.
#[derive(Debug, Default)]
pub struct ActiveConnections {
    count: AtomicU64,
}

impl ActiveConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. The count drops again when the guard does.
    pub fn enter(self: &Arc<Self>) -> ConnectionGuard {
        self.count.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            active: Arc::clone(self),
        }
    }

    /// Current number of live connections.
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Keeps one connection counted in [`ActiveConnections`].
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<ActiveConnections>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Accept-time facts about a connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    pub peer_addr: SocketAddr,
    pub accepted_at: Instant,
}

impl ConnectionInfo {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            accepted_at: Instant::now(),
        }
    }
}

/// Immutable per-process policy plus the shared connection counter.
#[derive(Debug)]
pub struct Dispatcher {
    allow_list: IpAllowList,
    domains: DomainPolicy,
    backends: Vec<BackendTarget>,
    connect_timeout: Option<Duration>,
    active: Arc<ActiveConnections>,
}

impl Dispatcher {
    pub fn new(config: &Config) -> Self {
        Self {
            allow_list: config.allow_list.clone(),
            domains: config.domains.clone(),
            backends: config.backends.clone(),
            connect_timeout: config.connect_timeout,
            active: Arc::new(ActiveConnections::new()),
        }
    }

    /// Shared connection counter.
    pub fn active_connections(&self) -> &Arc<ActiveConnections> {
        &self.active
    }

    /// Apply the IP allow-list. A passing peer is counted until the guard drops.
    pub fn admit(&self, peer: SocketAddr) -> Option<ConnectionGuard> {
        if self.allow_list.allows(peer.ip()) {
            Some(self.active.enter())
        } else {
            None
        }
    }

    /// Run one admitted connection to completion.
    pub async fn dispatch<S: DuplexStream>(
        &self,
        stream: S,
        conn_info: ConnectionInfo,
        guard: ConnectionGuard,
    ) -> Result<RelayStats, ConnectionError> {
        let result = self.route(stream, &conn_info).await;
        drop(guard);

        let lifetime_ms = conn_info.accepted_at.elapsed().as_millis() as u64;
        match &result {
            Ok(stats) => info!(
                bytes_to_backend = stats.bytes_to_backend,
                bytes_from_backend = stats.bytes_from_backend,
                lifetime_ms,
                active = self.active.get(),
                "Connection closed"
            ),
            Err(e @ ConnectionError::AccessDenied(_)) => info!(
                reason = e.reason_code(),
                error = %e,
                lifetime_ms,
                active = self.active.get(),
                "Connection denied"
            ),
            Err(e @ (ConnectionError::EmptyRead | ConnectionError::Read(_))) => debug!(
                reason = e.reason_code(),
                error = %e,
                lifetime_ms,
                active = self.active.get(),
                "Connection dropped"
            ),
            Err(e) => warn!(
                reason = e.reason_code(),
                error = %e,
                lifetime_ms,
                active = self.active.get(),
                "Connection failed"
            ),
        }

        result
    }

    async fn route<S: DuplexStream>(
        &self,
        mut stream: S,
        conn_info: &ConnectionInfo,
    ) -> Result<RelayStats, ConnectionError> {
        let sniffed = sniff(&mut stream).await?;
        let kind = sniffed.kind;

        let (hostname, consumed) = match kind {
            ProtocolKind::Tls => {
                let hello = read_client_hello(&mut stream, sniffed.bytes).await?;
                (hello.server_name, hello.bytes)
            }
            ProtocolKind::Plaintext => {
                let head = read_http_host(&mut stream, sniffed.bytes).await?;
                (head.host, head.bytes)
            }
        };
        debug!(
            protocol = %kind,
            hostname = hostname.as_deref().unwrap_or(""),
            consumed = consumed.len(),
            "Routing key extracted"
        );

        if !self.domains.allows(hostname.as_deref()) {
            return Err(ConnectionError::AccessDenied(match hostname {
                Some(name) => format!("domain {:?} not allowed", name),
                None => "no routing key".to_string(),
            }));
        }

        let target = select_target(kind, &self.backends, self.domains.routing_mode())?;
        let backend = self.dial(target).await?;
        debug!(
            peer_addr = %conn_info.peer_addr,
            backend = %target,
            protocol = %kind,
            "Connected to backend"
        );

        relay(stream, backend, &consumed).await
    }

    async fn dial(&self, target: &BackendTarget) -> Result<TcpStream, ConnectionError> {
        let connect = TcpStream::connect(target.as_str());
        let result = match self.connect_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, connect).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
            },
            None => connect.await,
        };

        let stream = result.map_err(|source| ConnectionError::Dial {
            target: target.to_string(),
            source,
        })?;
        // Relay chunks are forwarded as-is.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(backend = %target, error = %e, "Failed to set TCP_NODELAY on backend");
        }
        Ok(stream)
    }
}

/// The relay's TCP listener.
pub struct Listener {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl Listener {
    /// Bind the listen address from `config`.
    pub async fn bind(config: &Config) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr.as_str()).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            backends = config.backends.len(),
            cidr = %config.allow_list,
            domains = %config.domains,
            "Listener bound"
        );

        Ok(Self {
            listener,
            dispatcher: Arc::new(Dispatcher::new(config)),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared connection counter.
    pub fn active_connections(&self) -> Arc<ActiveConnections> {
        Arc::clone(self.dispatcher.active_connections())
    }

    /// Run the accept loop. Only returns if the listener itself goes away.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let Some(guard) = self.dispatcher.admit(peer_addr) else {
                        info!(peer_addr = %peer_addr, "Peer denied by IP allow-list");
                        drop(stream);
                        continue;
                    };

                    let active = self.dispatcher.active_connections().get();
                    info!(peer_addr = %peer_addr, active, "Connection accepted");

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let conn_info = ConnectionInfo::new(peer_addr);
                    tokio::spawn(
                        async move {
                            // Outcome already logged by the dispatcher.
                            let _ = dispatcher.dispatch(stream, conn_info, guard).await;
                        }
                        .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
}
