//! TCP listener feeding accepted sockets into a [`Socks5Server`]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};

use super::registry::Socks5Server;
use crate::config::ServerConfig;
use crate::error::Result;

/// Listener statistics
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections rejected due to limit
    pub connections_rejected: AtomicU64,
}

/// TCP listener for SOCKS5 clients
pub struct Listener {
    listener: TcpListener,
    server: Socks5Server,
    stats: Arc<ListenerStats>,
    shutdown_rx: broadcast::Receiver<()>,
    /// Connection limit semaphore (None = unlimited)
    connection_semaphore: Option<Arc<Semaphore>>,
    max_connections: usize,
    nodelay: bool,
}

impl Listener {
    /// Bind to the configured address.
    pub async fn bind(
        config: &ServerConfig,
        server: Socks5Server,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", config.listen_address, config.listen_port);
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;

        // 0 = unlimited
        let connection_semaphore = if config.max_connections > 0 {
            info!(
                "Listening on {} (max {} connections)",
                local, config.max_connections
            );
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            info!("Listening on {} (unlimited connections)", local);
            None
        };

        Ok(Self {
            listener,
            server,
            stats: Arc::new(ListenerStats::default()),
            shutdown_rx,
            connection_semaphore,
            max_connections: config.max_connections,
            nodelay: config.nodelay,
        })
    }

    /// Get listener statistics
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Get the local address the listener is bound to.
    ///
    /// This is useful when binding to port 0 to get an OS-assigned port.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until a shutdown signal arrives.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let permit = if let Some(ref semaphore) = self.connection_semaphore {
                                match semaphore.clone().try_acquire_owned() {
                                    Ok(permit) => Some(permit),
                                    Err(_) => {
                                        warn!(
                                            "Connection from {} rejected: max connections ({}) reached",
                                            addr,
                                            self.max_connections
                                        );
                                        self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                        drop(stream);
                                        continue;
                                    }
                                }
                            } else {
                                None
                            };

                            if self.nodelay {
                                if let Err(e) = stream.set_nodelay(true) {
                                    trace!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                                }
                            }

                            debug!("Accepted connection from {}", addr);
                            self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let server = self.server.clone();
                            let stats = Arc::clone(&self.stats);
                            tokio::spawn(async move {
                                // Hold permit for connection lifetime
                                let _permit = permit;
                                // Internal errors are already logged by the server
                                let _ = server.handle_stream(stream, Some(addr)).await;
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                debug!("Connection from {} closed", addr);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        info!(
            "Listener stopped. Total: {}, Active: {}, Rejected: {}",
            self.stats.connections_accepted.load(Ordering::Relaxed),
            self.stats.connections_active.load(Ordering::Relaxed),
            self.stats.connections_rejected.load(Ordering::Relaxed)
        );

        Ok(())
    }
}
