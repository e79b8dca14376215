// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP server: accepts connections and bounds their collective lifetime.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::connection::Connection;
use crate::handler::IntentHandler;

/// Errors that can occur while starting the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listening socket failed.
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),
}

/// Configuration for the intent log server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum pending accepts on the listening socket
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:1337".parse().unwrap(),
            backlog: 100,
        }
    }
}

impl ServerConfig {
    /// Create a configuration from environment variables with defaults.
    ///
    /// Environment variables:
    /// - `INTENTLOG_BIND_ADDR`: Bind address (default: 0.0.0.0)
    /// - `INTENTLOG_PORT`: Listening port (default: 1337)
    /// - `INTENTLOG_BACKLOG`: Listen backlog (default: 100)
    pub fn from_env() -> Self {
        let default = Self::default();

        let bind_ip = std::env::var("INTENTLOG_BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| default.bind_addr.ip());
        let port = std::env::var("INTENTLOG_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| default.bind_addr.port());

        Self {
            bind_addr: SocketAddr::new(bind_ip, port),
            backlog: std::env::var("INTENTLOG_BACKLOG")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.backlog),
        }
    }
}

/// The intent log server.
///
/// Accepts connections on the configured endpoint, tracks them for graceful
/// shutdown, and owns the lifetime of everything beneath it. An accept
/// failure is fail-stop: it cancels the whole server rather than silently
/// refusing new connections.
pub struct Server {
    cancel: CancellationToken,
    accept_loop: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the listening socket and start accepting connections.
    ///
    /// `shutdown` is the externally supplied cancellation signal; the server
    /// derives its own child token so [`Server::stop`] and external
    /// cancellation both end the accept loop. Must be called from within a
    /// tokio runtime.
    pub fn bind(
        handler: Arc<dyn IntentHandler>,
        config: ServerConfig,
        shutdown: &CancellationToken,
    ) -> Result<Self, ServerError> {
        let domain = if config.bind_addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&config.bind_addr.into())?;
        socket.listen(config.backlog as i32)?;

        let listener = TcpListener::from_std(socket.into())?;
        let local_addr = listener.local_addr()?;
        let cancel = shutdown.child_token();

        info!(addr = %local_addr, backlog = config.backlog, "server listening");

        let accept_loop = tokio::spawn(accept_loop(listener, handler, cancel.clone()));

        Ok(Self {
            cancel,
            accept_loop,
            local_addr,
        })
    }

    /// The address the listening socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Request a shutdown. Idempotent; returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop accepting, close every live connection (each performing its own
    /// recovery), and release the listening socket.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(error) = self.accept_loop.await {
            error!(%error, "server accept loop failed");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn IntentHandler>,
    cancel: CancellationToken,
) {
    let connections: Arc<Mutex<HashMap<u64, Connection>>> = Arc::default();
    let mut next_id: u64 = 0;

    loop {
        let (stream, remote_addr) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    // Fail-stop: an accept failure must not leave the server
                    // silently refusing connections.
                    error!(%error, "failed to accept connection, shutting down");
                    cancel.cancel();
                    break;
                }
            },
        };

        debug!(%remote_addr, "accepted connection");

        let id = next_id;
        next_id += 1;

        let on_close = {
            let connections = connections.clone();
            move || {
                connections
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&id);
            }
        };

        let connection = Connection::spawn(stream, handler.clone(), on_close, &cancel);
        connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, connection);
    }

    // Close all live connections concurrently; each runs its own recovery.
    let remaining: Vec<Connection> = connections
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .drain()
        .map(|(_, connection)| connection)
        .collect();

    let mut closing = JoinSet::new();
    for connection in remaining {
        closing.spawn(connection.shutdown());
    }
    while let Some(result) = closing.join_next().await {
        if let Err(error) = result {
            error!(%error, "error while closing connection");
        }
    }

    info!("server stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:1337".parse().unwrap());
        assert_eq!(config.backlog, 100);
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("INTENTLOG_BIND_ADDR");
        guard.remove("INTENTLOG_PORT");
        guard.remove("INTENTLOG_BACKLOG");

        let config = ServerConfig::from_env();
        assert_eq!(config.bind_addr.port(), 1337);
        assert_eq!(config.backlog, 100);
    }

    #[test]
    fn test_config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("INTENTLOG_BIND_ADDR", "127.0.0.1");
        guard.set("INTENTLOG_PORT", "9999");
        guard.set("INTENTLOG_BACKLOG", "10");

        let config = ServerConfig::from_env();
        assert_eq!(config.bind_addr, "127.0.0.1:9999".parse().unwrap());
        assert_eq!(config.backlog, 10);
    }

    #[test]
    fn test_config_from_env_invalid_values_fall_back() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("INTENTLOG_BIND_ADDR", "not-an-ip");
        guard.set("INTENTLOG_PORT", "not-a-port");
        guard.set("INTENTLOG_BACKLOG", "-3");

        let config = ServerConfig::from_env();
        assert_eq!(config.bind_addr, "0.0.0.0:1337".parse().unwrap());
        assert_eq!(config.backlog, 100);
    }
}
