//! Listener, per-connection tasks and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::ConnectionHandler;
use crate::markdown::RenderAdapter;
use crate::session::SessionContext;

/// How the server stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReport {
    /// Every connection finished within the shutdown timeout.
    Graceful,
    /// The timeout elapsed and `closed` connections were aborted.
    Forced { closed: usize },
}

pub struct Server {
    config: ServerConfig,
    ssh: Arc<russh::server::Config>,
    adapter: Arc<RenderAdapter>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        ssh: Arc<russh::server::Config>,
        adapter: Arc<RenderAdapter>,
    ) -> Self {
        Self {
            config,
            ssh,
            adapter,
        }
    }

    /// Load the host key and the rendering assets.
    pub fn load(config: ServerConfig) -> Result<Self, ServerError> {
        let key = russh_keys::load_secret_key(&config.host_key, None).map_err(|err| {
            ServerError::HostKey {
                path: config.host_key.clone(),
                message: err.to_string(),
            }
        })?;
        let ssh = russh::server::Config {
            keys: vec![key],
            ..Default::default()
        };
        let adapter = RenderAdapter::new(config.style);
        Ok(Self::new(config, Arc::new(ssh), Arc::new(adapter)))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.listen_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Accept connections until the shutdown flag is set, then give open
    /// connections the configured timeout before aborting them.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ShutdownReport, ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening");
        }
        let mut connections = JoinSet::new();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let context = self.session_context(shutdown.clone());
                        connections.spawn(serve_connection(self.ssh.clone(), stream, peer, context));
                    }
                    Err(err) => warn!("accept failed: {err}"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        info!(open = connections.len(), "shutting down, no longer accepting connections");
        Ok(drain(connections, self.config.shutdown_timeout).await)
    }

    fn session_context(&self, shutdown: watch::Receiver<bool>) -> SessionContext {
        SessionContext {
            content: self.config.content.clone(),
            adapter: self.adapter.clone(),
            view: self.config.view,
            shutdown,
        }
    }
}

async fn drain(mut connections: JoinSet<()>, timeout: Duration) -> ShutdownReport {
    let finished = tokio::time::timeout(timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    match finished {
        Ok(()) => {
            info!("all connections closed");
            ShutdownReport::Graceful
        }
        Err(_) => {
            let closed = connections.len();
            warn!(
                closed,
                "connections still open after {timeout:?}, closing them"
            );
            connections.shutdown().await;
            ShutdownReport::Forced { closed }
        }
    }
}

async fn serve_connection(
    ssh: Arc<russh::server::Config>,
    stream: TcpStream,
    peer: SocketAddr,
    context: SessionContext,
) {
    let started = Instant::now();
    debug!(%peer, "connection accepted");

    let handler = ConnectionHandler::new(peer, context);
    let result = match russh::server::run_stream(ssh, stream, handler).await {
        Ok(session) => session.await,
        Err(err) => Err(err),
    };

    let elapsed = started.elapsed();
    match result {
        Ok(()) | Err(ServerError::Ssh(russh::Error::Disconnect)) => {
            info!(%peer, ?elapsed, "disconnected");
        }
        Err(err) => {
            let err = ServerError::Connection {
                peer,
                message: err.to_string(),
            };
            warn!(?elapsed, "{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::StylePolicy;

    fn server(config: ServerConfig) -> Server {
        Server::new(
            config,
            Arc::new(russh::server::Config::default()),
            Arc::new(RenderAdapter::new(StylePolicy::default())),
        )
    }

    #[tokio::test]
    async fn test_bind_failure_names_address() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..ServerConfig::default()
        };
        let err = server(config).bind().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(err.to_string().contains(&port.to_string()));
    }

    #[test]
    fn test_missing_host_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            host_key: dir.path().join("missing_key"),
            ..ServerConfig::default()
        };
        let err = Server::load(config).err().unwrap();
        assert!(matches!(err, ServerError::HostKey { .. }));
    }

    #[tokio::test]
    async fn test_idle_server_shuts_down_gracefully() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let server = server(config);
        let listener = server.bind().await.unwrap();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let report = server.serve(listener, rx).await.unwrap();
        assert_eq!(report, ShutdownReport::Graceful);
    }
}
