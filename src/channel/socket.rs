//! Unix domain socket transports
//!
//! The service binds a [`SocketAcceptor`] and takes exactly one peer; the
//! client opens a [`SocketConnector`] to the endpoint discovery found.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_net::unix::{UnixListener, UnixStream};
use executor_core::Executor;

use crate::channel::{ChannelTransport, Connection};
use crate::error::{Error, Result};

/// Client side: connects to a provider's socket
#[derive(Debug, Clone)]
pub struct SocketConnector<E> {
    service_name: String,
    path: PathBuf,
    executor: E,
    request_timeout: Option<Duration>,
}

impl<E: Executor + Clone + Send + Sync + 'static> SocketConnector<E> {
    pub fn new(
        service_name: impl Into<String>,
        path: impl AsRef<Path>,
        executor: E,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            path: path.as_ref().to_path_buf(),
            executor,
            request_timeout,
        }
    }
}

impl<E: Executor + Clone + Send + Sync + 'static> ChannelTransport for SocketConnector<E> {
    async fn open(&self) -> Result<Connection> {
        let stream = UnixStream::connect(&self.path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => Error::AppUnavailable {
                service: self.service_name.clone(),
            },
            _ => Error::Io(e),
        })?;

        tracing::info!(path = %self.path.display(), "connected to service");
        Ok(Connection::from_stream(
            stream,
            self.executor.clone(),
            self.request_timeout,
        ))
    }
}

/// Service side: a bound socket that accepts a single peer
///
/// After the peer is accepted the socket file is removed, so no second client
/// can reach this provider.
pub struct SocketAcceptor<E> {
    listener: Mutex<Option<UnixListener>>,
    socket_path: PathBuf,
    executor: E,
    request_timeout: Option<Duration>,
}

impl<E: Executor + Clone + Send + Sync + 'static> SocketAcceptor<E> {
    /// Bind the provider socket
    ///
    /// # Arguments
    /// * `socket_path` - Path for the Unix domain socket
    /// * `executor` - Executor the accepted connection runs on
    /// * `request_timeout` - Bound on each request the service sends
    pub fn bind(
        socket_path: impl AsRef<Path>,
        executor: E,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        // Remove a stale socket file if present
        let _ = std::fs::remove_file(&socket_path);

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        tracing::info!(path = %socket_path.display(), "service socket bound");

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            socket_path,
            executor,
            request_timeout,
        })
    }
}

impl<E> SocketAcceptor<E> {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl<E: Executor + Clone + Send + Sync + 'static> ChannelTransport for SocketAcceptor<E> {
    async fn open(&self) -> Result<Connection> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::AlreadyOpen)?;

        let (stream, _addr) = listener.accept().await?;
        drop(listener);
        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!(path = %self.socket_path.display(), "client connected");

        Ok(Connection::from_stream(
            stream,
            self.executor.clone(),
            self.request_timeout,
        ))
    }
}

impl<E> Drop for SocketAcceptor<E> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
