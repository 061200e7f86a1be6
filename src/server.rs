//! TCP server: bind, accept, one [`Connection`] per socket.
//!
//! # Example
//!
//! ```ignore
//! use duplexwire::{BoxFuture, Result, Server, Service};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! struct EchoService;
//!
//! impl Service for EchoService {
//!     fn handle_request(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes>> {
//!         Box::pin(async move { Ok(payload) })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Server::bind("localhost:4001", Default::default()).await?;
//!     server.serve(Arc::new(EchoService)).await
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};

use crate::connection::{Connection, ConnectionConfig, Service};
use crate::error::Result;

/// A listening endpoint spawning one session per accepted socket.
pub struct Server {
    listener: TcpListener,
    config: ConnectionConfig,
}

impl Server {
    /// Bind to `addr`.
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: ConnectionConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    /// The bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, dispatching every session to `service`.
    pub async fn serve(self, service: Arc<dyn Service>) -> Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            tracing::debug!("accepted connection from {addr}");
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("failed to set nodelay for {addr}: {e}");
            }
            match Connection::accept(stream, service.clone(), self.config.clone()) {
                Ok(conn) => {
                    // The session lives until its transport closes; hold the
                    // connection so its driver tasks are not aborted early.
                    tokio::spawn(async move {
                        conn.wait_closed().await;
                        tracing::debug!("session with {addr} ended");
                    });
                }
                Err(e) => tracing::error!("failed to start session with {addr}: {e}"),
            }
        }
    }
}
