//! Echo server demo: answers every request with its own payload and logs
//! throughput once a second.
//!
//! Run with `cargo run --example echo_server`, then point any duplexwire
//! client at localhost:4001.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use duplexwire::{BoxFuture, ConnectionConfig, Result, Server, Service};

struct EchoService {
    requests: Arc<AtomicU64>,
}

impl Service for EchoService {
    fn handle_request(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        Box::pin(async move { Ok(payload) })
    }

    fn handle_push(&self, _payload: Bytes) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let requests = Arc::new(AtomicU64::new(0));
    let counter = requests.clone();
    tokio::spawn(async move {
        let mut last = 0u64;
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let total = counter.load(Ordering::Relaxed);
            tracing::info!("{total} total requests ({}/sec)", total - last);
            last = total;
        }
    });

    let server = Server::bind("127.0.0.1:4001", ConnectionConfig::default()).await?;
    tracing::info!("listening on {}", server.local_addr()?);
    server.serve(Arc::new(EchoService { requests })).await
}
