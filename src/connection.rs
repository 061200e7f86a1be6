//! Async session driver for one duplex connection.
//!
//! A [`Connection`] owns a [`StreamHandler`] behind a mutex and drives it
//! against any `AsyncRead + AsyncWrite` transport:
//!
//! ```text
//! transport ─► read loop ─► StreamHandler::on_bytes_received ─► dispatch
//! call()/push() ─► StreamHandler::send_* ─► write buffer ─► writer task ─► transport
//! ```
//!
//! The session policy lives here, not in the codec: REQUEST seqs are
//! correlated to callers through oneshot channels, inbound REQUESTs and
//! PUSHes dispatch to a [`Service`], the accepting side greets with HELLO,
//! the peer answers SELECT_ENCODING with the first mutually supported
//! encoding, PINGs run at the cadence the peer's HELLO advertised, and
//! GOAWAY (or any transport/decode failure) tears the session down and
//! fails every pending call.
//!
//! # Example
//!
//! ```ignore
//! use duplexwire::{Connection, ConnectionConfig, NullService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> duplexwire::Result<()> {
//!     let conn = Connection::connect(
//!         "localhost:4001",
//!         Arc::new(NullService),
//!         ConnectionConfig::default(),
//!     )
//!     .await?;
//!
//!     let reply = conn.call(b"hello").await?;
//!     println!("{} bytes back", reply.len());
//!     conn.close().await
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::codec::Encoding;
use crate::error::{Error, Result};
use crate::protocol::Event;
use crate::stream::{HandlerConfig, StreamHandler};

/// GOAWAY codes this runtime emits. The wire accepts any `u8`.
pub mod goaway {
    /// Orderly local close.
    pub const NORMAL: u8 = 0;
    /// The peer's byte stream failed to decode.
    pub const PROTOCOL_ERROR: u8 = 1;
}

/// ERROR codes this runtime emits. The wire accepts any `u8`.
pub mod error_code {
    /// The request handler failed.
    pub const INTERNAL: u8 = 1;
}

/// Boxed future returned by [`Service`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Application hook for inbound frames.
///
/// One `Service` per connection (usually shared across a server's
/// connections). Both methods have defaults so pure clients can use
/// [`NullService`].
pub trait Service: Send + Sync + 'static {
    /// Handle one REQUEST payload; the returned bytes become the RESPONSE.
    /// An `Err` becomes an ERROR frame echoing the request's seq.
    fn handle_request(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes>> {
        let _ = payload;
        Box::pin(async { Err(Error::Protocol("no request handler".to_string())) })
    }

    /// Handle one PUSH payload. Fire-and-forget; nothing is sent back.
    fn handle_push(&self, payload: Bytes) -> BoxFuture<'static, ()> {
        let _ = payload;
        Box::pin(async {})
    }
}

/// A [`Service`] that answers every request with an ERROR and drops pushes.
pub struct NullService;

impl Service for NullService {}

/// Configuration for one [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Codec buffer and framing limits.
    pub handler: HandlerConfig,
    /// PING cadence advertised in our HELLO, in milliseconds. 0 asks the
    /// peer not to ping.
    pub ping_interval_ms: u32,
    /// Encoding names this side is willing to use, preference first. They
    /// are advertised in our HELLO, and negotiation never settles on a name
    /// outside this list, whichever side picks.
    pub encodings: Vec<String>,
    /// Transport read chunk size.
    pub read_buffer_size: usize,
    /// Depth of the outbound chunk queue feeding the writer task.
    pub outbound_queue: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handler: HandlerConfig::default(),
            ping_interval_ms: 30_000,
            encodings: Encoding::DEFAULT_ADVERTISED
                .iter()
                .map(|s| s.to_string())
                .collect(),
            read_buffer_size: 64 * 1024,
            outbound_queue: 64,
        }
    }
}

struct Shared {
    handler: Mutex<StreamHandler>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Result<Bytes>>>>,
    outbound: mpsc::Sender<Bytes>,
    /// Encoding names this side is willing to use; negotiation is the
    /// intersection of this list with what the peer offers or picks.
    local_encodings: Vec<String>,
    encoding: watch::Sender<Option<Encoding>>,
    peer_interval: watch::Sender<Option<Duration>>,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn permits(&self, name: &[u8]) -> bool {
        self.local_encodings.iter().any(|ours| ours.as_bytes() == name)
    }
}

/// A running duplex session.
///
/// Dropping the connection aborts its driver tasks; [`Connection::close`]
/// first tells the peer with a GOAWAY.
pub struct Connection {
    shared: Arc<Shared>,
    encoding_rx: watch::Receiver<Option<Encoding>>,
    closed_rx: watch::Receiver<bool>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
    ping_task: JoinHandle<()>,
}

impl Connection {
    /// Connect to a listening peer over TCP and drive the session.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        service: Arc<dyn Service>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::initiate(stream, service, config)
    }

    /// Drive an already-established transport from the initiating side.
    ///
    /// The initiator waits for the peer's HELLO and answers with
    /// SELECT_ENCODING.
    pub fn initiate<S>(
        stream: S,
        service: Arc<dyn Service>,
        config: ConnectionConfig,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::spawn(stream, service, config, false)
    }

    /// Drive an accepted transport; the accepting side greets with HELLO.
    pub fn accept<S>(stream: S, service: Arc<dyn Service>, config: ConnectionConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::spawn(stream, service, config, true)
    }

    fn spawn<S>(
        stream: S,
        service: Arc<dyn Service>,
        config: ConnectionConfig,
        greet: bool,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut handler = StreamHandler::with_config(config.handler);
        if greet {
            let names: Vec<&[u8]> = config.encodings.iter().map(|s| s.as_bytes()).collect();
            handler.send_hello(config.ping_interval_ms, &names)?;
        }
        let greeting = handler.write_buffer_get_bytes(usize::MAX, true);

        let (read_half, write_half) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::channel(config.outbound_queue.max(1));
        if let Some(chunk) = greeting {
            // The channel is fresh; this cannot be full.
            out_tx.try_send(chunk).map_err(|_| Error::ConnectionClosed)?;
        }

        let (encoding_tx, encoding_rx) = watch::channel(None);
        let (interval_tx, interval_rx) = watch::channel(None);
        let (closed_tx, closed_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            handler: Mutex::new(handler),
            pending: Mutex::new(HashMap::new()),
            outbound: out_tx,
            local_encodings: config.encodings,
            encoding: encoding_tx,
            peer_interval: interval_tx,
            closed: closed_tx,
        });

        let write_task = tokio::spawn(write_loop(out_rx, write_half, closed_rx.clone()));
        let ping_task = tokio::spawn(ping_loop(shared.clone(), interval_rx, closed_rx.clone()));
        let read_task = tokio::spawn(read_loop(
            shared.clone(),
            read_half,
            service,
            config.read_buffer_size,
        ));

        Ok(Self {
            shared,
            encoding_rx,
            closed_rx,
            read_task,
            write_task,
            ping_task,
        })
    }

    /// Send a REQUEST and wait for the peer's RESPONSE payload.
    ///
    /// An ERROR reply surfaces as [`Error::Remote`]; session teardown fails
    /// the call with [`Error::ConnectionClosed`].
    pub async fn call(&self, payload: &[u8]) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        {
            let mut handler = self.shared.handler.lock().await;
            let seq = handler.send_request(payload)?;
            self.shared.pending.lock().await.insert(seq, tx);
        }
        flush(&self.shared).await?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Send a REQUEST with a typed payload in the negotiated encoding and
    /// decode the reply with it.
    pub async fn call_value<T, R>(&self, value: &T) -> Result<R>
    where
        T: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let encoding = self.encoding().unwrap_or_default();
        let payload = encoding.encode(value)?;
        let reply = self.call(&payload).await?;
        encoding.decode(&reply)
    }

    /// Send a PUSH (fire-and-forget).
    pub async fn push(&self, payload: &[u8]) -> Result<()> {
        {
            let mut handler = self.shared.handler.lock().await;
            handler.send_push(payload)?;
        }
        flush(&self.shared).await
    }

    /// Send a PUSH with a typed payload in the negotiated encoding.
    pub async fn push_value<T>(&self, value: &T) -> Result<()>
    where
        T: serde::Serialize,
    {
        let encoding = self.encoding().unwrap_or_default();
        let payload = encoding.encode(value)?;
        self.push(&payload).await
    }

    /// Send a PING immediately; returns its sequence. The cadence task
    /// already pings on the interval the peer asked for.
    pub async fn ping(&self) -> Result<u32> {
        let seq = {
            let mut handler = self.shared.handler.lock().await;
            handler.send_ping()?
        };
        flush(&self.shared).await?;
        Ok(seq)
    }

    /// The payload encoding negotiated so far, if any.
    pub fn encoding(&self) -> Option<Encoding> {
        *self.encoding_rx.borrow()
    }

    /// Whether the session has been torn down.
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Tell the peer to go away. The session tears down once the peer
    /// closes its side of the transport.
    pub async fn close(&self) -> Result<()> {
        {
            let mut handler = self.shared.handler.lock().await;
            handler.send_goaway(goaway::NORMAL, None)?;
        }
        flush(&self.shared).await
    }

    /// Wait until the session has been torn down.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.read_task.abort();
        self.write_task.abort();
        self.ping_task.abort();
    }
}

/// Hand every unsent byte to the writer task.
async fn flush(shared: &Shared) -> Result<()> {
    let chunk = {
        let mut handler = shared.handler.lock().await;
        handler.write_buffer_get_bytes(usize::MAX, true)
    };
    if let Some(chunk) = chunk {
        shared
            .outbound
            .send(chunk)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
    }
    Ok(())
}

async fn read_loop<R>(
    shared: Arc<Shared>,
    mut reader: R,
    service: Arc<dyn Service>,
    read_buffer_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; read_buffer_size];
    'outer: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("peer closed the transport");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("transport read failed: {e}");
                break;
            }
        };

        let events = {
            let mut handler = shared.handler.lock().await;
            match handler.on_bytes_received(&buf[..n]) {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!("decode failed, closing connection: {e}");
                    let _ = handler
                        .send_goaway(goaway::PROTOCOL_ERROR, Some(e.to_string().as_bytes()));
                    drop(handler);
                    let _ = flush(&shared).await;
                    break;
                }
            }
        };

        // PONGs queued by the handler go out even when no event dispatches.
        if flush(&shared).await.is_err() {
            break;
        }

        for event in events {
            if !dispatch(&shared, &service, event).await {
                break 'outer;
            }
        }
    }
    shutdown(&shared).await;
}

/// Handle one decoded event. Returns `false` when the session should end.
async fn dispatch(shared: &Arc<Shared>, service: &Arc<dyn Service>, event: Event) -> bool {
    match event {
        Event::Request { seq, payload } => {
            let shared = shared.clone();
            let service = service.clone();
            tokio::spawn(async move {
                let reply = service.handle_request(payload).await;
                let queued = {
                    let mut handler = shared.handler.lock().await;
                    match reply {
                        Ok(bytes) => handler.send_response(seq, &bytes),
                        Err(e) => handler.send_error(
                            error_code::INTERNAL,
                            seq,
                            Some(e.to_string().as_bytes()),
                        ),
                    }
                };
                match queued {
                    Ok(()) => {
                        let _ = flush(&shared).await;
                    }
                    Err(e) => tracing::error!("failed to queue reply for seq {seq}: {e}"),
                }
            });
        }
        Event::Push { payload } => {
            let service = service.clone();
            tokio::spawn(async move { service.handle_push(payload).await });
        }
        Event::Response { seq, payload } => match shared.pending.lock().await.remove(&seq) {
            Some(tx) => {
                let _ = tx.send(Ok(payload));
            }
            None => tracing::warn!("response for unknown seq {seq}"),
        },
        Event::Error { code, seq, payload } => match shared.pending.lock().await.remove(&seq) {
            Some(tx) => {
                let _ = tx.send(Err(Error::Remote {
                    code,
                    message: String::from_utf8_lossy(&payload).into_owned(),
                }));
            }
            None => tracing::warn!("error frame (code {code}) for unknown seq {seq}"),
        },
        Event::Ping { seq } => {
            // The stream handler already queued the PONG.
            tracing::trace!("ping {seq} answered");
        }
        Event::Pong { seq } => {
            tracing::trace!("pong {seq}");
        }
        Event::Hello {
            version,
            ping_interval,
            supported_encodings,
        } => {
            tracing::debug!("peer hello: version {version}, ping every {ping_interval}ms");
            // First of the peer's names that this side also listed and
            // implements.
            match supported_encodings
                .iter()
                .filter(|name| shared.permits(name))
                .find_map(|name| Encoding::from_name(name))
            {
                Some(encoding) => {
                    shared.encoding.send_replace(Some(encoding));
                    let queued = {
                        let mut handler = shared.handler.lock().await;
                        handler.send_select_encoding(encoding.name().as_bytes())
                    };
                    match queued {
                        Ok(()) => {
                            let _ = flush(shared).await;
                        }
                        Err(e) => tracing::error!("failed to queue encoding selection: {e}"),
                    }
                }
                None => tracing::warn!("peer advertised no mutually supported encoding"),
            }
            if ping_interval > 0 {
                shared
                    .peer_interval
                    .send_replace(Some(Duration::from_millis(u64::from(ping_interval))));
            }
        }
        Event::SelectEncoding { encoding: name } => {
            match Encoding::from_name(&name).filter(|_| shared.permits(&name)) {
                Some(encoding) => {
                    tracing::debug!("peer selected {} encoding", encoding.name());
                    shared.encoding.send_replace(Some(encoding));
                }
                None => tracing::warn!("peer selected unsupported encoding {name:?}"),
            }
        }
        Event::GoAway { code, reason } => {
            tracing::debug!(
                "peer sent goaway (code {code}): {}",
                String::from_utf8_lossy(&reason)
            );
            return false;
        }
    }
    true
}

/// PING at the cadence the peer's HELLO advertised.
async fn ping_loop(
    shared: Arc<Shared>,
    mut interval_rx: watch::Receiver<Option<Duration>>,
    mut closed_rx: watch::Receiver<bool>,
) {
    let period = loop {
        if let Some(period) = *interval_rx.borrow_and_update() {
            break period;
        }
        tokio::select! {
            res = interval_rx.changed() => {
                if res.is_err() {
                    return;
                }
            }
            _ = closed_rx.changed() => {
                if *closed_rx.borrow() {
                    return;
                }
            }
        }
    };

    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = closed_rx.changed() => {
                if *closed_rx.borrow() {
                    return;
                }
            }
        }
        let queued = {
            let mut handler = shared.handler.lock().await;
            handler.send_ping()
        };
        match queued {
            Ok(seq) => {
                tracing::trace!("ping {seq} sent");
                if flush(&shared).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!("failed to queue ping: {e}");
                return;
            }
        }
    }
}

async fn write_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    mut closed_rx: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        // biased: drain queued chunks (a final GOAWAY in particular) before
        // observing teardown.
        tokio::select! {
            biased;
            maybe = rx.recv() => match maybe {
                Some(chunk) => {
                    if let Err(e) = writer.write_all(&chunk).await {
                        tracing::error!("transport write failed: {e}");
                        break;
                    }
                    if let Err(e) = writer.flush().await {
                        tracing::error!("transport flush failed: {e}");
                        break;
                    }
                }
                None => break,
            },
            res = closed_rx.changed() => {
                if res.is_err() || *closed_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Fail every pending call and mark the session closed.
async fn shutdown(shared: &Shared) {
    let mut pending = shared.pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(Error::ConnectionClosed));
    }
    drop(pending);
    let _ = shared.closed.send(true);
}
