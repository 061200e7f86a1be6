//! Per-connection stream handler.
//!
//! One [`StreamHandler`] per connection endpoint turns locally produced
//! events into wire bytes and received bytes into decoded [`Event`]s. It
//! owns both directions' buffers and the outgoing sequence counter, and
//! nothing else: no I/O, no timers, no knowledge of which sequences are in
//! flight. The handler is single-threaded and not reentrant; callers
//! ensure exclusive access.
//!
//! # Example
//!
//! ```
//! use duplexwire::stream::StreamHandler;
//! use duplexwire::protocol::Event;
//!
//! let mut client = StreamHandler::new();
//! let mut server = StreamHandler::new();
//!
//! let seq = client.send_request(b"hi").unwrap();
//! let wire = client.write_buffer_get_bytes(usize::MAX, true).unwrap();
//!
//! let events = server.on_bytes_received(&wire).unwrap();
//! assert_eq!(events, vec![Event::Request { seq, payload: "hi".into() }]);
//! ```

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::{
    encode_error, encode_goaway, encode_hello, encode_ping, encode_pong, encode_push,
    encode_request, encode_response, encode_select_encoding, DecodeStatus, Decoder, Event,
    WriteBuffer, BIG_ALLOC_THRESHOLD, DEFAULT_MAX_PAYLOAD_LEN, INITIAL_ALLOC, PROTOCOL_VERSION,
    SEQ_MAX,
};

/// Buffer and framing limits for one [`StreamHandler`].
#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    /// Smallest allocation either buffer makes on first use.
    pub initial_alloc: usize,
    /// Allocation size at or above which a drained or reset buffer releases
    /// its storage.
    pub big_alloc_threshold: usize,
    /// Largest accepted incoming payload; longer frames fail decoding.
    pub max_payload_len: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            initial_alloc: INITIAL_ALLOC,
            big_alloc_threshold: BIG_ALLOC_THRESHOLD,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

/// Stateful codec endpoint for one duplex connection.
#[derive(Debug)]
pub struct StreamHandler {
    seq: u32,
    write: WriteBuffer,
    decode: Decoder,
}

impl StreamHandler {
    /// Create a handler with the default limits.
    pub fn new() -> Self {
        Self::with_config(HandlerConfig::default())
    }

    /// Create a handler with custom limits.
    pub fn with_config(config: HandlerConfig) -> Self {
        Self {
            seq: 0,
            write: WriteBuffer::with_limits(config.initial_alloc, config.big_alloc_threshold),
            decode: Decoder::with_limits(
                config.initial_alloc,
                config.big_alloc_threshold,
                config.max_payload_len,
            ),
        }
    }

    /// The last sequence issued (0 if none, or right after a wrap).
    pub fn current_seq(&self) -> u32 {
        self.seq
    }

    /// Pre-increment issuance: the first value is 1, and the counter wraps
    /// to 0 upon reaching [`SEQ_MAX`]. A returned 0 therefore means "wrap
    /// just happened" and is a valid live sequence.
    fn next_seq(&mut self) -> u32 {
        self.seq += 1;
        if self.seq >= SEQ_MAX {
            self.seq = 0;
        }
        self.seq
    }

    /// Queue a PING carrying a freshly allocated sequence; returns it.
    pub fn send_ping(&mut self) -> Result<u32> {
        let seq = self.next_seq();
        encode_ping(&mut self.write, seq)?;
        Ok(seq)
    }

    /// Queue a PONG echoing a peer-supplied sequence.
    pub fn send_pong(&mut self, seq: u32) -> Result<()> {
        encode_pong(&mut self.write, seq)
    }

    /// Queue a REQUEST carrying a freshly allocated sequence; returns it.
    pub fn send_request(&mut self, payload: &[u8]) -> Result<u32> {
        let seq = self.next_seq();
        encode_request(&mut self.write, seq, payload)?;
        Ok(seq)
    }

    /// Queue a PUSH. No sequence is allocated.
    pub fn send_push(&mut self, payload: &[u8]) -> Result<()> {
        encode_push(&mut self.write, payload)
    }

    /// Queue a RESPONSE echoing `seq`. Whether `seq` was ever received is
    /// not checked; correlation is the session layer's job.
    pub fn send_response(&mut self, seq: u32, payload: &[u8]) -> Result<()> {
        encode_response(&mut self.write, seq, payload)
    }

    /// Queue an ERROR echoing `seq`. `None` payload encodes as empty.
    pub fn send_error(&mut self, code: u8, seq: u32, payload: Option<&[u8]>) -> Result<()> {
        encode_error(&mut self.write, code, seq, payload.unwrap_or(b""))
    }

    /// Queue a HELLO advertising `encodings` (preference first) and this
    /// side's desired ping cadence in milliseconds.
    pub fn send_hello<B: AsRef<[u8]>>(
        &mut self,
        ping_interval: u32,
        encodings: &[B],
    ) -> Result<()> {
        encode_hello(&mut self.write, PROTOCOL_VERSION, ping_interval, encodings)
    }

    /// Queue a SELECT_ENCODING naming one of the peer's advertised
    /// encodings.
    pub fn send_select_encoding(&mut self, encoding: &[u8]) -> Result<()> {
        encode_select_encoding(&mut self.write, encoding)
    }

    /// Queue a GOAWAY. `None` reason encodes as empty.
    pub fn send_goaway(&mut self, code: u8, reason: Option<&[u8]>) -> Result<()> {
        encode_goaway(&mut self.write, code, reason.unwrap_or(b""))
    }

    /// Number of queued bytes not yet handed to the transport.
    pub fn write_buffer_len(&self) -> usize {
        self.write.len()
    }

    /// Copy up to `max` unsent bytes; when `consume`, the bytes are
    /// considered handed off and the buffer may compact. `None` when
    /// nothing is queued. The returned bytes are an owned copy; the caller
    /// retains them until transmission is confirmed.
    pub fn write_buffer_get_bytes(&mut self, max: usize, consume: bool) -> Option<Bytes> {
        self.write.get_bytes(max, consume)
    }

    /// Mark up to `n` queued bytes as handed off; returns how many remain.
    pub fn write_buffer_consume_bytes(&mut self, n: usize) -> usize {
        self.write.consume(n)
    }

    /// Feed received bytes, returning every frame completed by this call in
    /// stream order.
    ///
    /// A PING additionally queues the matching PONG before the event is
    /// returned; no other opcode triggers an automatic reply. On a decode
    /// failure the decoder is reset and the error is returned, discarding
    /// both the events already decoded in this call and the unread
    /// remainder of `input` (feed smaller chunks for per-frame error
    /// isolation). The handler itself remains usable.
    pub fn on_bytes_received(&mut self, mut input: &[u8]) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        while !input.is_empty() {
            let (status, consumed) = match self.decode.read_data(input) {
                Ok(r) => r,
                Err(e) => {
                    self.decode.reset();
                    return Err(e);
                }
            };
            input = &input[consumed..];
            match status {
                DecodeStatus::NeedsMore => break,
                DecodeStatus::Complete => {
                    let event = self.decode.event();
                    self.decode.reset();
                    if let Event::Ping { seq } = event {
                        self.send_pong(seq)?;
                    }
                    events.push(event);
                }
            }
        }
        Ok(events)
    }

    #[cfg(test)]
    fn set_seq(&mut self, seq: u32) {
        self.seq = seq;
    }
}

impl Default for StreamHandler {
    fn default() -> Self {
        Self::new()
    }
}
