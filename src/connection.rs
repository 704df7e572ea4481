//! Framed connection
//!
//! [`Connection`] turns a byte stream into a message stream. Reads and writes
//! are serialized independently: one task can be reading while another
//! writes, but two concurrent reads (or two concurrent writes) queue on the
//! same lock. No operation ever holds both locks.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sockudo_tcpws::{Config, TcpConnection};
//!
//! let conn = Arc::new(TcpConnection::new(stream, Config::default()));
//!
//! let reader = conn.clone();
//! tokio::spawn(async move {
//!     while let Ok(payload) = reader.read_frame().await {
//!         println!("received {} bytes", payload.len());
//!     }
//! });
//!
//! conn.write(b"hello").await?;
//! conn.close().await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::Config;
use crate::deadline::{Deadline, DeadlineHandle};
use crate::error::{Error, Result};
use crate::frame::OpCode;
use crate::handler::{FrameHandler, Handled, TcpFrameHandler};
use crate::reader::{FrameReader, FrameReaderFactory, TcpFrameReaderFactory};
use crate::writer::{FrameWriter, FrameWriterFactory, TcpFrameWriterFactory};

/// A complete message reassembled from one or more frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Payload type of the first frame
    pub opcode: OpCode,
    /// Concatenated payload
    pub payload: Bytes,
}

impl Message {
    /// Check if this is a text message
    #[inline]
    pub fn is_text(&self) -> bool {
        self.opcode == OpCode::Text
    }

    /// Check if this is a binary message
    #[inline]
    pub fn is_binary(&self) -> bool {
        self.opcode == OpCode::Binary
    }

    /// Get the payload as text, if it is valid UTF-8
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Consume the message and return the payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Everything guarded by the read lock
struct ReadSide<R: FrameReaderFactory, H> {
    /// `None` once the connection was closed locally
    factory: Option<R>,
    /// Frame whose payload is partially consumed
    frame: Option<R::Frame>,
    handler: H,
    /// No further frames will be decoded
    closed: bool,
}

impl<R, H> ReadSide<R, H>
where
    R: FrameReaderFactory,
    H: FrameHandler<R::Frame>,
{
    /// Drop the read half of the stream
    fn release(&mut self) {
        self.frame = None;
        self.factory = None;
        self.closed = true;
    }

    /// Drain whatever is left of the active frame
    async fn discard_active(&mut self) -> Result<()> {
        if let Some(frame) = self.frame.as_mut() {
            let factory = self.factory.as_mut().ok_or(Error::ConnectionClosed)?;
            factory.discard(frame).await?;
            self.frame = None;
        }
        Ok(())
    }

    /// Decode frames until the handler hands one back
    async fn next_frame(&mut self) -> Result<R::Frame> {
        let factory = match self.factory.as_mut() {
            Some(factory) if !self.closed => factory,
            _ => return Err(Error::ConnectionClosed),
        };

        loop {
            let frame = factory.new_frame_reader().await?;
            match self.handler.handle_frame(frame)? {
                Handled::Frame(frame) => return Ok(frame),
                Handled::Filtered(mut frame) => {
                    factory.discard(&mut frame).await?;
                }
                Handled::EndOfStream => {
                    self.closed = true;
                    return Err(Error::ConnectionClosed);
                }
            }
        }
    }
}

/// A framed, bidirectional connection
///
/// All methods take `&self`, so a connection is usually shared behind an
/// `Arc` between a reading task and one or more writing tasks.
pub struct Connection<R, W, H = TcpFrameHandler>
where
    R: FrameReaderFactory,
{
    reader: Mutex<ReadSide<R, H>>,
    writer: Mutex<W>,
    payload_type: OpCode,
    close_status: u16,
    max_payload_bytes: AtomicUsize,
    deadline: Option<DeadlineHandle>,
    /// Set by `close`; pending and later reads fail
    closed: AtomicBool,
    closing: Notify,
}

/// Connection over a tokio stream split into halves
pub type TcpConnection<S, H = TcpFrameHandler> =
    Connection<TcpFrameReaderFactory<ReadHalf<S>>, TcpFrameWriterFactory<WriteHalf<S>>, H>;

impl<R, W, H> Connection<R, W, H>
where
    R: FrameReaderFactory,
    W: FrameWriterFactory,
    H: FrameHandler<R::Frame>,
{
    /// Assemble a connection from its parts
    ///
    /// `config.mask` and the buffer sizes are not consulted here; they
    /// belong to whoever built the factories.
    pub fn from_parts(reader_factory: R, writer_factory: W, handler: H, config: Config) -> Self {
        Self {
            reader: Mutex::new(ReadSide {
                factory: Some(reader_factory),
                frame: None,
                handler,
                closed: false,
            }),
            writer: Mutex::new(writer_factory),
            payload_type: config.payload_type,
            close_status: config.close_status,
            max_payload_bytes: AtomicUsize::new(config.max_payload_bytes),
            deadline: None,
            closed: AtomicBool::new(false),
            closing: Notify::new(),
        }
    }

    /// Attach a deadline handle, enabling the deadline setters
    pub fn with_deadline_handle(mut self, handle: DeadlineHandle) -> Self {
        self.deadline = Some(handle);
        self
    }

    /// Payload ceiling applied by `read_frame` and `read_message`
    #[inline]
    pub fn max_payload_bytes(&self) -> usize {
        crate::effective_max_payload(self.max_payload_bytes.load(Ordering::Relaxed))
    }

    /// Change the payload ceiling (0 = `DEFAULT_MAX_PAYLOAD_BYTES`)
    pub fn set_max_payload_bytes(&self, max: usize) {
        self.max_payload_bytes.store(max, Ordering::Relaxed);
    }

    /// Opcode used by [`write`](Self::write)
    #[inline]
    pub fn payload_type(&self) -> OpCode {
        self.payload_type
    }

    /// Whether [`close`](Self::close) was called on this connection
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection is closed locally
    async fn closed_signal(&self) {
        loop {
            let notified = self.closing.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Run a read-side operation, failing it as soon as `close` is called
    async fn unless_closed<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let outcome = tokio::select! {
            biased;
            () = self.closed_signal() => None,
            result = op => Some(result),
        };
        match outcome {
            Some(result) => result,
            None => {
                self.reader.lock().await.release();
                Err(Error::ConnectionClosed)
            }
        }
    }

    /// Read payload bytes into `buf`
    ///
    /// Frame boundaries are invisible: a read returns bytes from at most one
    /// frame, and an exhausted frame is replaced by the next one
    /// transparently. Returns [`Error::ConnectionClosed`] once either side
    /// closes.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.unless_closed(self.read_into(buf)).await
    }

    async fn read_into(&self, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.reader.lock().await;
        let side = &mut *guard;
        loop {
            if side.frame.is_none() {
                let frame = side.next_frame().await?;
                side.frame = Some(frame);
            }

            let ReadSide { factory, frame, .. } = &mut *side;
            let Some(factory) = factory.as_mut() else {
                return Err(Error::ConnectionClosed);
            };
            let Some(active) = frame.as_mut() else {
                continue;
            };
            let n = factory.read_payload(active, buf).await?;
            if n == 0 {
                *frame = None;
                continue;
            }
            return Ok(n);
        }
    }

    /// Read the next whole frame payload
    ///
    /// Any partially read frame is discarded first. A payload larger than
    /// [`max_payload_bytes`](Self::max_payload_bytes) is drained and
    /// reported as [`Error::FrameTooLarge`].
    pub async fn read_frame(&self) -> Result<Bytes> {
        self.unless_closed(self.read_whole_frame()).await
    }

    async fn read_whole_frame(&self) -> Result<Bytes> {
        let max = self.max_payload_bytes() as u64;
        let mut guard = self.reader.lock().await;
        let side = &mut *guard;
        side.discard_active().await?;

        let frame = side.next_frame().await?;
        let oversized = frame.payload_len() > max;
        let payload_len = frame.payload_len();

        // Keep the frame registered while its payload is in flight so an
        // interrupted call leaves the stream at a known position.
        let frame = side.frame.insert(frame);
        let factory = side.factory.as_mut().ok_or(Error::ConnectionClosed)?;
        if oversized {
            warn!(payload_len, max, "frame exceeds maximum payload size");
            factory.discard(frame).await?;
            side.frame = None;
            return Err(Error::FrameTooLarge);
        }

        let payload = factory.read_to_end(frame).await?;
        side.frame = None;
        Ok(payload)
    }

    /// Read frames up to and including the final fragment
    ///
    /// The message takes the payload type of its first frame. The size
    /// ceiling applies to the reassembled payload.
    pub async fn read_message(&self) -> Result<Message> {
        self.unless_closed(self.read_whole_message()).await
    }

    async fn read_whole_message(&self) -> Result<Message> {
        let max = self.max_payload_bytes() as u64;
        let mut guard = self.reader.lock().await;
        let side = &mut *guard;
        side.discard_active().await?;

        let mut opcode = None;
        let mut data = BytesMut::new();
        loop {
            let frame = side.next_frame().await?;
            let first = *opcode.get_or_insert(frame.payload_type());
            let fin = frame.is_final();
            let total = data.len() as u64 + frame.payload_len();

            let frame = side.frame.insert(frame);
            let factory = side.factory.as_mut().ok_or(Error::ConnectionClosed)?;
            if total > max {
                warn!(total, max, "message exceeds maximum payload size");
                factory.discard(frame).await?;
                side.frame = None;
                return Err(Error::FrameTooLarge);
            }

            let chunk = factory.read_to_end(frame).await?;
            side.frame = None;

            if fin && data.is_empty() {
                return Ok(Message {
                    opcode: first,
                    payload: chunk,
                });
            }
            data.extend_from_slice(&chunk);
            if fin {
                return Ok(Message {
                    opcode: first,
                    payload: data.freeze(),
                });
            }
        }
    }

    /// Send `msg` as one frame of the configured payload type
    ///
    /// Returns `msg.len()`; framing overhead is not counted.
    pub async fn write(&self, msg: &[u8]) -> Result<usize> {
        self.write_message(self.payload_type, msg).await
    }

    /// Send `msg` as one frame of type `opcode`
    pub async fn write_message(&self, opcode: OpCode, msg: &[u8]) -> Result<usize> {
        let mut writers = self.writer.lock().await;
        let mut writer = writers.new_frame_writer(opcode)?;
        let written = writer.write(msg).await;
        let closed = writer.close().await;
        written?;
        closed?;
        Ok(msg.len())
    }

    /// Send a close frame with the configured status and close the stream
    pub async fn close(&self) -> Result<()> {
        self.close_with(self.close_status).await
    }

    /// Send a close frame with `status` and close the stream
    ///
    /// The write half is shut down and the read half released, even when
    /// the close frame cannot be written; the first error is returned.
    /// Reads pending on other tasks fail with [`Error::ConnectionClosed`],
    /// as does every read after this call.
    pub async fn close_with(&self, status: u16) -> Result<()> {
        let mut writers = self.writer.lock().await;
        let sent = H::write_close(&mut *writers, status).await;
        let shutdown = writers.shutdown().await;
        drop(writers);

        self.closed.store(true, Ordering::Release);
        self.closing.notify_waiters();
        // A pending read holding the lock releases the read half itself
        if let Ok(mut side) = self.reader.try_lock() {
            side.release();
        }

        debug!(status, ok = sent.is_ok(), "connection closed");
        sent?;
        shutdown
    }

    /// Set both deadlines
    ///
    /// Fails with [`Error::DeadlineUnsupported`] unless the connection was
    /// built over a [`Deadline`] stream.
    pub fn set_deadline(&self, at: Option<Instant>) -> Result<()> {
        self.deadline_handle()?.set_deadline(at);
        debug!(?at, "deadline set");
        Ok(())
    }

    /// Set the read deadline
    pub fn set_read_deadline(&self, at: Option<Instant>) -> Result<()> {
        self.deadline_handle()?.set_read_deadline(at);
        debug!(?at, "read deadline set");
        Ok(())
    }

    /// Set the write deadline
    pub fn set_write_deadline(&self, at: Option<Instant>) -> Result<()> {
        self.deadline_handle()?.set_write_deadline(at);
        debug!(?at, "write deadline set");
        Ok(())
    }

    fn deadline_handle(&self) -> Result<&DeadlineHandle> {
        self.deadline.as_ref().ok_or(Error::DeadlineUnsupported)
    }
}

impl<R, W, H> fmt::Debug for Connection<R, W, H>
where
    R: FrameReaderFactory,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("payload_type", &self.payload_type)
            .field("close_status", &self.close_status)
            .field(
                "max_payload_bytes",
                &self.max_payload_bytes.load(Ordering::Relaxed),
            )
            .field("deadline", &self.deadline.is_some())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<S> TcpConnection<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Frame a stream with the default handler
    pub fn new(stream: S, config: Config) -> Self {
        Self::with_handler(stream, TcpFrameHandler::new(), config)
    }
}

impl<S, H> TcpConnection<S, H>
where
    S: AsyncRead + AsyncWrite + Send,
    H: FrameHandler<crate::reader::TcpFrameReader>,
{
    /// Frame a stream with a custom handler
    pub fn with_handler(stream: S, handler: H, config: Config) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let readers = TcpFrameReaderFactory::new(read_half, config.read_buffer_size);
        let writers = TcpFrameWriterFactory::new(write_half, config.write_buffer_size, config.mask);
        Self::from_parts(readers, writers, handler, config)
    }

    /// Frame already buffered halves, keeping any bytes they hold
    pub fn from_buffered(
        reader: BufReader<ReadHalf<S>>,
        writer: BufWriter<WriteHalf<S>>,
        handler: H,
        config: Config,
    ) -> Self {
        let readers = TcpFrameReaderFactory::from_buffered(reader);
        let writers = TcpFrameWriterFactory::from_buffered(writer, config.mask);
        Self::from_parts(readers, writers, handler, config)
    }
}

impl<S> TcpConnection<Deadline<S>>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Frame a stream wrapped in [`Deadline`], enabling the deadline setters
    pub fn with_deadline(stream: S, config: Config) -> Self {
        let stream = Deadline::new(stream);
        let handle = stream.handle();
        Self::new(stream, config).with_deadline_handle(handle)
    }
}
