//! Inbound frames
//!
//! A [`FrameReaderFactory`] decodes the next header from its source and hands
//! back a [`FrameReader`] describing the frame. The payload is then pulled
//! through the factory, which never reads past the end of the active frame,
//! so the next header always starts at the preamble.

use std::future::Future;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::error::{Error, Result};
use crate::frame::{FrameHeader, OpCode};
use crate::mask::apply_mask_offset;

/// Scratch size used when draining an unwanted payload
const DISCARD_CHUNK: usize = 4096;

/// A decoded frame whose payload is being consumed
pub trait FrameReader: Send {
    /// Payload type of the frame (may be rewritten by a handler)
    fn payload_type(&self) -> OpCode;

    /// Replace the reported payload type
    fn set_payload_type(&mut self, opcode: OpCode);

    /// Whether this is the final fragment of a message
    fn is_final(&self) -> bool;

    /// Raw header bytes as parsed, without the preamble
    fn header_bytes(&self) -> &[u8];

    /// Total frame length: preamble + header + payload
    fn frame_len(&self) -> u64;

    /// Payload length announced by the header
    fn payload_len(&self) -> u64;

    /// Payload bytes not yet consumed
    fn remaining(&self) -> u64;
}

/// Produces frame readers from a byte source
pub trait FrameReaderFactory: Send {
    /// Frame type produced by this factory
    type Frame: FrameReader;

    /// Decode the next frame header
    fn new_frame_reader(&mut self) -> impl Future<Output = Result<Self::Frame>> + Send;

    /// Read payload bytes of `frame` into `buf`
    ///
    /// Returns `Ok(0)` once the payload is exhausted.
    fn read_payload(
        &mut self,
        frame: &mut Self::Frame,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Read and throw away the rest of the payload, returning the bytes skipped
    fn discard(&mut self, frame: &mut Self::Frame) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let mut scratch = [0u8; DISCARD_CHUNK];
            let mut skipped = 0u64;
            loop {
                let n = self.read_payload(frame, &mut scratch).await?;
                if n == 0 {
                    return Ok(skipped);
                }
                skipped += n as u64;
            }
        }
    }

    /// Read the rest of the payload into memory
    fn read_to_end(&mut self, frame: &mut Self::Frame) -> impl Future<Output = Result<Bytes>> + Send {
        async move {
            let len = usize::try_from(frame.remaining()).map_err(|_| Error::FrameTooLarge)?;
            let mut data = BytesMut::zeroed(len);
            let mut filled = 0;
            while filled < len {
                let n = self.read_payload(frame, &mut data[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            data.truncate(filled);
            Ok(data.freeze())
        }
    }
}

/// Frame decoded from the preamble-delimited wire format
#[derive(Debug, Clone)]
pub struct TcpFrameReader {
    header: FrameHeader,
    /// Payload bytes consumed so far; selects the rotating mask byte
    pos: u64,
}

impl TcpFrameReader {
    /// Wrap a decoded header
    pub fn new(header: FrameHeader) -> Self {
        Self { header, pos: 0 }
    }

    /// The decoded header
    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Unmask freshly read payload bytes and advance the position
    #[inline]
    fn consume(&mut self, data: &mut [u8]) {
        if let Some(mask) = self.header.mask {
            apply_mask_offset(data, mask, self.pos);
        }
        self.pos += data.len() as u64;
    }
}

impl FrameReader for TcpFrameReader {
    #[inline]
    fn payload_type(&self) -> OpCode {
        self.header.opcode
    }

    #[inline]
    fn set_payload_type(&mut self, opcode: OpCode) {
        self.header.opcode = opcode;
    }

    #[inline]
    fn is_final(&self) -> bool {
        self.header.fin
    }

    #[inline]
    fn header_bytes(&self) -> &[u8] {
        self.header.raw()
    }

    #[inline]
    fn frame_len(&self) -> u64 {
        self.header.frame_len()
    }

    #[inline]
    fn payload_len(&self) -> u64 {
        self.header.payload_len
    }

    #[inline]
    fn remaining(&self) -> u64 {
        self.header.payload_len - self.pos
    }
}

/// Reads preamble-delimited frames from a buffered source
#[derive(Debug)]
pub struct TcpFrameReaderFactory<R> {
    reader: BufReader<R>,
}

impl<R> TcpFrameReaderFactory<R>
where
    R: AsyncRead + Unpin,
{
    /// Buffer `inner` with the given capacity
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, inner),
        }
    }

    /// Reuse an existing buffered reader, keeping any bytes it already holds
    pub fn from_buffered(reader: BufReader<R>) -> Self {
        Self { reader }
    }

    /// Get a reference to the buffered reader
    pub fn get_ref(&self) -> &BufReader<R> {
        &self.reader
    }

    /// Consume the factory and return the buffered reader
    pub fn into_inner(self) -> BufReader<R> {
        self.reader
    }
}

impl<R> FrameReaderFactory for TcpFrameReaderFactory<R>
where
    R: AsyncRead + Unpin + Send,
{
    type Frame = TcpFrameReader;

    async fn new_frame_reader(&mut self) -> Result<TcpFrameReader> {
        let header = FrameHeader::read_from(&mut self.reader).await?;
        tracing::trace!(
            opcode = ?header.opcode,
            fin = header.fin,
            payload_len = header.payload_len,
            masked = header.mask.is_some(),
            "decoded frame header"
        );
        Ok(TcpFrameReader::new(header))
    }

    async fn read_payload(&mut self, frame: &mut TcpFrameReader, buf: &mut [u8]) -> Result<usize> {
        let remaining = frame.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let limit = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.reader.read(&mut buf[..limit]).await?;
        if n == 0 {
            // Stream ended inside the payload
            return Err(Error::ConnectionClosed);
        }

        frame.consume(&mut buf[..n]);
        Ok(n)
    }
}
