//! Outbound frames
//!
//! Every call to [`FrameWriter::write`] emits one complete frame: preamble,
//! header and payload, followed by a flush of the sink. There is no
//! writer-side fragmentation, so FIN is always set.

use std::future::Future;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::MAX_HEADER_SIZE_WITH_PREAMBLE;
use crate::error::{Error, Result};
use crate::frame::{FrameHeader, OpCode};
use crate::mask::{apply_mask, generate_mask};

/// Writes one frame per call
pub trait FrameWriter: Send {
    /// Write `payload` as a single frame
    ///
    /// Returns the total number of bytes put on the wire
    /// (preamble + header + payload).
    fn write(&mut self, payload: &[u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Finish the writer
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Produces frame writers over a byte sink
pub trait FrameWriterFactory: Send {
    /// Writer type borrowing the factory's sink
    type Writer<'a>: FrameWriter
    where
        Self: 'a;

    /// Create a writer for frames of `payload_type`
    fn new_frame_writer(&mut self, payload_type: OpCode) -> Result<Self::Writer<'_>>;

    /// Flush and shut down the underlying sink
    fn shutdown(&mut self) -> impl Future<Output = Result<()>> + Send;
}

fn check_opcode(opcode: OpCode) -> Result<()> {
    if opcode.is_encodable() {
        Ok(())
    } else {
        Err(Error::UnsupportedOpCode(opcode))
    }
}

/// Writer for the preamble-delimited wire format
#[derive(Debug)]
pub struct TcpFrameWriter<'a, W> {
    sink: &'a mut BufWriter<W>,
    header: FrameHeader,
}

impl<'a, W> TcpFrameWriter<'a, W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a writer with an optional, already generated key
    pub fn new(sink: &'a mut BufWriter<W>, payload_type: OpCode, mask: Option<[u8; 4]>) -> Self {
        Self {
            sink,
            header: FrameHeader::new(payload_type, 0, mask),
        }
    }

    /// Create a masking writer from a caller-supplied key
    ///
    /// Fails with [`Error::BadMaskingKey`] unless `key` is exactly 4 bytes.
    pub fn with_masking_key(
        sink: &'a mut BufWriter<W>,
        payload_type: OpCode,
        key: &[u8],
    ) -> Result<Self> {
        let key = <[u8; 4]>::try_from(key).map_err(|_| Error::BadMaskingKey)?;
        check_opcode(payload_type)?;
        Ok(Self::new(sink, payload_type, Some(key)))
    }

    /// The header used for the next frame
    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }
}

impl<W> FrameWriter for TcpFrameWriter<'_, W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, payload: &[u8]) -> Result<usize> {
        self.header.payload_len = payload.len() as u64;

        let mut buf = BytesMut::with_capacity(MAX_HEADER_SIZE_WITH_PREAMBLE);
        self.header.encode(&mut buf);
        let header_len = buf.len();

        match self.header.mask {
            Some(mask) => {
                buf.reserve(payload.len());
                buf.put_slice(payload);
                apply_mask(&mut buf[header_len..], mask);
                self.sink.write_all(&buf).await?;
            }
            None => {
                self.sink.write_all(&buf).await?;
                self.sink.write_all(payload).await?;
            }
        }
        self.sink.flush().await?;

        Ok(header_len + payload.len())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Creates [`TcpFrameWriter`]s over a buffered sink
#[derive(Debug)]
pub struct TcpFrameWriterFactory<W> {
    writer: BufWriter<W>,
    /// Mask every frame with a fresh random key
    mask: bool,
}

impl<W> TcpFrameWriterFactory<W>
where
    W: AsyncWrite + Unpin,
{
    /// Buffer `inner` with the given capacity
    pub fn new(inner: W, capacity: usize, mask: bool) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, inner),
            mask,
        }
    }

    /// Reuse an existing buffered writer
    pub fn from_buffered(writer: BufWriter<W>, mask: bool) -> Self {
        Self { writer, mask }
    }

    /// Whether frames are masked
    #[inline]
    pub fn is_masking(&self) -> bool {
        self.mask
    }

    /// Create a writer that masks with `key` instead of a random one
    pub fn new_frame_writer_with_key(
        &mut self,
        payload_type: OpCode,
        key: &[u8],
    ) -> Result<TcpFrameWriter<'_, W>> {
        TcpFrameWriter::with_masking_key(&mut self.writer, payload_type, key)
    }

    /// Get a reference to the buffered writer
    pub fn get_ref(&self) -> &BufWriter<W> {
        &self.writer
    }

    /// Consume the factory and return the buffered writer
    pub fn into_inner(self) -> BufWriter<W> {
        self.writer
    }
}

impl<W> FrameWriterFactory for TcpFrameWriterFactory<W>
where
    W: AsyncWrite + Unpin + Send,
{
    type Writer<'a>
        = TcpFrameWriter<'a, W>
    where
        Self: 'a;

    fn new_frame_writer(&mut self, payload_type: OpCode) -> Result<TcpFrameWriter<'_, W>> {
        check_opcode(payload_type)?;
        let mask = if self.mask {
            Some(generate_mask()?)
        } else {
            None
        };
        Ok(TcpFrameWriter::new(&mut self.writer, payload_type, mask))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PREAMBLE;
    use crate::reader::{FrameReader, FrameReaderFactory, TcpFrameReaderFactory};

    fn sink() -> TcpFrameWriterFactory<Vec<u8>> {
        TcpFrameWriterFactory::new(Vec::new(), 1024, false)
    }

    fn wire(factory: TcpFrameWriterFactory<Vec<u8>>) -> Vec<u8> {
        factory.into_inner().into_inner()
    }

    #[tokio::test]
    async fn test_unmasked_frame_layout() {
        let mut factory = sink();
        let mut writer = factory.new_frame_writer(OpCode::Text).unwrap();
        let n = writer.write(b"hello").await.unwrap();
        writer.close().await.unwrap();

        let bytes = wire(factory);
        assert_eq!(n, bytes.len());
        assert_eq!(n, PREAMBLE.len() + 2 + 5);
        assert_eq!(&bytes[..4], &PREAMBLE);
        assert_eq!(bytes[4], 0x81);
        assert_eq!(bytes[5], 0x05);
        assert_eq!(&bytes[6..], b"hello");
    }

    #[tokio::test]
    async fn test_masked_with_fixed_key() {
        let key = [0x01, 0x02, 0x03, 0x04];
        let mut factory = sink();
        let mut writer = factory
            .new_frame_writer_with_key(OpCode::Binary, &key)
            .unwrap();
        writer.write(b"test").await.unwrap();

        let bytes = wire(factory);
        assert_eq!(bytes[4], 0x82);
        assert_eq!(bytes[5], 0x84);
        assert_eq!(&bytes[6..10], &key);

        let mut payload = bytes[10..].to_vec();
        apply_mask(&mut payload, key);
        assert_eq!(&payload, b"test");
    }

    #[tokio::test]
    async fn test_bad_masking_key() {
        let mut factory = sink();
        for key in [&[][..], &[1, 2, 3][..], &[1, 2, 3, 4, 5][..]] {
            assert!(matches!(
                factory.new_frame_writer_with_key(OpCode::Binary, key),
                Err(Error::BadMaskingKey)
            ));
        }
    }

    #[tokio::test]
    async fn test_unencodable_opcode_rejected() {
        let mut factory = sink();
        for opcode in [OpCode::Unknown, OpCode::Reserved(0x10)] {
            assert!(matches!(
                factory.new_frame_writer(opcode),
                Err(Error::UnsupportedOpCode(op)) if op == opcode
            ));
            assert!(matches!(
                factory.new_frame_writer_with_key(opcode, &[1, 2, 3, 4]),
                Err(Error::UnsupportedOpCode(_))
            ));
        }
        assert!(wire(factory).is_empty());
    }

    #[tokio::test]
    async fn test_random_mask_round_trip() {
        let mut factory = TcpFrameWriterFactory::new(Vec::new(), 1024, true);
        assert!(factory.is_masking());

        let payload: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();
        let mut writer = factory.new_frame_writer(OpCode::Binary).unwrap();
        assert!(writer.header().mask.is_some());
        writer.write(&payload).await.unwrap();

        let bytes = wire(factory);
        let mut readers = TcpFrameReaderFactory::new(&bytes[..], 64);
        let mut frame = readers.new_frame_reader().await.unwrap();
        assert_eq!(frame.payload_type(), OpCode::Binary);
        assert_eq!(frame.header_bytes().len(), 2 + 2 + 4);
        assert_eq!(&readers.read_to_end(&mut frame).await.unwrap()[..], &payload[..]);
    }

    #[tokio::test]
    async fn test_header_width_by_length() {
        for (len, header_len) in [(125usize, 2), (126, 4), (65535, 4), (65536, 10)] {
            let mut factory = sink();
            let payload = vec![0xAB; len];
            let n = factory
                .new_frame_writer(OpCode::Binary)
                .unwrap()
                .write(&payload)
                .await
                .unwrap();
            assert_eq!(n, PREAMBLE.len() + header_len + len, "length {}", len);

            let bytes = wire(factory);
            let mut readers = TcpFrameReaderFactory::new(&bytes[..], 4096);
            let frame = readers.new_frame_reader().await.unwrap();
            assert_eq!(frame.payload_len(), len as u64);
            assert_eq!(frame.header_bytes().len(), header_len);
        }
    }
}
