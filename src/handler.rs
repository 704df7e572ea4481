//! Frame handling: continuation resolution and the close frame
//!
//! The handler sees every decoded frame before the connection reads its
//! payload. It can pass the frame on (possibly rewritten), drop it, or end
//! the stream.

use std::future::Future;

use crate::error::{CloseReason, Result};
use crate::frame::OpCode;
use crate::reader::FrameReader;
use crate::writer::{FrameWriter, FrameWriterFactory};

/// Outcome of handling one decoded frame
#[derive(Debug)]
pub enum Handled<F> {
    /// Deliver this frame's payload to the caller
    Frame(F),
    /// Skip the frame; its payload is drained before the next header is decoded
    Filtered(F),
    /// The peer ended the session
    EndOfStream,
}

/// Interprets decoded frames and writes close frames
pub trait FrameHandler<F: FrameReader>: Send {
    /// Classify a decoded frame
    fn handle_frame(&mut self, frame: F) -> Result<Handled<F>>;

    /// Write a close frame carrying `status`
    fn write_close<W>(writers: &mut W, status: u16) -> impl Future<Output = Result<()>> + Send
    where
        W: FrameWriterFactory;
}

/// Default handler for the preamble-delimited format
///
/// Continuation frames take the type of the most recent text or binary
/// frame. A continuation frame with no such predecessor reports
/// [`OpCode::Unknown`].
#[derive(Debug, Clone)]
pub struct TcpFrameHandler {
    payload_type: OpCode,
}

impl TcpFrameHandler {
    /// Create a handler with no payload type recorded
    pub fn new() -> Self {
        Self {
            payload_type: OpCode::Unknown,
        }
    }

    /// Payload type of the message currently being received
    #[inline]
    pub fn payload_type(&self) -> OpCode {
        self.payload_type
    }
}

impl Default for TcpFrameHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FrameReader> FrameHandler<F> for TcpFrameHandler {
    fn handle_frame(&mut self, mut frame: F) -> Result<Handled<F>> {
        match frame.payload_type() {
            OpCode::Continuation => frame.set_payload_type(self.payload_type),
            opcode @ (OpCode::Text | OpCode::Binary) => self.payload_type = opcode,
            OpCode::Close => {
                tracing::debug!(payload_len = frame.payload_len(), "close frame received");
                return Ok(Handled::EndOfStream);
            }
            _ => {}
        }

        Ok(Handled::Frame(frame))
    }

    async fn write_close<W>(writers: &mut W, status: u16) -> Result<()>
    where
        W: FrameWriterFactory,
    {
        let mut writer = writers.new_frame_writer(OpCode::Close)?;
        writer.write(&CloseReason::new(status).to_payload()).await?;
        writer.close().await?;
        tracing::debug!(status, "close frame sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameHeader;
    use crate::reader::{FrameReaderFactory, TcpFrameReader, TcpFrameReaderFactory};
    use crate::writer::TcpFrameWriterFactory;

    fn frame(opcode: OpCode, fin: bool) -> TcpFrameReader {
        let mut header = FrameHeader::new(opcode, 0, None);
        header.fin = fin;
        TcpFrameReader::new(header)
    }

    fn expect_frame(handled: Result<Handled<TcpFrameReader>>) -> TcpFrameReader {
        match handled {
            Ok(Handled::Frame(frame)) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_continuation_takes_text_type() {
        let mut handler = TcpFrameHandler::new();

        let first = expect_frame(handler.handle_frame(frame(OpCode::Text, false)));
        assert_eq!(first.payload_type(), OpCode::Text);

        let next = expect_frame(handler.handle_frame(frame(OpCode::Continuation, true)));
        assert_eq!(next.payload_type(), OpCode::Text);
        assert_eq!(handler.payload_type(), OpCode::Text);
    }

    #[test]
    fn test_binary_replaces_held_type() {
        let mut handler = TcpFrameHandler::new();
        expect_frame(handler.handle_frame(frame(OpCode::Text, true)));
        expect_frame(handler.handle_frame(frame(OpCode::Binary, false)));

        let next = expect_frame(handler.handle_frame(frame(OpCode::Continuation, true)));
        assert_eq!(next.payload_type(), OpCode::Binary);
    }

    #[test]
    fn test_isolated_continuation_is_unknown() {
        let mut handler = TcpFrameHandler::new();
        let next = expect_frame(handler.handle_frame(frame(OpCode::Continuation, true)));
        assert_eq!(next.payload_type(), OpCode::Unknown);
    }

    #[test]
    fn test_reserved_opcode_passes_through() {
        let mut handler = TcpFrameHandler::new();
        expect_frame(handler.handle_frame(frame(OpCode::Text, true)));

        let other = expect_frame(handler.handle_frame(frame(OpCode::Reserved(0x9), true)));
        assert_eq!(other.payload_type(), OpCode::Reserved(0x9));
        assert_eq!(handler.payload_type(), OpCode::Text);
    }

    #[test]
    fn test_close_ends_stream() {
        let mut handler = TcpFrameHandler::new();
        assert!(matches!(
            handler.handle_frame(frame(OpCode::Close, true)),
            Ok(Handled::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn test_write_close_payload() {
        let mut writers = TcpFrameWriterFactory::new(Vec::new(), 64, true);
        <TcpFrameHandler as FrameHandler<TcpFrameReader>>::write_close(
            &mut writers,
            CloseReason::NORMAL,
        )
        .await
        .unwrap();

        let wire = writers.into_inner().into_inner();
        let mut readers = TcpFrameReaderFactory::new(&wire[..], 64);
        let mut close = readers.new_frame_reader().await.unwrap();
        assert_eq!(close.payload_type(), OpCode::Close);

        let payload = readers.read_to_end(&mut close).await.unwrap();
        assert_eq!(&payload[..], &[0x03, 0xE8]);
        assert_eq!(CloseReason::parse(&payload).unwrap().code, 1000);

        let mut handler = TcpFrameHandler::new();
        let mut readers = TcpFrameReaderFactory::new(&wire[..], 64);
        let decoded = readers.new_frame_reader().await.unwrap();
        assert!(matches!(
            handler.handle_frame(decoded),
            Ok(Handled::EndOfStream)
        ));
    }
}
