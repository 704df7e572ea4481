//! # Sockudo-TCPWS: WebSocket-style framing over raw TCP
//!
//! A small framing layer that borrows the WebSocket frame discipline
//! (fin/reserved bits, opcodes, variable-width lengths, optional masking,
//! continuation frames and a close frame) and runs it directly over any
//! async byte stream, without the HTTP upgrade handshake or extension
//! negotiation.
//!
//! ## Wire format
//!
//! ```text
//! [4B preamble 0x5A 0xA5 0x5A 0xA5]
//! [1B: fin(1) + rsv(3) + opcode(4)]
//! [1B: mask(1) + len-indicator(7)]
//! [0|2|8 bytes extended length, big-endian]
//! [0|4 bytes masking key]
//! [payload, XORed with the rotating key if masked]
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sockudo_tcpws::{Config, TcpConnection};
//! use tokio::net::TcpStream;
//!
//! let stream = TcpStream::connect("127.0.0.1:8080").await?;
//! let conn = Arc::new(TcpConnection::new(stream, Config::default()));
//!
//! conn.write(b"hello").await?;
//! let reply = conn.read_frame().await?;
//! conn.close().await?;
//! ```

pub mod connection;
pub mod deadline;
pub mod error;
pub mod frame;
pub mod handler;
pub mod mask;
pub mod reader;
pub mod writer;

pub use connection::{Connection, Message, TcpConnection};
pub use deadline::{Deadline, DeadlineHandle};
pub use error::{CloseReason, Error, Result};
pub use frame::{FrameHeader, OpCode};
pub use handler::{FrameHandler, Handled, TcpFrameHandler};
pub use reader::{FrameReader, FrameReaderFactory, TcpFrameReader, TcpFrameReaderFactory};
pub use writer::{FrameWriter, FrameWriterFactory, TcpFrameWriter, TcpFrameWriterFactory};

/// Marker written in front of every frame
pub const PREAMBLE: [u8; 4] = [0x5A, 0xA5, 0x5A, 0xA5];

/// Default ceiling for a single frame payload read by `read_frame` (32MB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 32 << 20;

/// Largest frame header including the preamble (4 + 2 + 8 + 4)
pub const MAX_HEADER_SIZE_WITH_PREAMBLE: usize = 18;

/// Largest payload length encoded directly in the indicator bits
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Largest payload length encoded with the 16-bit extended length
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// Default receive buffer size (64KB)
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Default send buffer size (16KB)
pub const SEND_BUFFER_SIZE: usize = 16 * 1024;

/// Configuration for framed connections
///
/// # Example
///
/// ```
/// use sockudo_tcpws::{Config, OpCode};
///
/// let config = Config::builder()
///     .max_payload_bytes(1024 * 1024)
///     .mask(true)
///     .payload_type(OpCode::Text)
///     .build();
/// assert!(config.mask);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum payload accepted by `read_frame` (0 = `DEFAULT_MAX_PAYLOAD_BYTES`)
    pub max_payload_bytes: usize,
    /// Mask outgoing payloads with a fresh random key per frame (default: false)
    pub mask: bool,
    /// Opcode used for frames sent with `Connection::write` (default: Binary)
    pub payload_type: OpCode,
    /// Status code sent by `Connection::close` (default: 1000)
    pub close_status: u16,
    /// Capacity of the buffered reader over the stream (default: 64KB)
    pub read_buffer_size: usize,
    /// Capacity of the buffered writer over the stream (default: 16KB)
    pub write_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload_bytes: 0,
            mask: false,
            payload_type: OpCode::Binary,
            close_status: CloseReason::NORMAL,
            read_buffer_size: RECV_BUFFER_SIZE,
            write_buffer_size: SEND_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// The payload ceiling with the zero-means-default rule applied
    #[inline]
    pub fn effective_max_payload_bytes(&self) -> usize {
        effective_max_payload(self.max_payload_bytes)
    }
}

#[inline]
pub(crate) fn effective_max_payload(max_payload_bytes: usize) -> usize {
    if max_payload_bytes == 0 {
        DEFAULT_MAX_PAYLOAD_BYTES
    } else {
        max_payload_bytes
    }
}

/// Builder for connection configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the maximum payload size accepted by `read_frame` (0 = default)
    pub fn max_payload_bytes(mut self, size: usize) -> Self {
        self.config.max_payload_bytes = size;
        self
    }

    /// Enable or disable payload masking on outgoing frames
    pub fn mask(mut self, enabled: bool) -> Self {
        self.config.mask = enabled;
        self
    }

    /// Set the opcode used by `Connection::write`
    pub fn payload_type(mut self, opcode: OpCode) -> Self {
        self.config.payload_type = opcode;
        self
    }

    /// Set the status code sent by `Connection::close`
    pub fn close_status(mut self, status: u16) -> Self {
        self.config.close_status = status;
        self
    }

    /// Set the buffered reader capacity
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the buffered writer capacity
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::connection::{Connection, Message, TcpConnection};
    pub use crate::error::{CloseReason, Error, Result};
    pub use crate::frame::OpCode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.max_payload_bytes, 0);
        assert_eq!(config.effective_max_payload_bytes(), 32 * 1024 * 1024);
        assert!(!config.mask);
        assert_eq!(config.payload_type, OpCode::Binary);
        assert_eq!(config.close_status, 1000);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .max_payload_bytes(10)
            .mask(true)
            .payload_type(OpCode::Text)
            .close_status(CloseReason::GOING_AWAY)
            .read_buffer_size(512)
            .write_buffer_size(256)
            .build();

        assert_eq!(config.effective_max_payload_bytes(), 10);
        assert!(config.mask);
        assert_eq!(config.payload_type, OpCode::Text);
        assert_eq!(config.close_status, 1001);
        assert_eq!(config.read_buffer_size, 512);
        assert_eq!(config.write_buffer_size, 256);
    }
}
