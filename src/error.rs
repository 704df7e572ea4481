//! Error types for framed connections

use std::fmt;
use std::io;

use crate::frame::OpCode;

/// Result type alias for framing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Framing error types
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying stream
    Io(io::Error),
    /// Frame did not start with the expected preamble
    BadPreamble,
    /// Masking key is not exactly 4 bytes
    BadMaskingKey,
    /// Frame payload exceeds the configured maximum
    FrameTooLarge,
    /// End of stream: a close frame arrived or the stream ended
    ConnectionClosed,
    /// Deadline requested on a stream that does not support deadlines
    DeadlineUnsupported,
    /// Opcode has no 4-bit wire encoding
    UnsupportedOpCode(OpCode),
}

/// Close frame status codes
///
/// The codes are carried as opaque values; nothing here validates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code
    pub code: u16,
}

impl CloseReason {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Going away (e.g., server shutdown)
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Unsupported data
    pub const UNSUPPORTED: u16 = 1003;
    /// Frame too large
    pub const FRAME_TOO_LARGE: u16 = 1004;
    /// No status received
    pub const NO_STATUS: u16 = 1005;
    /// Abnormal closure
    pub const ABNORMAL: u16 = 1006;
    /// Invalid frame payload
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Policy violation
    pub const POLICY: u16 = 1008;
    /// Message too big
    pub const TOO_BIG: u16 = 1009;
    /// Mandatory extension
    pub const EXTENSION: u16 = 1010;
    /// Internal server error
    pub const INTERNAL: u16 = 1011;

    /// Create a new close reason
    pub fn new(code: u16) -> Self {
        Self { code }
    }

    /// Encode the status as a close frame payload
    #[inline]
    pub fn to_payload(self) -> [u8; 2] {
        self.code.to_be_bytes()
    }

    /// Parse a close frame payload
    ///
    /// Returns `None` when the payload is shorter than the 2-byte status.
    /// Trailing bytes after the status are ignored.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            [hi, lo, ..] => Some(Self::new(u16::from_be_bytes([*hi, *lo]))),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::BadPreamble => write!(f, "Bad frame preamble"),
            Error::BadMaskingKey => write!(f, "Bad masking key"),
            Error::FrameTooLarge => write!(f, "Frame too large"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::DeadlineUnsupported => {
                write!(f, "Cannot set deadline: stream does not support deadlines")
            }
            Error::UnsupportedOpCode(op) => write!(f, "Cannot send opcode {:?}", op),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::ConnectionClosed => {
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed")
            }
            Error::BadPreamble | Error::BadMaskingKey => {
                io::Error::new(io::ErrorKind::InvalidData, e.to_string())
            }
            Error::DeadlineUnsupported => io::Error::new(io::ErrorKind::Unsupported, e.to_string()),
            Error::UnsupportedOpCode(_) => io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            other => io::Error::other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_closed() {
        let err: Error = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[test]
    fn test_other_io_kept_verbatim() {
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "deadline").into();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_close_reason_payload() {
        let reason = CloseReason::new(CloseReason::NORMAL);
        assert_eq!(reason.to_payload(), [0x03, 0xE8]);
        assert_eq!(CloseReason::parse(&[0x03, 0xE8]), Some(reason));
        assert_eq!(CloseReason::parse(&[0x03, 0xF1, b'x']).unwrap().code, 1009);
        assert_eq!(CloseReason::parse(&[0x03]), None);
    }

    #[test]
    fn test_into_io_error() {
        let err: io::Error = Error::BadPreamble.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err: io::Error = Error::ConnectionClosed.into();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
