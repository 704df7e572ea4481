//! Frame header parsing and serialization
//!
//! Every frame starts with the 4-byte [`PREAMBLE`](crate::PREAMBLE), followed
//! by a WebSocket-style header:
//! - byte 0: FIN, RSV1-3, opcode
//! - byte 1: mask flag, 7-bit length indicator
//! - 2 or 8 bytes of big-endian extended length (indicator 126 / 127)
//! - 4-byte masking key when the mask flag is set
//!
//! Decoding pulls one byte at a time from a buffered reader and fails on the
//! first preamble mismatch; there is no resynchronization.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::{MEDIUM_MESSAGE_THRESHOLD, PREAMBLE, SMALL_MESSAGE_THRESHOLD};

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continuation frame
    Continuation,
    /// Text frame
    Text,
    /// Binary frame
    Binary,
    /// Connection close
    Close,
    /// Any other 4-bit opcode, passed through uninterpreted
    Reserved(u8),
    /// No payload type known yet
    Unknown,
}

impl OpCode {
    /// Byte value reported for [`OpCode::Unknown`]
    pub const UNKNOWN_BYTE: u8 = 0xFF;

    /// Parse opcode from byte
    #[inline]
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            Self::UNKNOWN_BYTE => OpCode::Unknown,
            other => OpCode::Reserved(other),
        }
    }

    /// Byte value of this opcode
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Reserved(b) => b,
            OpCode::Unknown => Self::UNKNOWN_BYTE,
        }
    }

    /// Whether this opcode fits the 4-bit header field
    ///
    /// [`OpCode::Unknown`] and out-of-range `Reserved` values cannot be sent.
    #[inline]
    pub fn is_encodable(self) -> bool {
        self.as_u8() <= 0x0F
    }
}

/// A frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// RSV1-3, carried but never interpreted
    pub rsv: [bool; 3],
    /// Frame opcode
    pub opcode: OpCode,
    /// Payload length
    pub payload_len: u64,
    /// Masking key (if masked)
    pub mask: Option<[u8; 4]>,
    /// Header bytes exactly as read, without the preamble
    raw: Bytes,
}

impl FrameHeader {
    /// Create a final, unreserved header for an outgoing frame
    pub fn new(opcode: OpCode, payload_len: u64, mask: Option<[u8; 4]>) -> Self {
        Self {
            fin: true,
            rsv: [false; 3],
            opcode,
            payload_len,
            mask,
            raw: Bytes::new(),
        }
    }

    /// Header bytes as they were decoded (empty for locally built headers)
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Header size in bytes, without the preamble
    #[inline]
    pub fn header_size(&self) -> usize {
        if !self.raw.is_empty() {
            return self.raw.len();
        }

        let mut size = 2;
        if self.payload_len > MEDIUM_MESSAGE_THRESHOLD as u64 {
            size += 8;
        } else if self.payload_len > SMALL_MESSAGE_THRESHOLD as u64 {
            size += 2;
        }
        if self.mask.is_some() {
            size += 4;
        }
        size
    }

    /// Total frame size: preamble + header + payload
    ///
    /// Saturates at `u64::MAX` for announced lengths near the limit.
    #[inline]
    pub fn frame_len(&self) -> u64 {
        ((PREAMBLE.len() + self.header_size()) as u64).saturating_add(self.payload_len)
    }

    /// Decode a header from `src`, preamble included
    ///
    /// A preamble mismatch fails with [`Error::BadPreamble`]. Short reads
    /// surface as the underlying I/O error.
    pub async fn read_from<R>(src: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        for expected in PREAMBLE {
            if src.read_u8().await? != expected {
                return Err(Error::BadPreamble);
            }
        }

        let mut raw = BytesMut::with_capacity(crate::MAX_HEADER_SIZE_WITH_PREAMBLE);

        let b0 = src.read_u8().await?;
        raw.put_u8(b0);
        let fin = b0 & 0x80 != 0;
        let rsv = [b0 & 0x40 != 0, b0 & 0x20 != 0, b0 & 0x10 != 0];
        let opcode = OpCode::from_u8(b0 & 0x0F);

        let b1 = src.read_u8().await?;
        raw.put_u8(b1);
        let masked = b1 & 0x80 != 0;

        let payload_len = match b1 & 0x7F {
            126 => {
                let len = src.read_u16().await?;
                raw.put_u16(len);
                len as u64
            }
            127 => {
                let len = src.read_u64().await?;
                raw.put_u64(len);
                len
            }
            len => len as u64,
        };

        let mask = if masked {
            let mut key = [0u8; 4];
            src.read_exact(&mut key).await?;
            raw.put_slice(&key);
            Some(key)
        } else {
            None
        };

        Ok(Self {
            fin,
            rsv,
            opcode,
            payload_len,
            mask,
            raw: raw.freeze(),
        })
    }

    /// Encode preamble and header into `buf`
    #[inline]
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(PREAMBLE.len() + self.header_size());
        buf.put_slice(&PREAMBLE);

        // First byte: FIN, RSV1-3, opcode
        let mut b0 = self.opcode.as_u8() & 0x0F;
        if self.fin {
            b0 |= 0x80;
        }
        for (i, set) in self.rsv.iter().enumerate() {
            if *set {
                b0 |= 1 << (6 - i);
            }
        }
        buf.put_u8(b0);

        // Second byte: mask flag, payload length
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };

        if self.payload_len <= SMALL_MESSAGE_THRESHOLD as u64 {
            buf.put_u8(mask_bit | self.payload_len as u8);
        } else if self.payload_len <= MEDIUM_MESSAGE_THRESHOLD as u64 {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(self.payload_len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(self.payload_len);
        }

        if let Some(mask) = self.mask {
            buf.put_slice(&mask);
        }
    }
}
