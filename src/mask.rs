//! Frame masking utilities
//!
//! Payloads are XORed with a repeating 4-byte key. Reads may stop anywhere
//! inside a frame, so unmasking takes the byte offset into the payload and
//! rotates the key accordingly.

use std::io;

/// Generate a fresh masking key from the operating system CSPRNG.
#[inline]
pub fn generate_mask() -> io::Result<[u8; 4]> {
    let mut key = [0u8; 4];
    getrandom::getrandom(&mut key).map_err(io::Error::other)?;
    Ok(key)
}

/// XOR `data` in place with the repeating key, starting at key index 0.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    if data.is_empty() {
        return;
    }

    // 8 bytes at a time, then the tail
    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ mask_u64;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// XOR `data` in place with the key rotated to start at payload position `offset`.
///
/// `offset` is the number of payload bytes already processed in this frame.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], mask: [u8; 4], offset: u64) {
    let offset = (offset & 3) as usize;
    if offset == 0 {
        apply_mask(data, mask);
        return;
    }

    let rotated_mask = [
        mask[offset],
        mask[(offset + 1) & 3],
        mask[(offset + 2) & 3],
        mask[(offset + 3) & 3],
    ];
    apply_mask(data, rotated_mask);
}
