//! MQTT remaining-length codec: base 128, continuation bit in the top bit
//! of each byte, at most four bytes.

use super::types::TransportError;
use bytes::{BufMut, BytesMut};

/// Largest value representable in four encoded bytes.
pub const MAX_REMAINING_LENGTH: u32 = 268_435_455;

/// Decodes a remaining-length field, returning the value and the number of
/// encoding bytes consumed.
///
/// This algorithm is adapted from the MQTT v3.1.1 spec. A fifth continuation
/// byte is `InvalidLength`, never a larger value; running out of input while
/// the continuation bit is set is `Truncated`.
pub fn decode(buf: &[u8]) -> Result<(u32, usize), TransportError> {
    let mut multiplier: u32 = 1;
    let mut value: u32 = 0;

    for (consumed, &encoded_byte) in buf.iter().enumerate() {
        if multiplier > 128 * 128 * 128 {
            return Err(TransportError::InvalidLength);
        }

        value += ((encoded_byte & 0b0111_1111) as u32) * multiplier;
        multiplier *= 128;

        if encoded_byte & 0b1000_0000 == 0 {
            return Ok((value, consumed + 1));
        }
    }

    if buf.len() >= 4 {
        Err(TransportError::InvalidLength)
    } else {
        Err(TransportError::Truncated)
    }
}

/// Encodes `value` in the minimal number of bytes, setting the continuation
/// bit on every byte but the last. Returns the number of bytes written.
pub fn encode(value: u32, bytes: &mut BytesMut) -> usize {
    let mut x = value;
    let mut byte_counter = 0;

    loop {
        let mut encoded_byte: u8 = (x % 128) as u8;
        x /= 128;

        if x > 0 {
            encoded_byte |= 128;
        }

        bytes.put_u8(encoded_byte);
        byte_counter += 1;

        if x == 0 {
            break;
        }
    }

    byte_counter
}

/// Number of bytes `encode` will emit for `value`.
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}
