use crate::types::{ESCAPE_BYTE, FLAG_BYTE};

/// Byte-stuffs `payload` and wraps it with the flag byte on both ends.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(FLAG_BYTE);
    for &byte in payload {
        if byte == FLAG_BYTE || byte == ESCAPE_BYTE {
            out.push(ESCAPE_BYTE);
        }
        out.push(byte);
    }
    out.push(FLAG_BYTE);
    out
}

/// Removes escaping and strips the leading and trailing flag bytes.
///
/// Input shorter than the two delimiters decodes to an empty payload.
pub fn decode(escaped: &[u8]) -> Vec<u8> {
    let mut unstuffed = Vec::with_capacity(escaped.len());
    let mut bytes = escaped.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        if byte == ESCAPE_BYTE {
            if let Some(&next) = bytes.peek() {
                if next == FLAG_BYTE || next == ESCAPE_BYTE {
                    unstuffed.push(next);
                    bytes.next();
                    continue;
                }
            }
        }
        unstuffed.push(byte);
    }

    if unstuffed.len() < 2 {
        return Vec::new();
    }
    unstuffed[1..unstuffed.len() - 1].to_vec()
}

/// XOR parity over every byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Returns a copy of `bytes` with one bit inverted.
///
/// Out-of-range positions leave the copy untouched.
pub fn flip_bit(bytes: &[u8], byte_index: usize, bit_index: u8) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if let Some(byte) = out.get_mut(byte_index) {
        *byte ^= 1u8 << (bit_index % 8);
    }
    out
}
