//! Internet checksum (RFC 1071)

/// Accumulate big-endian 16-bit words of `data` into a 32-bit sum.
///
/// An odd trailing byte is padded with zero.
pub fn sum_words(data: &[u8], initial: u32) -> u32 {
    let mut sum = initial;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([chunk[0], chunk[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u16::from_be_bytes([*last, 0]) as u32);
    }
    sum
}

/// Fold a 32-bit sum to 16 bits and take the one's complement
pub fn finish(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// One's complement checksum over `data`
pub fn checksum(data: &[u8]) -> u16 {
    finish(sum_words(data, 0))
}
