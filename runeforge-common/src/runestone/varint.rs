//! LEB128 variable-length integers over `u128`.
//!
//! Every integer in a runestone payload is a little-endian base-128 varint.
//! A `u128` never needs more than 19 bytes; anything longer is rejected, as is
//! a final byte carrying bits beyond bit 127.

use super::CodecError;

/// Longest valid encoding of a `u128`.
pub const MAX_VARINT_LEN: usize = 19;

/// Append the encoding of `n` to `buf`.
pub fn encode_to_vec(mut n: u128, buf: &mut Vec<u8>) {
    while n >> 7 > 0 {
        buf.push(n.to_le_bytes()[0] | 0b1000_0000);
        n >>= 7;
    }
    buf.push(n.to_le_bytes()[0]);
}

/// Encode `n` into a fresh buffer.
pub fn encode(n: u128) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    encode_to_vec(n, &mut buf);
    buf
}

/// Decode one varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(u128, usize), CodecError> {
    let mut n = 0u128;

    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(CodecError::VarintOverlong);
        }

        let value = u128::from(byte) & 0b0111_1111;

        // the 19th byte may only contribute the top two bits of a u128
        if i == MAX_VARINT_LEN - 1 && value & 0b0111_1100 != 0 {
            return Err(CodecError::VarintOverflow);
        }

        n |= value << (7 * i);

        if byte & 0b1000_0000 == 0 {
            return Ok((n, i + 1));
        }
    }

    Err(CodecError::VarintUnterminated)
}

/// Decode a whole payload into its integer sequence.
pub fn decode_all(payload: &[u8]) -> Result<Vec<u128>, CodecError> {
    let mut integers = Vec::new();
    let mut i = 0;

    while i < payload.len() {
        let (integer, length) = decode(&payload[i..])?;
        integers.push(integer);
        i += length;
    }

    Ok(integers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_one_byte() {
        assert_eq!(encode(0), vec![0]);
        assert_eq!(decode(&[0]).unwrap(), (0, 1));
    }

    #[test]
    fn boundaries_round_trip() {
        for n in [1u128, 127, 128, 16_383, 16_384, u64::MAX as u128, u128::MAX] {
            let encoded = encode(n);
            assert!(encoded.len() <= MAX_VARINT_LEN);
            assert_eq!(decode(&encoded).unwrap(), (n, encoded.len()));
        }
    }

    #[test]
    fn max_value_uses_all_bytes() {
        assert_eq!(encode(u128::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn unterminated_varint_is_rejected() {
        assert_eq!(decode(&[0x80]), Err(CodecError::VarintUnterminated));
        assert_eq!(decode(&[]), Err(CodecError::VarintUnterminated));
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let mut bytes = vec![0x80; MAX_VARINT_LEN];
        bytes.push(0);
        assert_eq!(decode(&bytes), Err(CodecError::VarintOverlong));
    }

    #[test]
    fn overflowing_varint_is_rejected() {
        let mut bytes = vec![0xff; MAX_VARINT_LEN - 1];
        bytes.push(0b0000_0100);
        assert_eq!(decode(&bytes), Err(CodecError::VarintOverflow));
    }

    #[test]
    fn decode_all_splits_sequence() {
        let mut payload = Vec::new();
        encode_to_vec(2, &mut payload);
        encode_to_vec(300, &mut payload);
        encode_to_vec(u128::MAX, &mut payload);
        assert_eq!(decode_all(&payload).unwrap(), vec![2, 300, u128::MAX]);
    }
}
