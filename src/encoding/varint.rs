//! Variable length integers using protobuf's LEB128 scheme. Most numbers in a snapshot are small
//! (run lengths, chunk tags), so this saves a lot of space over fixed width integers.
//!
//! The encoding format is described in
//! [google's protobuf documentation](https://developers.google.com/protocol-buffers/docs/encoding)

use std::mem::size_of;
use crate::encoding::parseerror::ParseError;

/// Encode u64 as varint.
/// Panics if buffer length is less than 10.
pub fn encode_leb_u64(mut value: u64, buf: &mut [u8]) -> usize {
    assert!(buf.len() >= 10);

    let mut i = 0;
    loop {
        if (value & !0x7F) > 0 {
            buf[i] = ((value & 0x7F) | 0x80) as u8;
            value >>= 7;
            i += 1;
        } else {
            buf[i] = value as u8;
            return i + 1;
        }
    }
}

/// Returns (varint, number of bytes read).
pub fn decode_leb_u64(buf: &[u8]) -> Result<(u64, usize), ParseError> {
    if buf.is_empty() {
        return Err(ParseError::UnexpectedEOF);
    } else if buf[0] < 0x80 {
        // The most common case
        return Ok((buf[0] as u64, 1));
    }

    let mut r: u64 = 0;
    for (i, &b) in buf.iter().enumerate() {
        if i == 10 || (i == 9 && (b & 0x7f) > 1) {
            return Err(ParseError::InvalidVarInt);
        }
        r |= ((b & 0x7f) as u64) << (i * 7);
        if b < 0x80 {
            return Ok((r, i + 1));
        }
    }
    Err(ParseError::UnexpectedEOF)
}

pub fn decode_leb_u32(buf: &[u8]) -> Result<(u32, usize), ParseError> {
    let (val, bytes_consumed) = decode_leb_u64(buf)?;
    let val = u32::try_from(val).map_err(|_| ParseError::InvalidVarInt)?;
    Ok((val, bytes_consumed))
}

pub fn decode_leb_usize(buf: &[u8]) -> Result<(usize, usize), ParseError> {
    if size_of::<usize>() <= size_of::<u32>() {
        let (val, count) = decode_leb_u32(buf)?;
        Ok((val as usize, count))
    } else {
        let (val, count) = decode_leb_u64(buf)?;
        Ok((val as usize, count))
    }
}

#[cfg(test)]
mod test {
    use rand::prelude::*;
    use super::*;

    fn check_enc_dec(val: u64) {
        let mut buf = [0u8; 10];
        let bytes_used = encode_leb_u64(val, &mut buf);

        assert_eq!(decode_leb_u64(&buf).unwrap(), (val, bytes_used));
        assert_eq!(decode_leb_u64(&buf[..bytes_used]).unwrap(), (val, bytes_used));
        if bytes_used > 1 {
            assert_eq!(decode_leb_u64(&buf[..bytes_used - 1]), Err(ParseError::UnexpectedEOF));
        }
    }

    #[test]
    fn simple_encode() {
        // Encoding example from https://developers.google.com/protocol-buffers/docs/encoding:
        let mut result = [0u8; 10];
        assert_eq!(2, encode_leb_u64(300, &mut result[..]));
        assert_eq!(result[0], 0b10101100);
        assert_eq!(result[1], 0b00000010);
    }

    #[test]
    fn enc_edge_cases() {
        check_enc_dec(0);
        check_enc_dec(1);
        check_enc_dec(127);
        check_enc_dec(128);
        check_enc_dec(u32::MAX as u64);
        check_enc_dec(u64::MAX);
    }

    #[test]
    fn fuzz_encode() {
        let mut rng = SmallRng::seed_from_u64(20);

        for _i in 0..2000 {
            let x: u64 = rng.gen();
            for bits in 0..64 {
                check_enc_dec(x >> bits);
            }
        }
    }

    #[test]
    fn leb_conformance_test() {
        // From the wikipedia entry on LEB128
        let bytes = [0xE5, 0x8E, 0x26];
        let (result, bytes) = decode_leb_u64(&bytes).unwrap();
        assert_eq!(bytes, 3);
        assert_eq!(result, 624485);
    }

    #[test]
    fn overlong_varints_rejected() {
        let bytes = [0xff; 11];
        assert_eq!(decode_leb_u64(&bytes), Err(ParseError::InvalidVarInt));

        let mut buf = [0u8; 10];
        let len = encode_leb_u64(u32::MAX as u64 + 1, &mut buf);
        assert_eq!(decode_leb_u32(&buf[..len]), Err(ParseError::InvalidVarInt));
    }
}
