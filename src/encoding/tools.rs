use crate::encoding::varint::encode_leb_u64;
use crate::encoding::ChunkType;

pub(crate) fn push_u64(into: &mut Vec<u8>, val: u64) {
    let mut buf = [0u8; 10];
    let pos = encode_leb_u64(val, &mut buf);
    into.extend_from_slice(&buf[..pos]);
}

pub(crate) fn push_usize(into: &mut Vec<u8>, val: usize) {
    push_u64(into, val as u64);
}

pub(crate) fn push_u32(into: &mut Vec<u8>, val: u32) {
    push_u64(into, val as u64);
}

pub(crate) fn push_str(into: &mut Vec<u8>, val: &str) {
    let bytes = val.as_bytes();
    push_usize(into, bytes.len());
    into.extend_from_slice(bytes);
}

pub(crate) fn push_u32_le(into: &mut Vec<u8>, val: u32) {
    // This is used for the checksum.
    into.extend_from_slice(&val.to_le_bytes());
}

pub(crate) fn push_chunk(into: &mut Vec<u8>, chunk_type: ChunkType, data: &[u8]) {
    push_u32(into, chunk_type as u32);
    push_usize(into, data.len());
    into.extend_from_slice(data);
}
