use std::mem::size_of;
use crate::encoding::parseerror::ParseError;
use crate::encoding::varint::{decode_leb_u32, decode_leb_u64, decode_leb_usize};
use crate::encoding::ChunkType;

#[derive(Debug, Clone)]
pub(crate) struct BufParser<'a>(pub(crate) &'a [u8]);

impl<'a> BufParser<'a> {
    #[inline]
    pub(crate) fn check_has_bytes(&self, num: usize) -> Result<(), ParseError> {
        if self.0.len() < num { Err(ParseError::UnexpectedEOF) } else { Ok(()) }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn expect_empty(&self) -> Result<(), ParseError> {
        if self.is_empty() { Ok(()) } else { Err(ParseError::InvalidLength) }
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn peek_u32(&self) -> Result<Option<u32>, ParseError> {
        if self.is_empty() { return Ok(None); }
        Ok(Some(decode_leb_u32(self.0)?.0))
    }

    pub(crate) fn next_u32(&mut self) -> Result<u32, ParseError> {
        let (val, count) = decode_leb_u32(self.0)?;
        self.0 = &self.0[count..];
        Ok(val)
    }

    pub(crate) fn next_u32_le(&mut self) -> Result<u32, ParseError> {
        let bytes = self.next_n_bytes(size_of::<u32>())?;
        let bytes: [u8; 4] = bytes.try_into().map_err(|_| ParseError::UnexpectedEOF)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub(crate) fn next_u64(&mut self) -> Result<u64, ParseError> {
        let (val, count) = decode_leb_u64(self.0)?;
        self.0 = &self.0[count..];
        Ok(val)
    }

    pub(crate) fn next_usize(&mut self) -> Result<usize, ParseError> {
        let (val, count) = decode_leb_usize(self.0)?;
        self.0 = &self.0[count..];
        Ok(val)
    }

    pub(crate) fn next_n_bytes(&mut self, num_bytes: usize) -> Result<&'a [u8], ParseError> {
        if num_bytes > self.0.len() { return Err(ParseError::UnexpectedEOF); }

        let (data, remainder) = self.0.split_at(num_bytes);
        self.0 = remainder;
        Ok(data)
    }

    // Note the result is attached to the lifetime 'a, not the lifetime of self.
    pub(crate) fn next_str(&mut self) -> Result<&'a str, ParseError> {
        let len = self.next_usize()?;
        if len > self.0.len() { return Err(ParseError::InvalidLength); }

        let bytes = self.next_n_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)
    }

    fn next_chunk_raw(&mut self) -> Result<(ChunkType, BufParser<'a>), ParseError> {
        let chunk_type = ChunkType::try_from(self.next_u32()?)
            .map_err(|_| ParseError::UnknownChunk);

        let len = self.next_usize()?;
        if len > self.0.len() {
            return Err(ParseError::InvalidLength);
        }

        let reader = BufParser(self.next_n_bytes(len)?);

        // Still consume the chunk's bytes when the type is unknown, so the caller can skip it.
        Ok((chunk_type?, reader))
    }

    /// Read the next chunk, skipping any chunks with a type we don't recognise.
    pub(crate) fn next_chunk(&mut self) -> Result<(ChunkType, BufParser<'a>), ParseError> {
        loop {
            match self.next_chunk_raw() {
                Err(ParseError::UnknownChunk) => {}, // Keep scanning.
                c => { return c; }
            }
        }
    }

    pub(crate) fn skip_unknown_chunks(&mut self) -> Result<(), ParseError> {
        while let Some(actual) = self.peek_u32()? {
            if ChunkType::try_from(actual).is_ok() { break; }
            match self.next_chunk_raw() {
                Err(ParseError::UnknownChunk) | Ok(_) => {},
                Err(e) => { return Err(e); }
            }
        }
        Ok(())
    }

    /// Read a chunk with the named type. Returns None if the next chunk isn't the specified type,
    /// or we hit EOF.
    pub(crate) fn read_chunk_if_eq(&mut self, expect_chunk_type: ChunkType) -> Result<Option<BufParser<'a>>, ParseError> {
        self.skip_unknown_chunks()?;
        match self.peek_u32()? {
            Some(actual) if actual == expect_chunk_type as u32 => {
                self.next_chunk().map(|(_type, c)| Some(c))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn expect_chunk(&mut self, expect_chunk_type: ChunkType) -> Result<BufParser<'a>, ParseError> {
        let (actual_chunk_type, r) = self.next_chunk()?;
        if actual_chunk_type == expect_chunk_type {
            Ok(r)
        } else {
            Err(ParseError::MissingChunk(expect_chunk_type as _))
        }
    }
}
