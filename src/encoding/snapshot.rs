use smallvec::SmallVec;
use tracing::trace;

use crate::changeset::{Changeset, Component};
use crate::encoding::bufparser::BufParser;
use crate::encoding::parseerror::ParseError;
use crate::encoding::tools::{push_chunk, push_str, push_u32, push_u32_le, push_u64, push_usize};
use crate::encoding::{calc_checksum, ChunkType, RunTag, MAGIC_BYTES};
use crate::unicount::{count_chars, take_first_chars};
use crate::Revision;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_VERSION: u64 = 1;

/// Crc chunk: 1 byte tag, 1 byte length, 4 byte checksum.
const CRC_CHUNK_LEN: usize = 6;

/// Everything needed to bring a service back with its unacknowledged edits intact.
///
/// The view isn't stored. Its always `local(submitted(server_text))`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollabSnapshot {
    pub version: u64,
    pub head_revision: Revision,
    pub server_text: String,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub submitted: Option<Changeset>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub local: Option<Changeset>,
}

fn write_changeset(into: &mut Vec<u8>, changeset: &Changeset) {
    push_usize(into, changeset.components().len());
    for c in changeset.components() {
        let (tag, len) = match *c {
            Component::Retain(len) => (RunTag::Retain, len),
            Component::Delete(len) => (RunTag::Delete, len),
            Component::Insert(len) => (RunTag::Insert, len),
        };
        push_u32(into, tag as u32);
        push_usize(into, len);
    }
    push_str(into, changeset.inserted_content());
}

fn read_changeset(reader: &mut BufParser) -> Result<Changeset, ParseError> {
    let count = reader.next_usize()?;
    // Each run takes at least 2 bytes.
    if count > reader.len() / 2 { return Err(ParseError::InvalidLength); }

    let mut runs: SmallVec<[(RunTag, usize); 4]> = SmallVec::with_capacity(count);
    let mut inserted = 0;
    for _ in 0..count {
        let tag = RunTag::try_from(reader.next_u32()?)
            .map_err(|_| ParseError::InvalidComponent)?;
        let len = reader.next_usize()?;
        if len == 0 { return Err(ParseError::InvalidComponent); }
        if tag == RunTag::Insert { inserted += len; }
        runs.push((tag, len));
    }

    let mut content = reader.next_str()?;
    if count_chars(content) != inserted { return Err(ParseError::InvalidLength); }

    let mut result = Changeset::new();
    for (tag, len) in runs {
        match tag {
            RunTag::Retain => result.retain(len),
            RunTag::Delete => result.delete(len),
            RunTag::Insert => result.push_insert(take_first_chars(&mut content, len), len),
        }
    }
    Ok(result)
}

impl CollabSnapshot {
    /// Check the changesets line up with the server text.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(ParseError::UnsupportedVersion(self.version));
        }

        let mut len = count_chars(&self.server_text);
        for changeset in [&self.submitted, &self.local].into_iter().flatten() {
            if changeset.source_len() != len { return Err(ParseError::InvalidLength); }
            len = changeset.target_len();
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.server_text.len() + 32);
        result.extend_from_slice(&MAGIC_BYTES);
        push_u64(&mut result, self.version);

        let mut buf = Vec::new();
        push_u64(&mut buf, self.head_revision);
        push_chunk(&mut result, ChunkType::HeadRevision, &buf);

        push_chunk(&mut result, ChunkType::ServerText, self.server_text.as_bytes());

        for (chunk_type, changeset) in [(ChunkType::Submitted, &self.submitted), (ChunkType::Local, &self.local)] {
            if let Some(changeset) = changeset {
                buf.clear();
                write_changeset(&mut buf, changeset);
                push_chunk(&mut result, chunk_type, &buf);
            }
        }

        let checksum = calc_checksum(&result);
        buf.clear();
        push_u32_le(&mut buf, checksum);
        push_chunk(&mut result, ChunkType::Crc, &buf);

        trace!(bytes = result.len(), "encoded snapshot");
        result
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BufParser(bytes);
        reader.check_has_bytes(MAGIC_BYTES.len())?;
        if reader.next_n_bytes(MAGIC_BYTES.len())? != MAGIC_BYTES {
            return Err(ParseError::InvalidMagic);
        }
        if bytes.len() < MAGIC_BYTES.len() + CRC_CHUNK_LEN {
            return Err(ParseError::UnexpectedEOF);
        }

        // The checksum is checked first, so nothing else gets parsed out of corrupt data.
        let (body, crc) = bytes.split_at(bytes.len() - CRC_CHUNK_LEN);
        let mut crc_reader = BufParser(crc).expect_chunk(ChunkType::Crc)?;
        let expected_crc = crc_reader.next_u32_le()?;
        crc_reader.expect_empty()?;
        if calc_checksum(body) != expected_crc {
            return Err(ParseError::ChecksumFailed);
        }

        let mut reader = BufParser(&body[MAGIC_BYTES.len()..]);
        let version = reader.next_u64()?;
        if version != SNAPSHOT_VERSION {
            return Err(ParseError::UnsupportedVersion(version));
        }

        let mut head_chunk = reader.expect_chunk(ChunkType::HeadRevision)?;
        let head_revision = head_chunk.next_u64()?;
        head_chunk.expect_empty()?;

        let text_chunk = reader.expect_chunk(ChunkType::ServerText)?;
        let server_text = std::str::from_utf8(text_chunk.0)
            .map_err(|_| ParseError::InvalidUtf8)?
            .to_string();

        let mut read_optional = |chunk_type: ChunkType| -> Result<Option<Changeset>, ParseError> {
            reader.read_chunk_if_eq(chunk_type)?.map(|mut chunk| {
                let changeset = read_changeset(&mut chunk)?;
                chunk.expect_empty()?;
                Ok(changeset)
            }).transpose()
        };
        let submitted = read_optional(ChunkType::Submitted)?;
        let local = read_optional(ChunkType::Local)?;

        // Chunks from a newer writer are skipped. Anything else left over is an error.
        reader.skip_unknown_chunks()?;
        reader.expect_empty()?;

        let snapshot = CollabSnapshot { version, head_revision, server_text, submitted, local };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> CollabSnapshot {
        let submitted = Changeset::from_insertion(5, 5, " world").unwrap();
        let local = Changeset::from_replacement(11, 0..1, "J").unwrap();
        CollabSnapshot {
            version: SNAPSHOT_VERSION,
            head_revision: 42,
            server_text: "hello".into(),
            submitted: Some(submitted),
            local: Some(local),
        }
    }

    #[test]
    fn binary_round_trip() {
        let snapshot = sample();
        let bytes = snapshot.encode();
        assert_eq!(&bytes[..8], b"OTSNAPv1");
        assert_eq!(CollabSnapshot::decode(&bytes).unwrap(), snapshot);

        let empty = CollabSnapshot {
            version: SNAPSHOT_VERSION,
            head_revision: 0,
            server_text: String::new(),
            submitted: None,
            local: None,
        };
        assert_eq!(CollabSnapshot::decode(&empty.encode()).unwrap(), empty);
    }

    #[test]
    fn unicode_round_trip() {
        let snapshot = CollabSnapshot {
            version: SNAPSHOT_VERSION,
            head_revision: 7,
            server_text: "δ←↯".into(),
            submitted: None,
            local: Some(Changeset::from_replacement(3, 1..2, "𐆐日本").unwrap()),
        };
        assert_eq!(CollabSnapshot::decode(&snapshot.encode()).unwrap(), snapshot);
    }

    #[test]
    fn corrupt_data_rejected() {
        let bytes = sample().encode();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert_eq!(CollabSnapshot::decode(&bad_magic), Err(ParseError::InvalidMagic));

        for i in 8..bytes.len() - CRC_CHUNK_LEN {
            let mut corrupt = bytes.clone();
            corrupt[i] ^= 0x01;
            assert_eq!(CollabSnapshot::decode(&corrupt), Err(ParseError::ChecksumFailed));
        }

        assert_eq!(CollabSnapshot::decode(&bytes[..4]), Err(ParseError::UnexpectedEOF));
        assert!(CollabSnapshot::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn unsupported_version() {
        let mut snapshot = sample();
        snapshot.version = 2;
        assert_eq!(CollabSnapshot::decode(&snapshot.encode()), Err(ParseError::UnsupportedVersion(2)));
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let mut snapshot = sample();
        snapshot.local = Some(Changeset::from_insertion(3, 0, "x").unwrap());
        assert_eq!(snapshot.validate(), Err(ParseError::InvalidLength));
        assert_eq!(CollabSnapshot::decode(&snapshot.encode()), Err(ParseError::InvalidLength));
    }

    #[test]
    fn bad_changeset_runs_rejected() {
        // Hand-write a snapshot with a zero length run.
        let mut bytes = MAGIC_BYTES.to_vec();
        push_u64(&mut bytes, SNAPSHOT_VERSION);
        push_chunk(&mut bytes, ChunkType::HeadRevision, &[1]);
        push_chunk(&mut bytes, ChunkType::ServerText, b"ab");
        let mut cs = Vec::new();
        push_usize(&mut cs, 1);
        push_u32(&mut cs, RunTag::Retain as u32);
        push_usize(&mut cs, 0);
        push_str(&mut cs, "");
        push_chunk(&mut bytes, ChunkType::Local, &cs);
        let checksum = calc_checksum(&bytes);
        let mut crc = Vec::new();
        push_u32_le(&mut crc, checksum);
        push_chunk(&mut bytes, ChunkType::Crc, &crc);

        assert_eq!(CollabSnapshot::decode(&bytes), Err(ParseError::InvalidComponent));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_round_trip() {
        let snapshot = sample();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: CollabSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
