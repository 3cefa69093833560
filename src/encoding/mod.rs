//! The encoding module converts a service's unacknowledged state to and from a compact binary
//! snapshot, so an editor can be closed with edits in flight and reopened later.
//!
//! A snapshot is a magic string and a version number followed by a list of chunks. Each chunk is
//! `(chunk type, byte length, payload)`, with all integers stored as LEB128 varints. The last chunk
//! is always a CRC of everything before it.

use crc::{Crc, CRC_32_ISCSI};
use num_enum::TryFromPrimitive;

pub(crate) mod varint;
pub(crate) mod bufparser;
pub(crate) mod parseerror;
pub(crate) mod tools;
mod snapshot;

pub use parseerror::ParseError;
pub use snapshot::{CollabSnapshot, SNAPSHOT_VERSION};

pub(crate) const MAGIC_BYTES: [u8; 8] = *b"OTSNAPv1";

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u32)]
pub(crate) enum ChunkType {
    HeadRevision = 1,
    ServerText = 2,
    /// The changeset submitted to the server and waiting for an acknowledgement.
    Submitted = 3,
    /// Local changes which haven't been submitted yet.
    Local = 4,

    Crc = 100,
}

/// Tags for the runs in an encoded changeset.
#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u32)]
pub(crate) enum RunTag {
    Retain = 0,
    Delete = 1,
    Insert = 2,
}

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub(crate) fn calc_checksum(data: &[u8]) -> u32 {
    CASTAGNOLI.checksum(data)
}
