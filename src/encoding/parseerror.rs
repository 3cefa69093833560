use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone, Copy)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid magic bytes")]
    InvalidMagic,

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u64),

    #[error("unexpected end of input")]
    UnexpectedEOF,

    #[error("invalid varint")]
    InvalidVarInt,

    #[error("invalid utf8 in string")]
    InvalidUtf8,

    /// Only surfaced internally. Unknown chunks are skipped while reading.
    #[error("unknown chunk type")]
    UnknownChunk,

    #[error("missing chunk {0}")]
    MissingChunk(u32),

    #[error("invalid changeset component")]
    InvalidComponent,

    #[error("invalid length")]
    InvalidLength,

    #[error("checksum failed")]
    ChecksumFailed,
}
