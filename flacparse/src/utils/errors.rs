use std::io;

/// Outcome of decoding one frame-header candidate.
///
/// `InsufficientData` is the resumption sentinel: the candidate straddles the
/// end of the buffered input and becomes decidable once more bytes arrive.
/// Every other variant rejects the candidate.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    #[error("insufficient buffer data for frame header")]
    InsufficientData,

    #[error("sync pattern or blocking strategy mismatch")]
    InvalidSync,

    #[error("reserved block size code 0b0000")]
    InvalidBlockSize,

    #[error("reserved sample rate code 0b1111")]
    InvalidSampleRate,

    #[error("malformed variable-length coded number")]
    InvalidCodedNumber,

    #[error("reserved channel assignment {0:#06b}")]
    ReservedChannelAssignment(u8),

    #[error("reserved sample size code {0:#05b}")]
    ReservedSampleSize(u8),

    #[error("mandatory zero bit is set")]
    ReservedBitSet,

    #[error("header inherits from STREAMINFO, but no STREAMINFO was seen")]
    InheritWithoutStreamInfo,

    #[error("frame header CRC mismatch: calculated {calculated:#04X}, read {read:#04X}")]
    CrcMismatch { calculated: u8, read: u8 },

    #[error("header disagrees with established stream parameters")]
    Inconsistent,
}

// The slice readers in this crate fail only by running off the end of the
// input, which is the resumption case rather than a stream defect.
impl From<io::Error> for HeaderError {
    fn from(_: io::Error) -> Self {
        HeaderError::InsufficientData
    }
}

/// Fatal parser errors. Once one of these is returned the parser state is
/// not required to be usable further.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("input does not begin with a fLaC stream marker (offset {0})")]
    NotStream(u64),

    #[error("first metadata block is not STREAMINFO")]
    MissingStreamInfo,

    #[error("STREAMINFO block body is shorter than 34 bytes")]
    TruncatedStreamInfo,

    #[error("invalid frame header at offset {pos}: {reason}")]
    InvalidHeader { pos: u64, reason: HeaderError },

    #[error("no valid frame boundary within the maximum frame size window after offset {0}")]
    InvalidFrame(u64),
}
