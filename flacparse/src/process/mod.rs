//! Stream segmentation into tagged output records.
//!
//! Provides the incremental [`Parser`](parse::Parser) and the [`Record`]
//! stream it emits. Concatenating the payloads of every [`Record::Opaque`]
//! and [`Record::Frame`] in emission order reproduces the consumed input
//! byte for byte.

use crate::structs::frame::FrameInfo;
use crate::structs::stream_info::StreamInfo;

/// Incremental parsing of byte chunks into records.
///
/// Provides the [`Parser`](parse::Parser) state machine driving the marker,
/// metadata, and frame phases.
pub mod parse;

/// A single parser output record, in strict source-byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Stream-wide parameters, emitted once: right after the STREAMINFO
    /// block's opaque bytes, or synthesized ahead of the first frame of a
    /// headerless stream.
    StreamInfo(StreamInfo),

    /// Passthrough bytes carrying no frame metadata: the `fLaC` stream
    /// marker, or one complete metadata block (header and body).
    Opaque(Vec<u8>),

    /// One delimited audio frame.
    Frame(FrameBuffer),
}

impl Record {
    /// Payload bytes this record contributes to the reassembled stream.
    ///
    /// [`Record::StreamInfo`] is decoded from bytes already carried by an
    /// opaque record and contributes none.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Record::StreamInfo(_) => None,
            Record::Opaque(data) => Some(data),
            Record::Frame(frame) => Some(&frame.data),
        }
    }
}

/// A delimited audio frame with its decoded header metadata.
///
/// `info` is present on every in-stream frame; it is `None` only for a
/// [`flush`](parse::Parser::flush) that ran before any frame header was
/// validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub info: Option<FrameInfo>,
}

impl AsRef<[u8]> for FrameBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
