#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Parser for the FLAC stream layer: the `fLaC` marker, the metadata block
//! sequence (STREAMINFO first), and the frame sequence that follows. Frames
//! are delimited, never decoded.
//!
//! ### Stream Organization
//!
//! **Headered streams**: `fLaC` marker, one or more metadata blocks, frames.
//! **Headerless streams**: frames only; stream parameters are synthesized
//! from the first validated frame header (streaming mode).
//!
//! ### Boundary Detection
//!
//! A frame ends where the next 15-bit sync pattern begins. Candidate sync
//! occurrences are validated with the header CRC-8 and cross-checked against
//! the established stream parameters before they are accepted, because the
//! sync pattern can occur by chance inside frame payload.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flacparse::process::Record;
//! use flacparse::process::parse::Parser;
//!
//! let mut parser = Parser::default();
//!
//! let data = std::fs::read("audio.flac")?;
//! for record in parser.parse(&data)? {
//!     match record {
//!         Record::StreamInfo(info) => println!("{} Hz", info.sample_rate),
//!         Record::Opaque(bytes) => println!("passthrough, {} bytes", bytes.len()),
//!         Record::Frame(frame) => println!("frame, {} bytes", frame.data.len()),
//!     }
//! }
//!
//! // The last frame has no successor sync and is only emitted by flush.
//! let tail = parser.flush();
//! println!("final frame, {} bytes", tail.data.len());
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Stream segmentation functionality.
///
/// 1. **Parsing** ([`process::parse`]): The incremental [`Parser`](process::parse::Parser)
///    state machine that turns byte chunks into [`Record`](process::Record)s.
///
/// 2. **Records** ([`process`]): The tagged output records carrying stream
///    parameters, passthrough bytes, and delimited frames.
pub mod process;

/// Data structures representing FLAC stream components.
///
/// - **Stream Parameters** ([`structs::stream_info`]): STREAMINFO decoding
/// - **Metadata Blocks** ([`structs::metadata`]): Block headers and types
/// - **Frames** ([`structs::frame`]): Frame header decoding and validation
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading
/// - **CRC Validation** ([`utils::crc`]): Frame header error detection
/// - **Error Handling** ([`utils::errors`]): Error types
pub mod utils;
