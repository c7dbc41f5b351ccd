//! Data structures representing FLAC stream components.
//!
//! Contains structured representations of the stream layer: STREAMINFO
//! parameters, metadata block headers, and frame headers with their
//! validation rules.

pub mod frame;
pub mod metadata;
pub mod stream_info;
