use anyhow::Result;

use crate::structs::frame::{BlockingStrategy, FrameInfo};
use crate::utils::bitstream_io::BsIoSliceReader;

/// Stream-wide parameters decoded from a STREAMINFO block, or synthesized
/// from the first validated frame header of a headerless stream.
///
/// STREAMINFO encodes "unknown" as an all-zero field; that convention is
/// mapped to `None` here and preserved downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Minimum block size in samples used in the stream.
    ///
    /// 16-bit field.
    pub min_block_size: Option<u16>,

    /// Maximum block size in samples used in the stream.
    ///
    /// 16-bit field. Equal minimum and maximum imply fixed blocking.
    pub max_block_size: Option<u16>,

    /// Minimum frame size in bytes used in the stream.
    ///
    /// 24-bit field.
    pub min_frame_size: Option<u32>,

    /// Maximum frame size in bytes used in the stream.
    ///
    /// 24-bit field. When known it bounds the frame boundary search.
    pub max_frame_size: Option<u32>,

    /// Sample rate in Hz.
    ///
    /// 20-bit field.
    pub sample_rate: u32,

    /// Number of channels, 1..=8.
    ///
    /// Stored on the wire as (channels - 1) in 3 bits.
    pub channels: u8,

    /// Bits per sample, 4..=32.
    ///
    /// Stored on the wire as (bits - 1) in 5 bits.
    pub bits_per_sample: u8,

    /// Total inter-channel samples in the stream.
    ///
    /// 36-bit field.
    pub total_samples: Option<u64>,

    /// MD5 signature of the unencoded audio data.
    pub md5_signature: Option<[u8; 16]>,
}

impl StreamInfo {
    /// Decodes the fixed 34-byte STREAMINFO block body.
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let min_block_size: u16 = reader.get_n(16)?;
        let max_block_size: u16 = reader.get_n(16)?;
        let min_frame_size: u32 = reader.get_n(24)?;
        let max_frame_size: u32 = reader.get_n(24)?;
        let sample_rate: u32 = reader.get_n(20)?;
        let channels = reader.get_n::<u8>(3)? + 1;
        let bits_per_sample = reader.get_n::<u8>(5)? + 1;
        let total_samples: u64 = reader.get_n(36)?;

        let mut md5_signature = [0u8; 16];
        reader.read_bytes(&mut md5_signature)?;

        Ok(Self {
            min_block_size: (min_block_size != 0).then_some(min_block_size),
            max_block_size: (max_block_size != 0).then_some(max_block_size),
            min_frame_size: (min_frame_size != 0).then_some(min_frame_size),
            max_frame_size: (max_frame_size != 0).then_some(max_frame_size),
            sample_rate,
            channels,
            bits_per_sample,
            total_samples: (total_samples != 0).then_some(total_samples),
            md5_signature: (md5_signature != [0u8; 16]).then_some(md5_signature),
        })
    }

    /// Synthesizes stream parameters from the first validated frame header
    /// of a headerless stream.
    ///
    /// Fixed blocking pins both block size bounds to this frame's sample
    /// count; under variable blocking the bounds stay unknown. Frame size
    /// bounds, total samples and the MD5 signature cannot be known.
    pub fn from_first_frame(frame: &FrameInfo, blocking: BlockingStrategy) -> Self {
        let block_bound = match blocking {
            // A block size beyond the 16-bit STREAMINFO field stays unknown.
            BlockingStrategy::Fixed => u16::try_from(frame.samples).ok(),
            BlockingStrategy::Variable => None,
        };

        Self {
            min_block_size: block_bound,
            max_block_size: block_bound,
            min_frame_size: None,
            max_frame_size: None,
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            bits_per_sample: frame.bits_per_sample,
            total_samples: None,
            md5_signature: None,
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_stream_info(
    min_block_size: u16,
    max_block_size: u16,
    min_frame_size: u32,
    max_frame_size: u32,
    sample_rate: u32,
    channels: u8,
    bits_per_sample: u8,
    total_samples: u64,
    md5_signature: [u8; 16],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(34);
    body.extend_from_slice(&min_block_size.to_be_bytes());
    body.extend_from_slice(&max_block_size.to_be_bytes());
    body.extend_from_slice(&min_frame_size.to_be_bytes()[1..]);
    body.extend_from_slice(&max_frame_size.to_be_bytes()[1..]);

    // sample_rate:20 | channels-1:3 | bits-1:5 | total_samples:36
    let packed = (u64::from(sample_rate) << 44)
        | (u64::from(channels - 1) << 41)
        | (u64::from(bits_per_sample - 1) << 36)
        | total_samples;
    body.extend_from_slice(&packed.to_be_bytes());
    body.extend_from_slice(&md5_signature);
    body
}

#[test]
fn read_decodes_bit_fields() -> Result<()> {
    let body = encode_stream_info(1152, 1152, 1766, 2272, 16000, 1, 16, 32000, [0xA5; 16]);
    assert_eq!(body.len(), 34);

    let info = StreamInfo::read(&mut BsIoSliceReader::from_slice(&body))?;
    assert_eq!(info.min_block_size, Some(1152));
    assert_eq!(info.max_block_size, Some(1152));
    assert_eq!(info.min_frame_size, Some(1766));
    assert_eq!(info.max_frame_size, Some(2272));
    assert_eq!(info.sample_rate, 16000);
    assert_eq!(info.channels, 1);
    assert_eq!(info.bits_per_sample, 16);
    assert_eq!(info.total_samples, Some(32000));
    assert_eq!(info.md5_signature, Some([0xA5; 16]));
    Ok(())
}

#[test]
fn read_maps_zero_fields_to_unknown() -> Result<()> {
    let body = encode_stream_info(4096, 4096, 0, 0, 44100, 2, 24, 0, [0; 16]);

    let info = StreamInfo::read(&mut BsIoSliceReader::from_slice(&body))?;
    assert_eq!(info.min_frame_size, None);
    assert_eq!(info.max_frame_size, None);
    assert_eq!(info.total_samples, None);
    assert_eq!(info.md5_signature, None);
    assert_eq!(info.sample_rate, 44100);
    assert_eq!(info.channels, 2);
    assert_eq!(info.bits_per_sample, 24);
    Ok(())
}

#[test]
fn synthesis_pins_block_size_only_for_fixed_blocking() {
    use crate::structs::frame::ChannelMode;

    let frame = FrameInfo {
        first_sample: 0,
        samples: 4096,
        sample_rate: 48000,
        channels: 2,
        bits_per_sample: 16,
        channel_mode: ChannelMode::Independent,
    };

    let fixed = StreamInfo::from_first_frame(&frame, BlockingStrategy::Fixed);
    assert_eq!(fixed.min_block_size, Some(4096));
    assert_eq!(fixed.max_block_size, Some(4096));
    assert_eq!(fixed.sample_rate, 48000);
    assert_eq!(fixed.max_frame_size, None);
    assert_eq!(fixed.total_samples, None);

    let variable = StreamInfo::from_first_frame(&frame, BlockingStrategy::Variable);
    assert_eq!(variable.min_block_size, None);
    assert_eq!(variable.max_block_size, None);
}
