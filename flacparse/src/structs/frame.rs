use crate::structs::stream_info::StreamInfo;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::crc::Crc8;
use crate::utils::errors::HeaderError;

/// 15-bit sync pattern opening every frame header.
///
/// The 15th bit must stay zero so a FLAC frame start is distinguishable from
/// an MPEG audio frame.
pub const SYNC_CODE: u16 = 0b111_1111_1111_1100;

/// How frame headers number themselves.
///
/// Fixed-blocking streams carry a frame index and derive the starting sample
/// from it; variable-blocking streams carry the starting sample directly.
/// The strategy never changes within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingStrategy {
    Fixed,
    Variable,
}

/// Stereo decorrelation mode from the channel assignment field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Independently coded channels (1..=8).
    Independent,
    /// Left + side difference channel.
    LeftSide,
    /// Side difference + right channel.
    RightSide,
    /// Mid average + side difference channel.
    MidSide,
}

/// Decoded frame header metadata attached to each emitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Inter-channel sample index of the first sample in this frame.
    pub first_sample: u64,

    /// Block size of this frame in samples.
    pub samples: u32,

    /// Sample rate in Hz, resolved through STREAMINFO for the inherit code.
    pub sample_rate: u32,

    /// Number of channels, 1..=8.
    pub channels: u8,

    /// Bits per sample, resolved through STREAMINFO for the inherit code.
    pub bits_per_sample: u8,

    pub channel_mode: ChannelMode,
}

/// Established stream state a candidate header must agree with.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderContext<'a> {
    pub stream_info: Option<&'a StreamInfo>,
    pub blocking: Option<BlockingStrategy>,
    /// Header of the in-flight frame, for sample-number continuity.
    pub previous: Option<&'a FrameInfo>,
}

/// A fully decoded and validated frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub info: FrameInfo,
    pub blocking: BlockingStrategy,
}

impl FrameHeader {
    /// Decodes and validates the frame header candidate at the start of
    /// `data`.
    ///
    /// Rejects reserved field values, verifies the header CRC-8, and checks
    /// the result against the established stream parameters in `ctx`. Returns
    /// [`HeaderError::InsufficientData`] when `data` ends inside the header,
    /// which makes the candidate decidable again once more input arrives.
    pub fn read(data: &[u8], ctx: &HeaderContext, crc: &Crc8) -> Result<Self, HeaderError> {
        let mut reader = BsIoSliceReader::from_slice(data);

        let sync: u16 = reader.get_n(15)?;
        if sync != SYNC_CODE {
            return Err(HeaderError::InvalidSync);
        }

        let blocking = if reader.get()? {
            BlockingStrategy::Variable
        } else {
            BlockingStrategy::Fixed
        };
        if ctx.blocking.is_some_and(|expected| expected != blocking) {
            return Err(HeaderError::InvalidSync);
        }

        let block_size_code: u8 = reader.get_n(4)?;
        let sample_rate_code: u8 = reader.get_n(4)?;
        let channels_code: u8 = reader.get_n(4)?;
        let sample_size_code: u8 = reader.get_n(3)?;
        if reader.get()? {
            return Err(HeaderError::ReservedBitSet);
        }

        let (channels, channel_mode) = match channels_code {
            0..=7 => (channels_code + 1, ChannelMode::Independent),
            8 => (2, ChannelMode::LeftSide),
            9 => (2, ChannelMode::RightSide),
            10 => (2, ChannelMode::MidSide),
            code => return Err(HeaderError::ReservedChannelAssignment(code)),
        };

        let bits_per_sample = match sample_size_code {
            0b000 => match ctx.stream_info {
                Some(info) => info.bits_per_sample,
                None => return Err(HeaderError::InheritWithoutStreamInfo),
            },
            0b001 => 8,
            0b010 => 12,
            0b100 => 16,
            0b101 => 20,
            0b110 => 24,
            code => return Err(HeaderError::ReservedSampleSize(code)),
        };

        let number = reader.get_coded_number()?;
        let samples = read_block_size(&mut reader, block_size_code)?;
        let sample_rate = read_sample_rate(&mut reader, sample_rate_code, ctx.stream_info)?;

        // Everything before the CRC byte is byte aligned again here.
        let header_len = (reader.position()? / 8) as usize;
        let read_crc: u8 = reader.get_n(8)?;
        let calculated = crc.checksum(&data[..header_len]);
        if calculated != read_crc {
            return Err(HeaderError::CrcMismatch {
                calculated,
                read: read_crc,
            });
        }

        let first_sample = match blocking {
            BlockingStrategy::Variable => number,
            BlockingStrategy::Fixed => {
                // A headerless stream has no STREAMINFO bound yet; the first
                // frame's own block size stands in for it.
                let block_size = ctx
                    .stream_info
                    .and_then(|info| info.min_block_size)
                    .map_or(samples, u32::from);
                number * u64::from(block_size)
            }
        };

        let info = FrameInfo {
            first_sample,
            samples,
            sample_rate,
            channels,
            bits_per_sample,
            channel_mode,
        };
        info.check_consistent(ctx)?;

        Ok(Self { info, blocking })
    }
}

impl FrameInfo {
    /// Checks this header against the established stream parameters and the
    /// in-flight frame.
    ///
    /// The minimum block size is deliberately not checked: the terminal frame
    /// of a fixed-blocking stream may be shorter than the stream block size.
    fn check_consistent(&self, ctx: &HeaderContext) -> Result<(), HeaderError> {
        if let Some(stream) = ctx.stream_info {
            if self.channels != stream.channels
                || self.sample_rate != stream.sample_rate
                || self.bits_per_sample != stream.bits_per_sample
            {
                return Err(HeaderError::Inconsistent);
            }

            if stream
                .max_block_size
                .is_some_and(|max| self.samples > u32::from(max))
            {
                return Err(HeaderError::Inconsistent);
            }
        }

        if let Some(previous) = ctx.previous {
            if self.first_sample != previous.first_sample + u64::from(previous.samples) {
                return Err(HeaderError::Inconsistent);
            }
        }

        Ok(())
    }
}

/// Resolves the 4-bit block size code, reading the 8- or 16-bit tail forms
/// from the end of the header.
fn read_block_size(reader: &mut BsIoSliceReader, code: u8) -> Result<u32, HeaderError> {
    match code {
        0b0001 => Ok(192),
        0b0010..=0b0101 => Ok(576 << (code - 2)),
        0b0110 => Ok(u32::from(reader.get_n::<u8>(8)?) + 1),
        0b0111 => Ok(u32::from(reader.get_n::<u16>(16)?) + 1),
        0b1000..=0b1111 => Ok(1 << code),
        _ => Err(HeaderError::InvalidBlockSize),
    }
}

/// Resolves the 4-bit sample rate code, reading the tail forms from the end
/// of the header. Code `0b0000` inherits the STREAMINFO rate.
fn read_sample_rate(
    reader: &mut BsIoSliceReader,
    code: u8,
    stream_info: Option<&StreamInfo>,
) -> Result<u32, HeaderError> {
    const RATES: [u32; 11] = [
        88_200, 176_400, 192_000, 8_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 96_000,
    ];

    match code {
        0b0000 => stream_info
            .map(|info| info.sample_rate)
            .ok_or(HeaderError::InheritWithoutStreamInfo),
        0b0001..=0b1011 => Ok(RATES[usize::from(code) - 1]),
        0b1100 => Ok(u32::from(reader.get_n::<u8>(8)?) * 1000),
        0b1101 => Ok(u32::from(reader.get_n::<u16>(16)?)),
        0b1110 => Ok(u32::from(reader.get_n::<u16>(16)?) * 10),
        _ => Err(HeaderError::InvalidSampleRate),
    }
}

#[cfg(test)]
pub(crate) fn encode_coded_number(value: u64) -> Vec<u8> {
    if value < 0x80 {
        return vec![value as u8];
    }

    // Smallest width whose payload holds the value: 11, 16, 21, 26, 31, 36.
    let mut continuations = 1;
    while continuations < 6 && value >> (6 * continuations + 6 - continuations) != 0 {
        continuations += 1;
    }

    let lead_marker = !(0xFFu8 >> (continuations + 1));
    let lead_payload = (value >> (6 * continuations)) as u8 & (0x7F >> (continuations + 1));
    let mut bytes = vec![lead_marker | lead_payload];
    for i in (0..continuations).rev() {
        bytes.push(0x80 | ((value >> (6 * i)) as u8 & 0x3F));
    }
    bytes
}

#[cfg(test)]
pub(crate) fn encode_frame_header(
    variable: bool,
    number: u64,
    block_size_code: u8,
    sample_rate_code: u8,
    channels_code: u8,
    sample_size_code: u8,
    block_size_tail: &[u8],
    sample_rate_tail: &[u8],
) -> Vec<u8> {
    use crate::utils::crc::CRC_FRAME_HEADER_ALG;

    let mut header = vec![
        0xFF,
        0xF8 | u8::from(variable),
        (block_size_code << 4) | sample_rate_code,
        (channels_code << 4) | (sample_size_code << 1),
    ];
    header.extend(encode_coded_number(number));
    header.extend_from_slice(block_size_tail);
    header.extend_from_slice(sample_rate_tail);

    let crc = Crc8::new(&CRC_FRAME_HEADER_ALG);
    let checksum = crc.checksum(&header);
    header.push(checksum);
    header
}

#[cfg(test)]
fn test_crc() -> Crc8 {
    use crate::utils::crc::CRC_FRAME_HEADER_ALG;
    Crc8::new(&CRC_FRAME_HEADER_ALG)
}

#[cfg(test)]
fn stream_info_44100_stereo_16() -> StreamInfo {
    StreamInfo {
        min_block_size: Some(4096),
        max_block_size: Some(4096),
        min_frame_size: None,
        max_frame_size: None,
        sample_rate: 44_100,
        channels: 2,
        bits_per_sample: 16,
        total_samples: None,
        md5_signature: None,
    }
}

#[test]
fn decodes_fixed_blocking_header() {
    let data = encode_frame_header(false, 5, 0b0011, 0b0101, 0, 0b100, &[], &[]);
    let header = FrameHeader::read(&data, &HeaderContext::default(), &test_crc()).unwrap();

    assert_eq!(header.blocking, BlockingStrategy::Fixed);
    assert_eq!(header.info.samples, 1152);
    assert_eq!(header.info.sample_rate, 16_000);
    assert_eq!(header.info.channels, 1);
    assert_eq!(header.info.bits_per_sample, 16);
    assert_eq!(header.info.channel_mode, ChannelMode::Independent);
    // Without STREAMINFO the frame's own block size scales the frame index.
    assert_eq!(header.info.first_sample, 5 * 1152);
}

#[test]
fn fixed_blocking_scales_by_stream_block_size() {
    let info = stream_info_44100_stereo_16();
    let ctx = HeaderContext {
        stream_info: Some(&info),
        blocking: Some(BlockingStrategy::Fixed),
        previous: None,
    };

    // Short frame (192 samples) in a 4096-sample stream; the STREAMINFO
    // minimum block size scales the frame index, not this frame's size.
    let data = encode_frame_header(false, 2, 0b0001, 0b1001, 1, 0b100, &[], &[]);
    let header = FrameHeader::read(&data, &ctx, &test_crc()).unwrap();
    assert_eq!(header.info.samples, 192);
    assert_eq!(header.info.first_sample, 2 * 4096);
}

#[test]
fn decodes_variable_blocking_header() {
    let data = encode_frame_header(true, 123_456, 0b1100, 0b1001, 10, 0b100, &[], &[]);
    let header = FrameHeader::read(&data, &HeaderContext::default(), &test_crc()).unwrap();

    assert_eq!(header.blocking, BlockingStrategy::Variable);
    assert_eq!(header.info.first_sample, 123_456);
    assert_eq!(header.info.samples, 4096);
    assert_eq!(header.info.channels, 2);
    assert_eq!(header.info.channel_mode, ChannelMode::MidSide);
}

#[test]
fn decodes_tail_forms() {
    // 8-bit block size tail: value + 1.
    let data = encode_frame_header(false, 0, 0b0110, 0b0101, 0, 0b100, &[0x2F], &[]);
    let header = FrameHeader::read(&data, &HeaderContext::default(), &test_crc()).unwrap();
    assert_eq!(header.info.samples, 0x2F + 1);

    // 16-bit block size tail: value + 1.
    let data = encode_frame_header(false, 0, 0b0111, 0b0101, 0, 0b100, &[0x0F, 0xFF], &[]);
    let header = FrameHeader::read(&data, &HeaderContext::default(), &test_crc()).unwrap();
    assert_eq!(header.info.samples, 4096);

    // 8-bit sample rate tail in kHz.
    let data = encode_frame_header(false, 0, 0b0001, 0b1100, 0, 0b100, &[], &[8]);
    let header = FrameHeader::read(&data, &HeaderContext::default(), &test_crc()).unwrap();
    assert_eq!(header.info.sample_rate, 8_000);

    // 16-bit sample rate tail in Hz.
    let data = encode_frame_header(false, 0, 0b0001, 0b1101, 0, 0b100, &[], &[0xAC, 0x44]);
    let header = FrameHeader::read(&data, &HeaderContext::default(), &test_crc()).unwrap();
    assert_eq!(header.info.sample_rate, 44_100);

    // 16-bit sample rate tail in tens of Hz.
    let data = encode_frame_header(false, 0, 0b0001, 0b1110, 0, 0b100, &[], &[0x11, 0x3A]);
    let header = FrameHeader::read(&data, &HeaderContext::default(), &test_crc()).unwrap();
    assert_eq!(header.info.sample_rate, 44_100);
}

#[test]
fn rejects_reserved_field_values() {
    let ctx = HeaderContext::default();
    let crc = test_crc();

    let data = encode_frame_header(false, 0, 0b0000, 0b0101, 0, 0b100, &[], &[]);
    assert_eq!(
        FrameHeader::read(&data, &ctx, &crc),
        Err(HeaderError::InvalidBlockSize)
    );

    let data = encode_frame_header(false, 0, 0b0001, 0b1111, 0, 0b100, &[], &[]);
    assert_eq!(
        FrameHeader::read(&data, &ctx, &crc),
        Err(HeaderError::InvalidSampleRate)
    );

    let data = encode_frame_header(false, 0, 0b0001, 0b0101, 0b1011, 0b100, &[], &[]);
    assert_eq!(
        FrameHeader::read(&data, &ctx, &crc),
        Err(HeaderError::ReservedChannelAssignment(0b1011))
    );

    let data = encode_frame_header(false, 0, 0b0001, 0b0101, 0, 0b011, &[], &[]);
    assert_eq!(
        FrameHeader::read(&data, &ctx, &crc),
        Err(HeaderError::ReservedSampleSize(0b011))
    );

    // Mandatory zero bit after the sample size code.
    let mut data = encode_frame_header(false, 0, 0b0001, 0b0101, 0, 0b100, &[], &[]);
    data[3] |= 0x01;
    assert_eq!(
        FrameHeader::read(&data, &ctx, &crc),
        Err(HeaderError::ReservedBitSet)
    );
}

#[test]
fn rejects_sync_and_blocking_mismatch() {
    let crc = test_crc();

    assert_eq!(
        FrameHeader::read(&[0x12, 0x34, 0x56, 0x78, 0x00, 0x00], &HeaderContext::default(), &crc),
        Err(HeaderError::InvalidSync)
    );

    // Variable-blocking header in an established fixed-blocking stream.
    let data = encode_frame_header(true, 0, 0b0001, 0b0101, 0, 0b100, &[], &[]);
    let ctx = HeaderContext {
        blocking: Some(BlockingStrategy::Fixed),
        ..Default::default()
    };
    assert_eq!(
        FrameHeader::read(&data, &ctx, &crc),
        Err(HeaderError::InvalidSync)
    );
}

#[test]
fn inherit_codes_resolve_through_stream_info() {
    let info = stream_info_44100_stereo_16();
    let ctx = HeaderContext {
        stream_info: Some(&info),
        ..Default::default()
    };

    let data = encode_frame_header(false, 0, 0b1100, 0b0000, 1, 0b000, &[], &[]);
    let header = FrameHeader::read(&data, &ctx, &test_crc()).unwrap();
    assert_eq!(header.info.sample_rate, 44_100);
    assert_eq!(header.info.bits_per_sample, 16);

    // The same header is undecodable when nothing can be inherited.
    assert_eq!(
        FrameHeader::read(&data, &HeaderContext::default(), &test_crc()),
        Err(HeaderError::InheritWithoutStreamInfo)
    );
}

#[test]
fn rejects_crc_mismatch() {
    let mut data = encode_frame_header(false, 5, 0b0011, 0b0101, 0, 0b100, &[], &[]);
    // Corrupt the coded number; the stored CRC no longer matches.
    data[4] ^= 0x01;
    assert!(matches!(
        FrameHeader::read(&data, &HeaderContext::default(), &test_crc()),
        Err(HeaderError::CrcMismatch { .. })
    ));
}

#[test]
fn short_input_suspends() {
    let data = encode_frame_header(false, 5, 0b0011, 0b0101, 0, 0b100, &[], &[]);
    for len in 0..data.len() {
        assert_eq!(
            FrameHeader::read(&data[..len], &HeaderContext::default(), &test_crc()),
            Err(HeaderError::InsufficientData),
            "prefix of {len} bytes must suspend"
        );
    }
}

#[test]
fn rejects_stream_parameter_disagreement() {
    let info = stream_info_44100_stereo_16();
    let crc = test_crc();
    let ctx = HeaderContext {
        stream_info: Some(&info),
        ..Default::default()
    };

    // Mono frame in a stereo stream.
    let data = encode_frame_header(false, 0, 0b1100, 0b1001, 0, 0b100, &[], &[]);
    assert_eq!(
        FrameHeader::read(&data, &ctx, &crc),
        Err(HeaderError::Inconsistent)
    );

    // Block size beyond the declared maximum (8192 > 4096).
    let data = encode_frame_header(false, 0, 0b1101, 0b1001, 1, 0b100, &[], &[]);
    assert_eq!(
        FrameHeader::read(&data, &ctx, &crc),
        Err(HeaderError::Inconsistent)
    );
}

#[test]
fn enforces_sample_number_continuity() {
    let previous = FrameInfo {
        first_sample: 4096,
        samples: 4096,
        sample_rate: 44_100,
        channels: 2,
        bits_per_sample: 16,
        channel_mode: ChannelMode::Independent,
    };
    let ctx = HeaderContext {
        previous: Some(&previous),
        ..Default::default()
    };
    let crc = test_crc();

    // Variable header carrying exactly previous.first_sample + samples.
    let data = encode_frame_header(true, 8192, 0b1100, 0b1001, 1, 0b100, &[], &[]);
    assert!(FrameHeader::read(&data, &ctx, &crc).is_ok());

    // Any other starting sample is rejected.
    let data = encode_frame_header(true, 8193, 0b1100, 0b1001, 1, 0b100, &[], &[]);
    assert_eq!(
        FrameHeader::read(&data, &ctx, &crc),
        Err(HeaderError::Inconsistent)
    );
}

#[test]
fn block_size_code_table() {
    let ctx = HeaderContext::default();
    let crc = test_crc();

    for (code, expected) in [
        (0b0001u8, 192u32),
        (0b0010, 576),
        (0b0011, 1152),
        (0b0100, 2304),
        (0b0101, 4608),
        (0b1000, 256),
        (0b1010, 1024),
        (0b1100, 4096),
        (0b1111, 32768),
    ] {
        let data = encode_frame_header(false, 0, code, 0b0101, 0, 0b100, &[], &[]);
        let header = FrameHeader::read(&data, &ctx, &crc).unwrap();
        assert_eq!(header.info.samples, expected, "block size code {code:#06b}");
    }
}

#[test]
fn sample_rate_code_table() {
    let ctx = HeaderContext::default();
    let crc = test_crc();

    for (code, expected) in [
        (0b0001u8, 88_200u32),
        (0b0010, 176_400),
        (0b0011, 192_000),
        (0b0100, 8_000),
        (0b0101, 16_000),
        (0b0110, 22_050),
        (0b0111, 24_000),
        (0b1000, 32_000),
        (0b1001, 44_100),
        (0b1010, 48_000),
        (0b1011, 96_000),
    ] {
        let data = encode_frame_header(false, 0, 0b0001, code, 0, 0b100, &[], &[]);
        let header = FrameHeader::read(&data, &ctx, &crc).unwrap();
        assert_eq!(
            header.info.sample_rate, expected,
            "sample rate code {code:#06b}"
        );
    }
}
