use anyhow::{Result, bail};
use log::{debug, trace};

use crate::process::{FrameBuffer, Record};
use crate::structs::frame::{BlockingStrategy, FrameHeader, FrameInfo, HeaderContext};
use crate::structs::metadata::{BlockHeader, BlockType};
use crate::structs::stream_info::StreamInfo;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::crc::{CRC_FRAME_HEADER_ALG, Crc8};
use crate::utils::errors::{HeaderError, ParseError};

const STREAM_MARKER: &[u8; 4] = b"fLaC";

/// Shortest prefix that can hold the stream marker plus a complete
/// STREAMINFO block (4 + 4 + 34 bytes).
const MIN_STREAM_PREFIX: usize = 42;

const BLOCK_HEADER_LEN: usize = 4;
const STREAM_INFO_LEN: usize = 34;

/// A frame sync pattern spans two bytes.
const SYNC_LEN: usize = 2;

/// Incremental FLAC stream parser.
///
/// Consumes a byte stream in arbitrary-sized chunks and emits an ordered
/// sequence of [`Record`]s: the stream marker and metadata blocks as opaque
/// passthrough, stream parameters once they are known, and each delimited
/// audio frame with its decoded header metadata.
///
/// Bytes that cannot be delimited yet stay buffered; calling
/// [`parse`](Self::parse) again with more input resumes exactly where the
/// previous call suspended. The final frame of a stream has no successor
/// sync to terminate it and is only emitted by [`flush`](Self::flush).
///
/// # Example
///
/// ```rust,no_run
/// use flacparse::process::parse::Parser;
///
/// let mut parser = Parser::default();
///
/// for chunk in [&[0u8; 4096][..], &[0u8; 4096][..]] {
///     for record in parser.parse(chunk)? {
///         println!("{record:?}");
///     }
/// }
///
/// let tail = parser.flush();
/// println!("final frame: {} bytes", tail.data.len());
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Parser {
    queue: Vec<u8>,
    phase: Phase,
    /// Absolute offset of the next byte to be emitted.
    pos: u64,
    streaming: bool,
    stream_info: Option<StreamInfo>,
    blocking: Option<BlockingStrategy>,
    /// Header of the in-flight frame: validated, terminal boundary not yet
    /// located.
    current: Option<FrameInfo>,
    crc_frame_header: Crc8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Marker,
    Metadata,
    Frames,
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Suspend,
}

enum Boundary {
    Found { offset: usize, next: FrameHeader },
    Suspend,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Parser {
    /// Creates a parser. With `streaming` set, input may begin at any frame
    /// boundary and omit the stream marker and metadata; stream parameters
    /// are then synthesized from the first validated frame header.
    pub fn new(streaming: bool) -> Self {
        Self {
            queue: Vec::new(),
            phase: Phase::Marker,
            pos: 0,
            streaming,
            stream_info: None,
            blocking: None,
            current: None,
            crc_frame_header: Crc8::new(&CRC_FRAME_HEADER_ALG),
        }
    }

    /// Stream parameters, once decoded or synthesized.
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.stream_info.as_ref()
    }

    /// Blocking strategy, once observed on the first validated frame.
    pub fn blocking_strategy(&self) -> Option<BlockingStrategy> {
        self.blocking
    }

    /// Absolute offset of the next byte to be emitted; equals the total
    /// payload bytes emitted so far.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Feeds one chunk and returns every record that became complete.
    ///
    /// Records are emitted in strict source-byte order. On a fatal error the
    /// parser is not required to remain usable; the typed reason is
    /// retrievable with `err.downcast_ref::<ParseError>()`.
    pub fn parse(&mut self, chunk: &[u8]) -> Result<Vec<Record>> {
        self.queue.extend_from_slice(chunk);

        let mut records = Vec::new();
        loop {
            let step = match self.phase {
                Phase::Marker => self.parse_marker(&mut records)?,
                Phase::Metadata => self.parse_metadata(&mut records)?,
                Phase::Frames => self.parse_frames(&mut records)?,
            };

            if step == Step::Suspend {
                return Ok(records);
            }
        }
    }

    /// Drains every remaining buffered byte into a terminal frame buffer
    /// carrying the in-flight frame's metadata.
    ///
    /// The boundary finder can only close a frame by locating the next sync
    /// pattern, so the last frame of a stream is always emitted through
    /// `flush`. Queue contents are not validated; call this once after the
    /// complete stream has been fed.
    pub fn flush(&mut self) -> FrameBuffer {
        FrameBuffer {
            data: std::mem::take(&mut self.queue),
            info: self.current.take(),
        }
    }

    fn parse_marker(&mut self, records: &mut Vec<Record>) -> Result<Step> {
        if self.queue.len() < MIN_STREAM_PREFIX {
            return Ok(Step::Suspend);
        }

        if self.queue.starts_with(STREAM_MARKER) {
            records.push(Record::Opaque(self.consume(STREAM_MARKER.len())));
            debug!("stream marker found, reading metadata blocks");
            self.phase = Phase::Metadata;
            return Ok(Step::Continue);
        }

        if self.streaming {
            debug!("no stream marker, assuming frame-aligned input");
            self.phase = Phase::Frames;
            return Ok(Step::Continue);
        }

        bail!(ParseError::NotStream(self.pos));
    }

    fn parse_metadata(&mut self, records: &mut Vec<Record>) -> Result<Step> {
        let Some(header_bytes) = self.queue.first_chunk::<BLOCK_HEADER_LEN>() else {
            return Ok(Step::Suspend);
        };
        let header = BlockHeader::read(header_bytes);

        let total_len = BLOCK_HEADER_LEN + header.length as usize;
        if self.queue.len() < total_len {
            return Ok(Step::Suspend);
        }

        let block = self.consume(total_len);

        let mut decoded = None;
        if self.stream_info.is_none() {
            if header.block_type != BlockType::StreamInfo {
                bail!(ParseError::MissingStreamInfo);
            }
            if (header.length as usize) < STREAM_INFO_LEN {
                bail!(ParseError::TruncatedStreamInfo);
            }

            let mut reader = BsIoSliceReader::from_slice(&block[BLOCK_HEADER_LEN..]);
            let info = StreamInfo::read(&mut reader)?;
            debug!(
                "STREAMINFO: {} Hz, {} ch, {} bits",
                info.sample_rate, info.channels, info.bits_per_sample
            );
            decoded = Some(info);
        } else {
            trace!(
                "metadata block {:?} ({} bytes) passed through",
                header.block_type, total_len
            );
        }

        records.push(Record::Opaque(block));
        if let Some(info) = decoded {
            self.stream_info = Some(info.clone());
            records.push(Record::StreamInfo(info));
        }

        if header.is_last {
            debug!("last metadata block read, expecting frames");
            self.phase = Phase::Frames;
        }
        Ok(Step::Continue)
    }

    fn parse_frames(&mut self, records: &mut Vec<Record>) -> Result<Step> {
        if self.current.is_none() {
            match self.read_header_at(0) {
                Ok(header) => {
                    self.blocking.get_or_insert(header.blocking);

                    if self.streaming && self.stream_info.is_none() {
                        let info = StreamInfo::from_first_frame(&header.info, header.blocking);
                        debug!(
                            "synthesized stream parameters from first frame: {} Hz, {} ch, {} bits",
                            info.sample_rate, info.channels, info.bits_per_sample
                        );
                        self.stream_info = Some(info.clone());
                        records.push(Record::StreamInfo(info));
                    }

                    self.current = Some(header.info);
                }
                Err(HeaderError::InsufficientData) => return Ok(Step::Suspend),
                Err(reason) => bail!(ParseError::InvalidHeader {
                    pos: self.pos,
                    reason,
                }),
            }
        }

        match self.find_boundary()? {
            Boundary::Found { offset, next } => {
                let data = self.consume(offset);
                let info = self.current.replace(next.info);
                records.push(Record::Frame(FrameBuffer { data, info }));
                Ok(Step::Continue)
            }
            Boundary::Suspend => Ok(Step::Suspend),
        }
    }

    /// Searches for the next sync occurrence that decodes into a header
    /// consistent with the established stream; its offset terminates the
    /// in-flight frame.
    ///
    /// The search scope starts at the known minimum frame size and ends one
    /// sync length past the known maximum, so a well-formed stream must
    /// reveal the next boundary before the scope runs out. A candidate that
    /// straddles the end of the queue suspends the search; it is never
    /// skipped.
    fn find_boundary(&self) -> Result<Boundary> {
        let search_start = self
            .stream_info
            .as_ref()
            .and_then(|info| info.min_frame_size)
            .map_or(SYNC_LEN, |min| (min as usize).max(SYNC_LEN));
        let window_end = self
            .stream_info
            .as_ref()
            .and_then(|info| info.max_frame_size)
            .map(|max| max as usize + SYNC_LEN);
        let search_end = window_end.map_or(self.queue.len(), |end| end.min(self.queue.len()));

        // The second sync byte carries the established blocking bit, so a
        // frame with a flipped strategy never even becomes a candidate.
        let sync_second = match self.blocking {
            Some(BlockingStrategy::Variable) => 0xF9,
            _ => 0xF8,
        };

        let mut offset = search_start;
        while offset + SYNC_LEN <= search_end {
            if self.queue[offset] == 0xFF && self.queue[offset + 1] == sync_second {
                match self.read_header_at(offset) {
                    Ok(next) => return Ok(Boundary::Found { offset, next }),
                    Err(HeaderError::InsufficientData) => {
                        trace!("sync candidate at offset {offset} straddles the queue end");
                        return Ok(Boundary::Suspend);
                    }
                    Err(reason) => {
                        trace!("sync candidate at offset {offset} rejected: {reason}");
                    }
                }
            }
            offset += 1;
        }

        if window_end.is_some_and(|end| end <= self.queue.len()) {
            bail!(ParseError::InvalidFrame(self.pos));
        }
        Ok(Boundary::Suspend)
    }

    fn read_header_at(&self, offset: usize) -> Result<FrameHeader, HeaderError> {
        let ctx = HeaderContext {
            stream_info: self.stream_info.as_ref(),
            blocking: self.blocking,
            previous: self.current.as_ref(),
        };
        FrameHeader::read(&self.queue[offset..], &ctx, &self.crc_frame_header)
    }

    fn consume(&mut self, len: usize) -> Vec<u8> {
        let bytes: Vec<u8> = self.queue.drain(..len).collect();
        self.pos += bytes.len() as u64;
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::frame::encode_frame_header;
    use crate::structs::metadata::encode_block_header;
    use crate::structs::stream_info::encode_stream_info;

    const MD5: [u8; 16] = [0x7A; 16];

    /// 16 kHz mono 16-bit STREAMINFO with a 1152-sample fixed block size.
    fn stream_info_block(is_last: bool, max_frame_size: u32) -> Vec<u8> {
        let mut block = encode_block_header(is_last, 0, 34).to_vec();
        block.extend(encode_stream_info(
            1152,
            1152,
            0,
            max_frame_size,
            16_000,
            1,
            16,
            32_000,
            MD5,
        ));
        block
    }

    /// Frame matching [`stream_info_block`]: 1152 samples, 16 kHz, mono,
    /// 16-bit, frame index `n`, 20 payload bytes.
    fn fixed_frame(n: u64) -> Vec<u8> {
        let mut frame = encode_frame_header(false, n, 0b0011, 0b0101, 0, 0b100, &[], &[]);
        frame.extend_from_slice(&[0u8; 20]);
        frame
    }

    fn fixed_stream(frames: u64) -> Vec<u8> {
        let mut stream = STREAM_MARKER.to_vec();
        stream.extend(stream_info_block(true, 0));
        for n in 0..frames {
            stream.extend(fixed_frame(n));
        }
        stream
    }

    fn reassemble(records: &[Record], tail: &FrameBuffer) -> Vec<u8> {
        let mut bytes: Vec<u8> = records
            .iter()
            .filter_map(Record::payload)
            .flatten()
            .copied()
            .collect();
        bytes.extend_from_slice(&tail.data);
        bytes
    }

    #[test]
    fn parses_whole_stream() -> Result<()> {
        let stream = fixed_stream(3);
        let mut parser = Parser::default();
        let records = parser.parse(&stream)?;

        // Marker, STREAMINFO block, decoded parameters, two delimited
        // frames; the third frame has no successor sync yet.
        assert_eq!(records.len(), 5);
        assert_eq!(records[0], Record::Opaque(b"fLaC".to_vec()));
        assert!(matches!(&records[1], Record::Opaque(block) if block.len() == 38));

        let Record::StreamInfo(info) = &records[2] else {
            panic!("expected stream parameters, got {:?}", records[2]);
        };
        assert_eq!(info.min_block_size, Some(1152));
        assert_eq!(info.max_block_size, Some(1152));
        assert_eq!(info.min_frame_size, None);
        assert_eq!(info.max_frame_size, None);
        assert_eq!(info.sample_rate, 16_000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.total_samples, Some(32_000));
        assert_eq!(info.md5_signature, Some(MD5));

        for (n, record) in records[3..].iter().enumerate() {
            let Record::Frame(frame) = record else {
                panic!("expected frame, got {record:?}");
            };
            let frame_info = frame.info.expect("in-stream frames carry metadata");
            assert_eq!(frame_info.first_sample, n as u64 * 1152);
            assert_eq!(frame_info.samples, 1152);
            assert_eq!(frame_info.sample_rate, 16_000);
            assert_eq!(frame_info.channels, 1);
            assert_eq!(frame_info.bits_per_sample, 16);
        }

        let tail = parser.flush();
        assert_eq!(tail.info.expect("final frame metadata").first_sample, 2 * 1152);
        assert_eq!(
            parser.position() + tail.data.len() as u64,
            stream.len() as u64
        );
        assert_eq!(reassemble(&records, &tail), stream);
        Ok(())
    }

    #[test]
    fn chunking_does_not_change_records() -> Result<()> {
        let stream = fixed_stream(3);

        let mut whole = Parser::default();
        let expected = whole.parse(&stream)?;
        let expected_tail = whole.flush();

        let mut parser = Parser::default();
        let mut records = Vec::new();
        for byte in &stream {
            records.extend(parser.parse(std::slice::from_ref(byte))?);
        }

        assert_eq!(records, expected);
        assert_eq!(parser.flush(), expected_tail);
        Ok(())
    }

    #[test]
    fn resumes_across_a_split_frame_header() -> Result<()> {
        let stream = fixed_stream(3);
        let frame_len = fixed_frame(0).len();
        // Cut inside the second frame's header: the first frame's terminal
        // boundary is found but not yet decidable.
        let split = MIN_STREAM_PREFIX + frame_len + 3;

        let mut parser = Parser::default();
        let first = parser.parse(&stream[..split])?;
        assert_eq!(first.len(), 3, "no frame may be emitted on a straddling candidate");

        let second = parser.parse(&stream[split..])?;
        assert_eq!(second.len(), 2);
        assert!(matches!(&second[0], Record::Frame(frame) if frame.data.len() == frame_len));
        Ok(())
    }

    #[test]
    fn passes_secondary_metadata_blocks_through() -> Result<()> {
        let mut stream = STREAM_MARKER.to_vec();
        stream.extend(stream_info_block(false, 0));
        let mut padding = encode_block_header(true, 1, 10).to_vec();
        padding.extend_from_slice(&[0u8; 10]);
        stream.extend(&padding);
        stream.extend(fixed_frame(0));
        stream.extend(fixed_frame(1));

        let mut parser = Parser::default();
        let records = parser.parse(&stream)?;

        assert_eq!(records.len(), 5);
        assert!(matches!(&records[2], Record::StreamInfo(_)));
        assert_eq!(records[3], Record::Opaque(padding));
        assert!(matches!(&records[4], Record::Frame(_)));

        let tail = parser.flush();
        assert_eq!(reassemble(&records, &tail), stream);
        Ok(())
    }

    #[test]
    fn streaming_mode_synthesizes_stream_parameters() -> Result<()> {
        let mut stream = Vec::new();
        for n in 0..3 {
            stream.extend(fixed_frame(n));
        }

        let mut parser = Parser::new(true);
        let records = parser.parse(&stream)?;

        assert_eq!(records.len(), 3);
        let Record::StreamInfo(info) = &records[0] else {
            panic!("synthesized parameters must precede the first frame");
        };
        assert_eq!(info.min_block_size, Some(1152));
        assert_eq!(info.max_block_size, Some(1152));
        assert_eq!(info.min_frame_size, None);
        assert_eq!(info.max_frame_size, None);
        assert_eq!(info.sample_rate, 16_000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.total_samples, None);
        assert_eq!(info.md5_signature, None);

        let tail = parser.flush();
        assert_eq!(reassemble(&records, &tail), stream);
        Ok(())
    }

    #[test]
    fn streaming_mode_leaves_variable_block_bounds_unknown() -> Result<()> {
        let mut stream = Vec::new();
        for number in [0u64, 4096] {
            let mut frame = encode_frame_header(true, number, 0b1100, 0b1001, 1, 0b100, &[], &[]);
            frame.extend_from_slice(&[0u8; 20]);
            stream.extend(frame);
        }

        let mut parser = Parser::new(true);
        let records = parser.parse(&stream)?;

        let Record::StreamInfo(info) = &records[0] else {
            panic!("synthesized parameters must precede the first frame");
        };
        assert_eq!(info.min_block_size, None);
        assert_eq!(info.max_block_size, None);
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.channels, 2);

        assert_eq!(parser.blocking_strategy(), Some(BlockingStrategy::Variable));

        let tail = parser.flush();
        assert_eq!(tail.info.expect("final frame metadata").first_sample, 4096);
        assert_eq!(reassemble(&records, &tail), stream);
        Ok(())
    }

    #[test]
    fn rejects_headerless_input_without_streaming_mode() {
        let mut stream = Vec::new();
        for n in 0..3 {
            stream.extend(fixed_frame(n));
        }

        let mut parser = Parser::default();
        let err = parser.parse(&stream).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::NotStream(0))
        );
    }

    #[test]
    fn rejects_non_streaminfo_first_block() {
        let mut stream = STREAM_MARKER.to_vec();
        let mut padding = encode_block_header(true, 1, 40).to_vec();
        padding.extend_from_slice(&[0u8; 40]);
        stream.extend(&padding);

        let mut parser = Parser::default();
        let err = parser.parse(&stream).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::MissingStreamInfo)
        );
    }

    #[test]
    fn fails_when_the_search_window_is_exhausted() -> Result<()> {
        let mut stream = STREAM_MARKER.to_vec();
        stream.extend(stream_info_block(true, 64));
        stream.extend(fixed_frame(0));
        let second_frame_pos = stream.len() as u64;
        stream.extend(fixed_frame(1));
        // Junk tail longer than max_frame_size + sync length, with no sync
        // pattern inside.
        stream.extend_from_slice(&[0x55; 80]);

        let mut parser = Parser::default();
        let err = parser.parse(&stream).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::InvalidFrame(second_frame_pos))
        );
        Ok(())
    }

    #[test]
    fn skips_sync_pattern_inside_frame_payload() -> Result<()> {
        let mut stream = STREAM_MARKER.to_vec();
        stream.extend(stream_info_block(true, 0));

        // First frame's payload embeds a sync-shaped pattern whose candidate
        // header carries the reserved block size code and is rejected.
        let mut first = encode_frame_header(false, 0, 0b0011, 0b0101, 0, 0b100, &[], &[]);
        first.extend_from_slice(&[0x00, 0x00, 0xFF, 0xF8, 0x05, 0x00, 0x00, 0x00]);
        stream.extend(&first);
        stream.extend(fixed_frame(1));
        stream.extend(fixed_frame(2));

        let mut parser = Parser::default();
        let records = parser.parse(&stream)?;

        assert_eq!(records.len(), 5);
        assert!(
            matches!(&records[3], Record::Frame(frame) if frame.data == first),
            "the false sync must stay inside the first frame"
        );
        assert!(matches!(&records[4], Record::Frame(frame) if frame.data == fixed_frame(1)));

        let tail = parser.flush();
        assert_eq!(reassemble(&records, &tail), stream);
        Ok(())
    }

    #[test]
    fn corrupted_header_candidates_merge_into_the_flushed_frame() -> Result<()> {
        let mut stream = fixed_stream(3);
        let frame_len = fixed_frame(0).len();
        // Corrupt the second frame's coded number; its header CRC no longer
        // matches, the third frame then fails sample-number continuity, so
        // no boundary is ever found.
        stream[MIN_STREAM_PREFIX + frame_len + 4] ^= 0x01;

        let mut parser = Parser::default();
        let records = parser.parse(&stream)?;
        assert_eq!(records.len(), 3, "no frame boundary may be accepted");

        let tail = parser.flush();
        assert_eq!(tail.data.len(), 3 * frame_len);
        assert_eq!(tail.info.expect("first frame metadata").first_sample, 0);
        assert_eq!(reassemble(&records, &tail), stream);
        Ok(())
    }

    #[test]
    fn blocking_strategy_flip_is_never_a_candidate() -> Result<()> {
        let mut stream = STREAM_MARKER.to_vec();
        stream.extend(stream_info_block(true, 0));
        stream.extend(fixed_frame(0));
        // Variable-blocking header with a continuous sample number; the sync
        // pattern itself disagrees with the established strategy.
        let mut rogue = encode_frame_header(true, 1152, 0b0011, 0b0101, 0, 0b100, &[], &[]);
        rogue.extend_from_slice(&[0u8; 20]);
        stream.extend(rogue);

        let mut parser = Parser::default();
        let records = parser.parse(&stream)?;
        assert_eq!(records.len(), 3, "no frame boundary may be accepted");
        assert_eq!(parser.blocking_strategy(), Some(BlockingStrategy::Fixed));

        let tail = parser.flush();
        assert_eq!(reassemble(&records, &tail), stream);
        Ok(())
    }

    #[test]
    fn invalid_first_frame_header_is_fatal() {
        let mut stream = STREAM_MARKER.to_vec();
        stream.extend(stream_info_block(true, 0));
        let first_frame_pos = stream.len() as u64;
        // Sync pattern followed by the reserved sample rate code.
        let mut frame = encode_frame_header(false, 0, 0b0011, 0b1111, 0, 0b100, &[], &[]);
        frame.extend_from_slice(&[0u8; 20]);
        stream.extend(frame);

        let mut parser = Parser::default();
        let err = parser.parse(&stream).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::InvalidHeader {
                pos: first_frame_pos,
                reason: HeaderError::InvalidSampleRate,
            })
        );
    }

    #[test]
    fn flush_before_frames_returns_the_raw_queue() -> Result<()> {
        let mut parser = Parser::default();
        let tail = parser.flush();
        assert!(tail.data.is_empty());
        assert_eq!(tail.info, None);

        // Below the minimum stream prefix nothing is consumed.
        let mut parser = Parser::default();
        assert!(parser.parse(b"fLa")?.is_empty());
        let tail = parser.flush();
        assert_eq!(tail.data, b"fLa".to_vec());
        assert_eq!(tail.info, None);
        Ok(())
    }
}
