use anyhow::Result;

use super::command::FramesArgs;
use crate::input::InputReader;
use crate::timestamp::time_str;
use flacparse::process::{FrameBuffer, Record};
use flacparse::process::parse::Parser;
use flacparse::structs::frame::ChannelMode;

pub fn cmd_frames(args: &FramesArgs) -> Result<()> {
    log::info!("Walking frames of: {}", args.input.display());

    let mut input_reader = InputReader::new(&args.input)?;
    let mut parser = Parser::new(args.streaming);
    let mut table = FrameTable::new(args.limit);

    input_reader.process_chunks(64 * 1024, |chunk| {
        for record in parser.parse(chunk)? {
            if !table.take(&record) {
                return Ok(false);
            }
        }

        Ok(true)
    })?;

    if !table.limit_reached() {
        let tail = parser.flush();
        if !tail.data.is_empty() {
            table.print_frame(&tail, true);
        }
    }

    if table.frames_printed == 0 {
        println!("No frames found.");
    }

    Ok(())
}

struct FrameTable {
    /// Absolute byte offset of the next payload record.
    offset: u64,
    frames_printed: usize,
    limit: Option<usize>,
    header_printed: bool,
}

impl FrameTable {
    fn new(limit: Option<usize>) -> Self {
        Self {
            offset: 0,
            frames_printed: 0,
            limit,
            header_printed: false,
        }
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.frames_printed >= limit)
    }

    /// Accounts for one record; returns false once the frame limit is hit.
    fn take(&mut self, record: &Record) -> bool {
        match record {
            Record::StreamInfo(_) => {}
            Record::Opaque(data) => self.offset += data.len() as u64,
            Record::Frame(frame) => {
                self.print_frame(frame, false);
                if self.limit_reached() {
                    return false;
                }
            }
        }

        true
    }

    fn print_frame(&mut self, frame: &FrameBuffer, flushed: bool) {
        if !self.header_printed {
            println!(
                "{:>8}  {:>12}  {:>14}  {:>8}  {:<12}  {:>14}",
                "frame", "offset", "first sample", "samples", "mode", "pts"
            );
            self.header_printed = true;
        }

        let suffix = if flushed { "  (flushed)" } else { "" };
        match &frame.info {
            Some(info) => {
                // Presentation timestamp of the frame's first sample.
                let pts = if info.sample_rate > 0 {
                    time_str(info.first_sample as f64 / f64::from(info.sample_rate))
                } else {
                    "unknown".to_string()
                };
                println!(
                    "{:>8}  {:>12}  {:>14}  {:>8}  {:<12}  {:>14}{}",
                    self.frames_printed,
                    self.offset,
                    info.first_sample,
                    info.samples,
                    mode_str(info.channel_mode),
                    pts,
                    suffix,
                );
            }
            None => {
                println!(
                    "{:>8}  {:>12}  {:>14}  {:>8}  {:<12}  {:>14}{}",
                    self.frames_printed, self.offset, "-", "-", "-", "-", suffix,
                );
            }
        }

        self.offset += frame.data.len() as u64;
        self.frames_printed += 1;
    }
}

fn mode_str(mode: ChannelMode) -> &'static str {
    match mode {
        ChannelMode::Independent => "independent",
        ChannelMode::LeftSide => "left/side",
        ChannelMode::RightSide => "right/side",
        ChannelMode::MidSide => "mid/side",
    }
}
