use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::InfoArgs;
use crate::input::InputReader;
use crate::timestamp::time_str;
use flacparse::process::Record;
use flacparse::process::parse::Parser;
use flacparse::structs::frame::BlockingStrategy;
use flacparse::structs::stream_info::StreamInfo;

pub fn cmd_info(args: &InfoArgs, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing FLAC stream: {}", args.input.display());

    let mut input_reader = InputReader::new(&args.input)?;
    let mut parser = Parser::new(args.streaming);
    let mut context = AnalysisContext::default();

    // Create progress spinner for frame counting if enabled
    if let Some(multi) = multi {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb.set_message("Analyzing frames...");
        context.pb = Some(pb);
    }

    input_reader.process_chunks(64 * 1024, |chunk| {
        context.total_bytes += chunk.len();
        for record in parser.parse(chunk)? {
            context.process_record(&record);
        }

        Ok(true)
    })?;

    let tail = parser.flush();
    if !tail.data.is_empty() {
        context.process_record(&Record::Frame(tail));
    }

    if let Some(pb) = context.pb.take() {
        pb.finish_and_clear();
    }

    match context.stream_info.take() {
        Some(info) => {
            display_stream_info(&info, parser.blocking_strategy());
            display_summary(&context, &info);
        }
        None => {
            println!("No FLAC stream parameters found in the file.");
            println!("This doesn't appear to be a valid FLAC stream.");
        }
    }

    Ok(())
}

#[derive(Default)]
struct AnalysisContext {
    stream_info: Option<StreamInfo>,
    opaque_records: usize,
    frame_count: usize,
    samples: u64,
    total_bytes: usize,
    pb: Option<ProgressBar>,
}

impl AnalysisContext {
    fn process_record(&mut self, record: &Record) {
        match record {
            Record::StreamInfo(info) => self.stream_info = Some(info.clone()),
            Record::Opaque(_) => self.opaque_records += 1,
            Record::Frame(frame) => {
                self.frame_count += 1;
                if let Some(info) = &frame.info {
                    self.samples += u64::from(info.samples);
                }

                if self.frame_count.is_multiple_of(100) {
                    if let Some(pb) = &self.pb {
                        pb.set_message(format!("Analyzing frames...       {}", self.frame_count));
                        pb.tick();
                    }
                }
            }
        }
    }
}

fn display_stream_info(info: &StreamInfo, blocking: Option<BlockingStrategy>) {
    println!();
    println!("FLAC Stream Information");
    println!("=======================");
    println!();
    println!("  Sample rate               {} Hz", info.sample_rate);
    println!("  Channels                  {}", info.channels);
    println!("  Bits per sample           {}", info.bits_per_sample);

    let blocking_str = match blocking {
        Some(BlockingStrategy::Fixed) => "fixed",
        Some(BlockingStrategy::Variable) => "variable",
        None => "unknown",
    };
    println!("  Blocking strategy         {blocking_str}");
    println!(
        "  Block size                {}",
        range_str(
            info.min_block_size.map(u32::from),
            info.max_block_size.map(u32::from),
            "samples",
        )
    );
    println!(
        "  Frame size                {}",
        range_str(info.min_frame_size, info.max_frame_size, "bytes")
    );

    match info.total_samples {
        Some(total) if info.sample_rate > 0 => {
            let duration = total as f64 / f64::from(info.sample_rate);
            println!("  Total samples             {total} ({})", time_str(duration));
        }
        Some(total) => println!("  Total samples             {total}"),
        None => println!("  Total samples             unknown"),
    }

    match &info.md5_signature {
        Some(md5) => {
            let hex: String = md5.iter().map(|byte| format!("{byte:02x}")).collect();
            println!("  MD5 signature             {hex}");
        }
        None => println!("  MD5 signature             unknown"),
    }
    println!();
}

fn range_str(min: Option<u32>, max: Option<u32>, unit: &str) -> String {
    match (min, max) {
        (Some(min), Some(max)) if min == max => format!("{min} {unit}"),
        (Some(min), Some(max)) => format!("{min}..{max} {unit}"),
        (Some(min), None) => format!("at least {min} {unit}"),
        (None, Some(max)) => format!("at most {max} {unit}"),
        (None, None) => "unknown".to_string(),
    }
}

fn display_summary(context: &AnalysisContext, info: &StreamInfo) {
    println!("Analysis Summary");
    println!("  Frames processed          {}", context.frame_count);
    println!(
        "  Header records            {}",
        context.opaque_records
    );

    let size_mb = context.total_bytes as f64 / 1_000_000.0;
    println!(
        "  Size                      {size_mb:.2} MB ({} bytes)",
        context.total_bytes
    );

    if info.sample_rate > 0 && context.samples > 0 {
        let duration_secs = context.samples as f64 / f64::from(info.sample_rate);
        println!("  Duration                  {}", time_str(duration_secs));

        if duration_secs > 0.0 {
            let avg_data_rate_kbps = (context.total_bytes as f64 * 8.0) / (duration_secs * 1000.0);
            println!("  Average data rate         {avg_data_rate_kbps:.1} kbps");
        }
    }

    println!();
}
