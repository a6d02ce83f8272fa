//! pixudp command-line interface.
//!
//! Decodes UDP captures of the pixel telescope readout into hit lists.
#![allow(clippy::uninlined_format_args, clippy::cast_precision_loss)]

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use pixudp_core::{sort_hits, Hit};
use pixudp_decode::{DecodeStats, DecoderConfig, ReadoutMode, TsFormat};
use pixudp_io::{decode_files, CaptureFileReader, HitListWriter, SplitHitWriter};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    PixudpIo(#[from] pixudp_io::Error),

    #[error("Configuration error: {0}")]
    Decode(#[from] pixudp_decode::Error),

    #[error("Core error: {0}")]
    Core(#[from] pixudp_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Readout mode selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Datamux compression, three words per hit
    Datamux,
    /// Non-multiplexed readout, seven words per hit
    Nomux,
    /// Triggered readout with on-chip trigger table
    Triggered,
}

impl From<Mode> for ReadoutMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Datamux => ReadoutMode::Datamux,
            Mode::Nomux => ReadoutMode::Nomux,
            Mode::Triggered => ReadoutMode::Triggered,
        }
    }
}

/// Decoder for pixel telescope UDP captures.
#[derive(Parser)]
#[command(name = "pixudp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Decoder options shared by the subcommands.
#[derive(clap::Args)]
struct DecoderArgs {
    /// JSON decoder configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Readout mode (overrides the configuration)
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Disable the byte duplication workaround (1024 byte packages)
    #[arg(long)]
    no_udp_bug: bool,

    /// Force the triggered timestamp format
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=2))]
    ts_format: Option<u8>,
}

impl DecoderArgs {
    fn to_config(&self) -> Result<DecoderConfig> {
        let mut config = match &self.config {
            Some(path) => DecoderConfig::from_file(path)?,
            None => DecoderConfig::new(),
        };
        if let Some(mode) = self.mode {
            config = config.with_mode(mode.into());
        }
        if self.no_udp_bug {
            config = config.with_udp_bug(false);
        }
        if let Some(format) = self.ts_format {
            config = config.with_ts_format(Some(TsFormat::try_from(format)?));
        }
        if config.ts_format.is_some() && config.mode != ReadoutMode::Triggered {
            warn!("--ts-format only applies to triggered readout");
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decode capture files into a hit list
    Decode {
        /// Input capture file(s)
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Output hit list
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        decoder: DecoderArgs,

        /// Write one hit list per layer
        #[arg(long)]
        split_layers: bool,

        /// Sort hits by timestamp before writing
        #[arg(long)]
        sort: bool,
    },

    /// Show information about a capture file
    Info {
        /// Input capture file
        input: PathBuf,

        #[command(flatten)]
        decoder: DecoderArgs,

        /// Print the decoder counters as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Output of the decode command, single file or one file per layer.
enum Output {
    Single(HitListWriter<std::io::BufWriter<std::fs::File>>),
    Split(SplitHitWriter),
}

impl Output {
    fn create(path: &Path, split: bool, triggered: bool) -> pixudp_io::Result<Self> {
        Ok(if split {
            Output::Split(SplitHitWriter::new(path, triggered))
        } else {
            Output::Single(HitListWriter::create(path, triggered)?)
        })
    }

    fn write_hits(&mut self, hits: &[Hit]) -> pixudp_io::Result<()> {
        match self {
            Output::Single(writer) => writer.write_hits(hits),
            Output::Split(writer) => writer.write_hits(hits),
        }
    }

    fn finish(mut self, path: &Path) -> Result<u64> {
        match &mut self {
            Output::Single(writer) => {
                writer.flush()?;
                info!("Wrote {} hits to {}", writer.hits_written(), path.display());
                Ok(writer.hits_written())
            }
            Output::Split(writer) => {
                writer.flush()?;
                for (file, count) in writer.outputs() {
                    info!("Wrote {count} hits to {}", file.display());
                }
                Ok(writer.hits_written())
            }
        }
    }
}

fn decode(
    input: &[PathBuf],
    output: &Path,
    config: &DecoderConfig,
    split_layers: bool,
    sort: bool,
) -> Result<()> {
    info!(
        "Decoding {} file(s) in {} mode (byte duplication workaround {})",
        input.len(),
        config.mode,
        if config.udp_bug { "on" } else { "off" }
    );

    let start = Instant::now();
    let triggered = config.mode == ReadoutMode::Triggered;
    let mut out = Output::create(output, split_layers, triggered)?;
    let mut total = DecodeStats::default();

    if input.len() == 1 && !sort {
        let reader = CaptureFileReader::open(&input[0])?.with_config(config.clone());
        let stats = reader.decode_each(|hits| out.write_hits(hits))?;
        total.merge(&stats);
    } else {
        for result in decode_files(input, config) {
            let mut capture = result?;
            if sort {
                sort_hits(&mut capture.hits);
            }
            out.write_hits(&capture.hits)?;
            total.merge(&capture.stats);
        }
    }

    let written = out.finish(output)?;
    println!(
        "Decoded {} files in {:.2}s",
        input.len(),
        start.elapsed().as_secs_f64()
    );
    println!("Hits written: {}", written);
    println!(
        "Discarded: {}, protocol violations: {}, unaligned words: {}",
        total.discarded, total.protocol_violations, total.unaligned
    );
    if total.format_errors > 0 {
        println!("Timestamp format errors: {}", total.format_errors);
    }
    Ok(())
}

fn show_info(input: &Path, config: DecoderConfig, json: bool) -> Result<()> {
    let reader = CaptureFileReader::open(input)?.with_config(config);
    let capture = reader.read_hits()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&capture.stats)?);
        return Ok(());
    }

    let file_size = reader.file_size();
    println!("File: {}", input.display());
    println!(
        "Size: {} bytes ({:.2} MB)",
        file_size,
        file_size as f64 / 1_000_000.0
    );
    println!(
        "Packages: {} ({} bytes each)",
        reader.package_count(),
        reader.config().package_size()
    );
    println!("Mode: {}", reader.config().mode);
    println!("Hits: {}", capture.hits.len());

    let mut per_layer: BTreeMap<i16, usize> = BTreeMap::new();
    for hit in &capture.hits {
        *per_layer.entry(hit.layer).or_default() += 1;
    }
    for (layer, count) in per_layer {
        println!("  Layer {}: {}", layer, count);
    }

    let ts = capture.hits.iter().map(|h| h.ts);
    if let (Some(min), Some(max)) = (ts.clone().min(), ts.max()) {
        println!("TS range: {} - {}", min, max);
    }

    let stats = capture.stats;
    println!("Headers: {}", stats.headers);
    println!("Empty words: {}", stats.empty_words);
    println!("Unaligned words: {}", stats.unaligned);
    println!("Protocol violations: {}", stats.protocol_violations);
    println!("Discarded hits: {}", stats.discarded);
    println!("Aborted packages: {}", stats.aborted_buffers);
    if stats.format_errors > 0 {
        println!("Timestamp format errors: {}", stats.format_errors);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Decode {
            input,
            output,
            decoder,
            split_layers,
            sort,
        } => decode(&input, &output, &decoder.to_config()?, split_layers, sort),
        Commands::Info {
            input,
            decoder,
            json,
        } => show_info(&input, decoder.to_config()?, json),
    }
}
