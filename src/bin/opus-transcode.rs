use std::path::{Path, PathBuf};

use clap::{Parser, error::ErrorKind};
use colored::Colorize;
use opus_transcode::{
    DEFAULT_BITRATE, FfmpegLogLevel, OPUS_SAMPLE_RATE, TranscodeError, TranscodeOptions,
    Transcoder,
};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  opus-transcode input.wav output.opus\n  opus-transcode input.flac output.ogg --bitrate 96000\n  opus-transcode input.mka output.webm --remove-partial --json";

#[derive(Debug, Parser)]
#[command(
    name = "opus-transcode",
    version,
    about = "Transcode a single-stream audio file to Opus",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    /// Input audio file holding exactly one audio stream.
    input: PathBuf,

    /// Output file; the container follows the extension (.opus, .ogg, .webm, .mka).
    output: PathBuf,

    /// Target bitrate in bits per second.
    #[arg(long, default_value_t = DEFAULT_BITRATE)]
    bitrate: usize,

    /// Encoder compression level (0-10 for libopus).
    #[arg(long)]
    compression_level: Option<usize>,

    /// Preferred encoder sample rate in Hz.
    #[arg(long, default_value_t = OPUS_SAMPLE_RATE)]
    sample_rate: u32,

    /// Delete the output file if the transcode fails.
    #[arg(long)]
    remove_partial: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<FfmpegLogLevel>,

    /// Print the run summary as machine-readable JSON.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn transcode_options(&self) -> TranscodeOptions {
        let options = TranscodeOptions::new()
            .with_bitrate(self.bitrate)
            .with_sample_rate(self.sample_rate)
            .with_remove_partial_output(self.remove_partial);
        match self.compression_level {
            Some(level) => options.with_compression_level(level),
            None => options,
        }
    }
}

/// Exit status for a command line clap rejected or answered itself.
fn parse_exit_code(error: &clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

/// The input has not been validated yet, so the file is only replaced once
/// the output stage opens it.
fn overwrite_warning(path: &Path) -> Option<String> {
    path.exists().then(|| {
        format!(
            "{} will be overwritten if the input is accepted",
            path.display()
        )
    })
}

fn run(cli: &Cli) -> Result<(), TranscodeError> {
    if let Some(level) = cli.log_level {
        opus_transcode::set_ffmpeg_log_level(level);
    }

    if let Some(message) = overwrite_warning(&cli.output) {
        eprintln!("{} {}", "warning:".yellow().bold(), message.yellow());
    }

    let summary = Transcoder::new(&cli.input, &cli.output)
        .options(cli.transcode_options())
        .run()?;

    if cli.json {
        let payload = json!({
            "input": cli.input.display().to_string(),
            "output": cli.output.display().to_string(),
            "sample_rate": summary.sample_rate,
            "input_samples": summary.input_samples,
            "encoded_samples": summary.encoded_samples,
            "packets_written": summary.packets_written,
            "duration_seconds": summary.duration().as_secs_f64(),
        });
        println!("{payload}");
    } else {
        println!("{} {}", "saved".green().bold(), cli.output.display());
    }

    Ok(())
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            std::process::exit(parse_exit_code(&error));
        }
    };

    if let Err(error) = run(&cli) {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(error.exit_code());
    }
}
