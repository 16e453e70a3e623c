//! # opus-transcode
//!
//! Transcode a single-stream audio file to Opus.
//!
//! `opus-transcode` opens an input file holding exactly one audio stream,
//! decodes it, converts the samples to what the Opus encoder accepts, encodes
//! and writes the result into the container chosen by the output path's
//! extension, powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ```no_run
//! use opus_transcode::Transcoder;
//!
//! let summary = Transcoder::new("input.wav", "output.opus").run().unwrap();
//! println!("{:?} of audio in {} packets", summary.duration(), summary.packets_written);
//! ```
//!
//! ## Resource Handling
//!
//! Every FFmpeg handle acquired during a run is owned by a
//! [`ResourceLedger`], which releases them in a fixed order exactly once,
//! whether the run completes or stops at its first error. The pipeline
//! talks to FFmpeg only through the [`MediaLibrary`] trait, so the same
//! pipeline can be driven by an instrumented implementation in tests.
//!
//! | Stage | Entry point |
//! |-------|-------------|
//! | Input pipeline | [`ResourceLedger::open_input`] |
//! | Output pipeline | [`ResourceLedger::open_output`] |
//! | Frame loop | [`ResourceLedger::run`] |
//! | Release | [`ResourceLedger::shutdown`] |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system, built
//! with an Opus encoder (`libopus` preferred, the native `opus` encoder is
//! used as a fallback).

pub mod adapter;
pub mod configuration;
pub mod error;
pub mod ffmpeg;
pub mod ffmpeg_library;
pub mod input;
pub mod ledger;
pub mod library;
pub mod output;
pub mod transcode;

pub use adapter::{FrameAdapter, SampleFifo};
pub use configuration::{
    DEFAULT_BITRATE, EncoderSettings, OPUS_SAMPLE_RATE, TargetCodec, TranscodeOptions,
};
pub use error::TranscodeError;
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use ffmpeg_library::FfmpegLibrary;
pub use ledger::{InputContext, OutputContext, OutputStream, ReleaseReport, ResourceLedger};
pub use library::{DecodedFrame, EncodedPacket, MediaKind, MediaLibrary, StreamInfo};
pub use transcode::{PacketTimeline, TranscodeSummary, Transcoder};
